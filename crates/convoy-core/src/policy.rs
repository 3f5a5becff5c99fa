//! Tunable thresholds and windows for the alert engine.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Seconds after its timestamp during which a position counts as online.
pub const ONLINE_WINDOW_SECS: i64 = 60;

/// Seconds after its timestamp during which a position is eligible for
/// centroid computation. Older reports are excluded, not errors.
pub const ACTIVITY_WINDOW_SECS: i64 = 300;

/// Configuration for the alert engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPolicy {
    /// Distance from the group centroid before a member counts as lagging
    pub lag_threshold_m: f64,
    /// Suppression window for repeated lagging alerts per member (seconds)
    pub lag_cooldown_secs: i64,
    /// Positions older than this are excluded from the centroid (seconds)
    pub activity_window_secs: i64,
    /// Repeat interval for emergency notifications (seconds)
    pub emergency_repeat_secs: i64,
    /// Repeat interval for lagging notifications (seconds)
    pub lagging_repeat_secs: i64,
    /// Battery percentage below which a low-battery alert fires
    pub low_battery_trigger_pct: f64,
    /// Battery percentage above which the monitor re-arms
    pub low_battery_rearm_pct: f64,
    /// How acknowledgments resolve an alert
    pub resolution: ResolutionPolicy,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            lag_threshold_m: LagPreset::Hiking.threshold_m(),
            lag_cooldown_secs: 300,
            activity_window_secs: ACTIVITY_WINDOW_SECS,
            emergency_repeat_secs: 3,
            lagging_repeat_secs: 10,
            low_battery_trigger_pct: 20.0,
            low_battery_rearm_pct: 30.0,
            resolution: ResolutionPolicy::PerViewer,
        }
    }
}

/// How an alert leaves a client's active list.
///
/// One policy applies to every alert kind for the whole session; mixing
/// the two per kind produces inconsistent dismissal behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    /// An alert leaves this client's view once this client acknowledges it.
    /// Other members keep seeing it until they acknowledge themselves.
    PerViewer,
    /// An alert stays visible to everyone until every active member has
    /// acknowledged it.
    Quorum,
}

impl FromStr for ResolutionPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "per_viewer" | "per-viewer" => Ok(ResolutionPolicy::PerViewer),
            "quorum" => Ok(ResolutionPolicy::Quorum),
            other => Err(ParsePolicyError::Resolution(other.to_string())),
        }
    }
}

/// Lag-threshold presets matching common group activities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LagPreset {
    Walking,
    Hiking,
    Cycling,
    Driving,
}

impl LagPreset {
    pub fn threshold_m(self) -> f64 {
        match self {
            LagPreset::Walking => 100.0,
            LagPreset::Hiking => 500.0,
            LagPreset::Cycling => 1000.0,
            LagPreset::Driving => 2000.0,
        }
    }
}

impl FromStr for LagPreset {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "walking" => Ok(LagPreset::Walking),
            "hiking" => Ok(LagPreset::Hiking),
            "cycling" => Ok(LagPreset::Cycling),
            "driving" => Ok(LagPreset::Driving),
            other => Err(ParsePolicyError::Preset(other.to_string())),
        }
    }
}

/// Distance units accepted by the threshold controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceUnit {
    Meters,
    Kilometers,
    Feet,
    Miles,
}

impl DistanceUnit {
    fn factor(self) -> f64 {
        match self {
            DistanceUnit::Meters => 1.0,
            DistanceUnit::Kilometers => 1000.0,
            DistanceUnit::Feet => 0.3048,
            DistanceUnit::Miles => 1609.34,
        }
    }

    pub fn to_meters(self, value: f64) -> f64 {
        value * self.factor()
    }

    pub fn from_meters(self, meters: f64) -> f64 {
        meters / self.factor()
    }
}

impl FromStr for DistanceUnit {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "m" | "meters" => Ok(DistanceUnit::Meters),
            "km" | "kilometers" => Ok(DistanceUnit::Kilometers),
            "ft" | "feet" => Ok(DistanceUnit::Feet),
            "mi" | "miles" => Ok(DistanceUnit::Miles),
            other => Err(ParsePolicyError::Unit(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ParsePolicyError {
    #[error("unknown resolution policy: {0}")]
    Resolution(String),
    #[error("unknown lag preset: {0}")]
    Preset(String),
    #[error("unknown distance unit: {0}")]
    Unit(String),
}
