//! Session configuration from environment.

use convoy_core::{AlertPolicy, LagPreset, ResolutionPolicy};
use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    /// Lag radius in meters. `CONVOY_LAG_PRESET` (walking/hiking/cycling/
    /// driving) wins over `CONVOY_LAG_THRESHOLD_M` when both are set.
    pub lag_threshold_m: f64,
    pub resolution: ResolutionPolicy,
    /// Whether this client runs lag detection. Any client may; by
    /// convention only the group admin's does, to avoid duplicate
    /// emissions.
    pub run_detection: bool,
    /// Repeat-timer granularity in milliseconds.
    pub tick_ms: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let preset = env::var("CONVOY_LAG_PRESET")
            .ok()
            .and_then(|s| s.parse::<LagPreset>().ok());
        let lag_threshold_m = preset.map(LagPreset::threshold_m).unwrap_or_else(|| {
            env::var("CONVOY_LAG_THRESHOLD_M")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(LagPreset::Hiking.threshold_m())
        });
        if lag_threshold_m <= 0.0 {
            tracing::warn!(lag_threshold_m, "non-positive lag threshold; detection disabled");
        }

        Self {
            lag_threshold_m,
            resolution: env::var("CONVOY_RESOLUTION")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(ResolutionPolicy::PerViewer),
            run_detection: env::var("CONVOY_RUN_DETECTION")
                .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            tick_ms: env::var("CONVOY_TICK_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
        }
    }

    /// Engine policy derived from this configuration.
    pub fn alert_policy(&self) -> AlertPolicy {
        AlertPolicy {
            lag_threshold_m: self.lag_threshold_m,
            resolution: self.resolution,
            ..AlertPolicy::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lag_threshold_m: LagPreset::Hiking.threshold_m(),
            resolution: ResolutionPolicy::PerViewer,
            run_detection: false,
            tick_ms: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_carries_threshold_and_resolution() {
        let config = Config {
            lag_threshold_m: 1000.0,
            resolution: ResolutionPolicy::Quorum,
            ..Config::default()
        };
        let policy = config.alert_policy();
        assert_eq!(policy.lag_threshold_m, 1000.0);
        assert_eq!(policy.resolution, ResolutionPolicy::Quorum);
        // Engine timings come from the policy defaults.
        assert_eq!(policy.emergency_repeat_secs, 3);
        assert_eq!(policy.lag_cooldown_secs, 300);
    }
}
