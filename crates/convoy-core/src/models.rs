//! Wire-shaped records shared with the realtime store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::policy::{ACTIVITY_WINDOW_SECS, ONLINE_WINDOW_SECS};

/// A lat/lng pair carried on alerts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// Latest reported position of a group member.
///
/// Owned by the reporting user and overwritten in place on every location
/// update. The store keys member records by user id; `user_id` is filled
/// from the key when a record omits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub accuracy_m: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub battery_pct: Option<f64>,
    #[serde(default)]
    pub emergency: bool,
}

impl Position {
    /// Display name, falling back to the user id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.user_id)
    }

    /// Reported within the online window (member shows as online).
    pub fn is_online(&self, now: DateTime<Utc>) -> bool {
        now - self.timestamp < Duration::seconds(ONLINE_WINDOW_SECS)
    }

    /// Eligible for centroid computation: coordinates present and the
    /// report is fresher than the activity window.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.is_active_within(now, Duration::seconds(ACTIVITY_WINDOW_SECS))
    }

    /// [`Position::is_active`] with an explicit window.
    pub fn is_active_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.lat.is_finite() && self.lng.is_finite() && now - self.timestamp < window
    }
}

/// Count members whose latest report falls inside the online window.
pub fn online_count<'a>(
    members: impl IntoIterator<Item = &'a Position>,
    now: DateTime<Utc>,
) -> usize {
    members.into_iter().filter(|p| p.is_online(now)).count()
}

/// Alert class. Determines notification urgency and repeat interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Member drifted beyond the lag threshold from the group centroid.
    Lagging,
    /// Member explicitly asked for help.
    Emergency,
    /// Member's battery dropped below the trigger threshold.
    LowBattery,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertKind::Lagging => "lagging",
            AlertKind::Emergency => "emergency",
            AlertKind::LowBattery => "low_battery",
        };
        f.write_str(s)
    }
}

/// One member's acknowledgment of an alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckRecord {
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
}

/// A broadcast alert record.
///
/// Immutable after creation except for the `acknowledged` map, which only
/// grows. Created by whichever client detects the condition: the lag
/// detector for `lagging`, the affected member's own client for
/// `emergency` and `low_battery`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Store-assigned record id; absent until the record has been pushed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    /// The member the alert is about.
    pub user_id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_distance_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<LatLng>,
    /// Acknowledging user id -> record. Malformed remote records may omit
    /// this entirely; that reads as zero acknowledgments.
    #[serde(default)]
    pub acknowledged: BTreeMap<String, AckRecord>,
}

impl Alert {
    /// Derived identity correlating this record with local notification
    /// state, independent of the store-assigned id.
    pub fn key(&self) -> AlertKey {
        AlertKey::derive(self.kind, &self.user_id, self.timestamp)
    }

    /// Number of members who acknowledged (the `k` in "k/n seen").
    pub fn ack_count(&self) -> usize {
        self.acknowledged.len()
    }

    pub fn is_acknowledged_by(&self, user_id: &str) -> bool {
        self.acknowledged.contains_key(user_id)
    }

    /// Record an acknowledgment locally, ahead of the store write landing.
    pub fn acknowledge_local(&mut self, user_id: &str, now: DateTime<Utc>) {
        self.acknowledged.insert(
            user_id.to_string(),
            AckRecord {
                user_id: user_id.to_string(),
                timestamp: now,
            },
        );
    }
}

/// Identity of a logical alert occurrence: kind, subject, and the origin
/// timestamp bucketed per minute.
///
/// The same event may be observed both before and after the store assigns
/// it a record id; the bucketed key correlates the two. A new occurrence
/// in a later minute gets a fresh key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlertKey(String);

impl AlertKey {
    pub fn derive(kind: AlertKind, user_id: &str, timestamp: DateTime<Utc>) -> Self {
        let minute = timestamp.timestamp_millis().div_euclid(60_000);
        AlertKey(format!("{kind}-{user_id}-{minute}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn missing_acknowledged_map_reads_as_empty() {
        let raw = r#"{
            "type": "emergency",
            "user_id": "u1",
            "name": "Asha",
            "timestamp": "2026-08-23T10:00:00Z",
            "message": "Emergency help needed!"
        }"#;
        let alert: Alert = serde_json::from_str(raw).unwrap();
        assert_eq!(alert.ack_count(), 0);
        assert!(!alert.is_acknowledged_by("u2"));
    }

    #[test]
    fn kind_serializes_snake_case() {
        let raw = serde_json::to_string(&AlertKind::LowBattery).unwrap();
        assert_eq!(raw, r#""low_battery""#);
    }

    #[test]
    fn key_buckets_by_minute() {
        let a = AlertKey::derive(AlertKind::Lagging, "u1", ts(120));
        let same_minute = AlertKey::derive(AlertKind::Lagging, "u1", ts(150));
        let next_minute = AlertKey::derive(AlertKind::Lagging, "u1", ts(180));
        assert_eq!(a, same_minute);
        assert_ne!(a, next_minute);
    }

    #[test]
    fn key_separates_kinds_and_users() {
        let lag = AlertKey::derive(AlertKind::Lagging, "u1", ts(0));
        let emer = AlertKey::derive(AlertKind::Emergency, "u1", ts(0));
        let other = AlertKey::derive(AlertKind::Lagging, "u2", ts(0));
        assert_ne!(lag, emer);
        assert_ne!(lag, other);
    }

    #[test]
    fn stale_position_is_not_active() {
        let now = ts(1_000);
        let pos = Position {
            user_id: "u1".into(),
            name: None,
            lat: 19.0,
            lng: 72.8,
            accuracy_m: 10.0,
            timestamp: ts(1_000 - 301),
            battery_pct: None,
            emergency: false,
        };
        assert!(!pos.is_active(now));
        assert!(!pos.is_online(now));
    }

    #[test]
    fn online_window_is_tighter_than_activity_window() {
        let now = ts(1_000);
        let pos = Position {
            user_id: "u1".into(),
            name: None,
            lat: 19.0,
            lng: 72.8,
            accuracy_m: 10.0,
            timestamp: ts(1_000 - 90),
            battery_pct: None,
            emergency: false,
        };
        assert!(pos.is_active(now));
        assert!(!pos.is_online(now));
        assert_eq!(online_count([&pos], now), 0);
    }
}
