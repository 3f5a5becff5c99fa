//! Lag detection over member position snapshots.
//!
//! Flags members who have drifted beyond a configurable radius from the
//! group's centroid, with a per-member cooldown so the same drift does not
//! re-alert on every position refresh.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::geo::{haversine_distance, mean_centroid};
use crate::models::{Alert, AlertKind, LatLng, Position};
use crate::policy::AlertPolicy;

/// Snapshot-based lag detector.
///
/// Detection runs on full member snapshots delivered by the store
/// subscription; nothing is carried between runs except what the caller
/// passes back in as `recent_alerts` for cooldown lookup.
#[derive(Debug, Clone)]
pub struct LagDetector {
    threshold_m: f64,
    cooldown: Duration,
    activity_window: Duration,
}

impl LagDetector {
    pub fn new(policy: &AlertPolicy) -> Self {
        Self {
            threshold_m: policy.lag_threshold_m,
            cooldown: Duration::seconds(policy.lag_cooldown_secs),
            activity_window: Duration::seconds(policy.activity_window_secs),
        }
    }

    pub fn threshold_m(&self) -> f64 {
        self.threshold_m
    }

    /// Adjust the lag radius (admin distance controls).
    pub fn set_threshold_m(&mut self, threshold_m: f64) {
        self.threshold_m = threshold_m;
    }

    /// Run detection over a full member snapshot.
    ///
    /// Returns the new alerts to broadcast; empty when preconditions are
    /// not met. Skipped silently when the detecting client has no known
    /// position of its own, when fewer than two members are active (the
    /// centroid is undefined), or when the threshold is non-positive
    /// (detection disabled rather than "everyone is lagging").
    pub fn detect(
        &self,
        members: &HashMap<String, Position>,
        own_position: Option<&Position>,
        recent_alerts: &[Alert],
        now: DateTime<Utc>,
    ) -> Vec<Alert> {
        if own_position.is_none() || self.threshold_m <= 0.0 {
            return Vec::new();
        }

        let active: Vec<&Position> = members
            .values()
            .filter(|p| p.is_active_within(now, self.activity_window))
            .collect();
        if active.len() < 2 {
            return Vec::new();
        }

        let points: Vec<(f64, f64)> = active.iter().map(|p| (p.lat, p.lng)).collect();
        let Some((center_lat, center_lng)) = mean_centroid(&points) else {
            return Vec::new();
        };

        let mut alerts = Vec::new();
        for member in active {
            let distance_m = haversine_distance(center_lat, center_lng, member.lat, member.lng);
            if distance_m <= self.threshold_m {
                continue;
            }
            if self.recently_alerted(recent_alerts, &member.user_id, now) {
                continue;
            }

            let rounded = distance_m.round();
            alerts.push(Alert {
                id: None,
                kind: AlertKind::Lagging,
                user_id: member.user_id.clone(),
                name: member.display_name().to_string(),
                timestamp: now,
                message: format!(
                    "{} is {}m away from the group (limit: {}m)",
                    member.display_name(),
                    rounded as i64,
                    self.threshold_m as i64,
                ),
                distance_m: Some(rounded),
                max_distance_m: Some(self.threshold_m),
                location: Some(LatLng {
                    lat: member.lat,
                    lng: member.lng,
                }),
                acknowledged: Default::default(),
            });
        }
        alerts
    }

    fn recently_alerted(&self, recent: &[Alert], user_id: &str, now: DateTime<Utc>) -> bool {
        recent.iter().any(|a| {
            a.kind == AlertKind::Lagging && a.user_id == user_id && now - a.timestamp < self.cooldown
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn position(user_id: &str, lat: f64, lng: f64, at: DateTime<Utc>) -> Position {
        Position {
            user_id: user_id.to_string(),
            name: None,
            lat,
            lng,
            accuracy_m: 10.0,
            timestamp: at,
            battery_pct: None,
            emergency: false,
        }
    }

    fn snapshot(positions: &[Position]) -> HashMap<String, Position> {
        positions
            .iter()
            .map(|p| (p.user_id.clone(), p.clone()))
            .collect()
    }

    fn detector(threshold_m: f64) -> LagDetector {
        let mut policy = AlertPolicy::default();
        policy.lag_threshold_m = threshold_m;
        LagDetector::new(&policy)
    }

    #[test]
    fn flags_members_beyond_threshold_from_centroid() {
        // Centroid of the triangle is (0.00667, 0.00667); all three corners
        // sit more than 1000m out, so all three are flagged.
        let now = ts(0);
        let members = snapshot(&[
            position("a", 0.0, 0.0, now),
            position("b", 0.0, 0.02, now),
            position("c", 0.02, 0.0, now),
        ]);
        let own = position("a", 0.0, 0.0, now);
        let alerts = detector(1000.0).detect(&members, Some(&own), &[], now);
        assert_eq!(alerts.len(), 3);
        assert!(alerts.iter().all(|a| a.kind == AlertKind::Lagging));
    }

    #[test]
    fn flags_exactly_the_outlier() {
        // Three members clustered near the origin, one ~640m from the
        // centroid. With a 500m threshold exactly one alert is expected.
        let now = ts(0);
        let members = snapshot(&[
            position("a", 0.0, 0.0, now),
            position("b", 0.0, 0.001, now),
            position("c", 0.001, 0.001, now),
            position("d", 0.008, 0.0, now),
        ]);
        let own = position("a", 0.0, 0.0, now);
        let alerts = detector(500.0).detect(&members, Some(&own), &[], now);
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.user_id, "d");
        assert_eq!(alert.max_distance_m, Some(500.0));
        let d = alert.distance_m.unwrap();
        assert!(d > 500.0 && d < 800.0, "unexpected distance {d}");
        assert!(alert.message.contains("limit: 500m"));
    }

    #[test]
    fn cooldown_suppresses_then_expires() {
        let t0 = ts(0);
        let det = detector(500.0);
        let build = |at: DateTime<Utc>| {
            snapshot(&[
                position("a", 0.0, 0.0, at),
                position("b", 0.0, 0.001, at),
                position("c", 0.001, 0.001, at),
                position("d", 0.008, 0.0, at),
            ])
        };
        let own = position("a", 0.0, 0.0, t0);

        let first = det.detect(&build(t0), Some(&own), &[], t0);
        assert_eq!(first.len(), 1);

        // 60s later, still lagging, inside the 5-minute cooldown: suppressed.
        let t1 = ts(60);
        let again = det.detect(&build(t1), Some(&own), &first, t1);
        assert!(again.is_empty());

        // 301s later the cooldown has expired: a new alert is emitted.
        let t2 = ts(301);
        let after = det.detect(&build(t2), Some(&own), &first, t2);
        assert_eq!(after.len(), 1);
        assert_ne!(after[0].key(), first[0].key());
    }

    #[test]
    fn fewer_than_two_active_members_is_a_noop() {
        let now = ts(1_000);
        let members = snapshot(&[
            position("a", 0.0, 0.0, now),
            // Stale: outside the activity window, excluded from centroid.
            position("d", 0.008, 0.0, ts(1_000 - 301)),
        ]);
        let own = position("a", 0.0, 0.0, now);
        let alerts = detector(500.0).detect(&members, Some(&own), &[], now);
        assert!(alerts.is_empty());
    }

    #[test]
    fn requires_own_position() {
        let now = ts(0);
        let members = snapshot(&[
            position("a", 0.0, 0.0, now),
            position("d", 0.008, 0.0, now),
        ]);
        let alerts = detector(500.0).detect(&members, None, &[], now);
        assert!(alerts.is_empty());
    }

    #[test]
    fn non_positive_threshold_disables_detection() {
        let now = ts(0);
        let members = snapshot(&[
            position("a", 0.0, 0.0, now),
            position("d", 0.008, 0.0, now),
        ]);
        let own = position("a", 0.0, 0.0, now);
        let alerts = detector(0.0).detect(&members, Some(&own), &[], now);
        assert!(alerts.is_empty());
    }
}
