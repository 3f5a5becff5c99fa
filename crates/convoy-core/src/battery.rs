//! Low-battery alerting with hysteresis.
//!
//! Fires a single-shot alert when a member's battery drops below the
//! trigger threshold, then stays quiet until the level recovers above the
//! re-arm threshold. The gap between the two keeps a battery hovering at
//! the boundary from producing an alert storm.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::models::{Alert, AlertKind, LatLng, Position};
use crate::policy::AlertPolicy;

#[derive(Debug, Clone)]
pub struct BatteryMonitor {
    trigger_pct: f64,
    rearm_pct: f64,
    /// Per-member arming state. Armed = eligible to fire on the next
    /// reading below the trigger.
    armed: HashMap<String, bool>,
}

impl BatteryMonitor {
    pub fn new(policy: &AlertPolicy) -> Self {
        Self::with_thresholds(policy.low_battery_trigger_pct, policy.low_battery_rearm_pct)
    }

    pub fn with_thresholds(trigger_pct: f64, rearm_pct: f64) -> Self {
        Self {
            trigger_pct,
            rearm_pct,
            armed: HashMap::new(),
        }
    }

    /// Feed the latest reading for a member. Returns an alert at most once
    /// per arm cycle; readings without a battery level are ignored.
    pub fn update(&mut self, position: &Position, now: DateTime<Utc>) -> Option<Alert> {
        let level = position.battery_pct?;
        let armed = self.armed.entry(position.user_id.clone()).or_insert(true);

        if *armed && level < self.trigger_pct {
            *armed = false;
            let name = position.display_name().to_string();
            return Some(Alert {
                id: None,
                kind: AlertKind::LowBattery,
                user_id: position.user_id.clone(),
                name: name.clone(),
                timestamp: now,
                message: format!("{name}'s battery is at {}%", level.round() as i64),
                distance_m: None,
                max_distance_m: None,
                location: Some(LatLng {
                    lat: position.lat,
                    lng: position.lng,
                }),
                acknowledged: Default::default(),
            });
        }

        if !*armed && level > self.rearm_pct {
            *armed = true;
        }
        None
    }

    /// Forget all arming state (session teardown).
    pub fn reset(&mut self) {
        self.armed.clear();
    }
}
