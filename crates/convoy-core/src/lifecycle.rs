//! Alert lifecycle: notification repeats, acknowledgment, resolution.
//!
//! One [`AlertManager`] exists per login session. It consumes full
//! snapshots of the shared alert collection (the subscription delivers the
//! whole value on every change, never a diff), diffs them against its own
//! tracked state, and hands explicit [`AlertAction`]s back to the caller.
//! All I/O - showing notifications, writing acknowledgments - belongs to
//! the caller; the manager stays synchronous and deterministic.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::models::{Alert, AlertKey, AlertKind};
use crate::policy::{AlertPolicy, ResolutionPolicy};

/// Local processing state for one alert key.
///
/// `Acknowledged` and `Resolved` are terminal: re-delivery of a key in
/// either state never restarts its notification loop. A new occurrence of
/// the same condition gets a new key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertStatus {
    /// A repeating local notification loop is active for this key.
    Notifying,
    /// Observed but never notified locally: self-originated, or already
    /// acknowledged by this client when first seen.
    Silenced,
    /// This client acknowledged the alert.
    Acknowledged,
    /// The record disappeared from the remote set (owner cancelled).
    Resolved,
}

impl AlertStatus {
    fn is_terminal(self) -> bool {
        matches!(self, AlertStatus::Acknowledged | AlertStatus::Resolved)
    }
}

/// Side effect requested by the manager. The caller owns all I/O.
#[derive(Debug, Clone)]
pub enum AlertAction {
    /// Show a local notification for this alert. Permission denial at the
    /// notification capability is a no-op, not a failure.
    Notify(Alert),
    /// Record this client's acknowledgment in the shared store.
    WriteAck { alert_id: String, user_id: String },
}

#[derive(Debug, Clone)]
struct RepeatState {
    every: Duration,
    next_fire: DateTime<Utc>,
}

/// Per-session alert state machine.
pub struct AlertManager {
    self_id: String,
    resolution: ResolutionPolicy,
    emergency_repeat: Duration,
    lagging_repeat: Duration,
    statuses: HashMap<AlertKey, AlertStatus>,
    repeats: HashMap<AlertKey, RepeatState>,
    /// Latest observed copy per tracked key, ordered for stable display.
    alerts: BTreeMap<AlertKey, Alert>,
}

impl AlertManager {
    pub fn new(self_id: impl Into<String>, policy: &AlertPolicy) -> Self {
        Self {
            self_id: self_id.into(),
            resolution: policy.resolution,
            emergency_repeat: Duration::seconds(policy.emergency_repeat_secs),
            lagging_repeat: Duration::seconds(policy.lagging_repeat_secs),
            statuses: HashMap::new(),
            repeats: HashMap::new(),
            alerts: BTreeMap::new(),
        }
    }

    pub fn resolution(&self) -> ResolutionPolicy {
        self.resolution
    }

    /// Process a full snapshot of the shared alert collection.
    ///
    /// `active_members` is the current count of active group members,
    /// the `n` the quorum policy resolves against. Idempotent: feeding
    /// the same snapshot twice produces no duplicate notification loops.
    pub fn sync(
        &mut self,
        snapshot: &[Alert],
        active_members: usize,
        now: DateTime<Utc>,
    ) -> Vec<AlertAction> {
        let mut actions = Vec::new();

        let incoming: HashSet<AlertKey> = snapshot.iter().map(|a| a.key()).collect();

        // Keys we were tracking that vanished from the remote set: the
        // owner cancelled the condition. Tear the loop down immediately,
        // acknowledged or not.
        let gone: Vec<AlertKey> = self
            .statuses
            .keys()
            .filter(|key| !incoming.contains(key))
            .cloned()
            .collect();
        for key in gone {
            self.repeats.remove(&key);
            self.alerts.remove(&key);
            self.statuses.insert(key, AlertStatus::Resolved);
        }

        for alert in snapshot {
            let key = alert.key();

            match self.statuses.get(&key).copied() {
                Some(AlertStatus::Resolved) => continue,
                Some(AlertStatus::Acknowledged) => {
                    // Terminal for notifications, but under the quorum
                    // policy the record stays on display with its k/n
                    // counter until the rest of the group catches up.
                    if self.resolution == ResolutionPolicy::Quorum
                        && self.alerts.contains_key(&key)
                    {
                        if self.resolution_satisfied(alert, active_members) {
                            self.alerts.remove(&key);
                        } else {
                            self.alerts.insert(key.clone(), alert.clone());
                        }
                    }
                    continue;
                }
                Some(_) => {
                    // Ack map may have grown remotely.
                    self.alerts.insert(key.clone(), alert.clone());
                    if self.resolution_satisfied(alert, active_members) {
                        self.repeats.remove(&key);
                        self.alerts.remove(&key);
                        self.statuses.insert(key, AlertStatus::Acknowledged);
                    }
                    continue;
                }
                None => {}
            }

            // First observation of this key.
            self.alerts.insert(key.clone(), alert.clone());

            if self.resolution_satisfied(alert, active_members) {
                self.alerts.remove(&key);
                self.statuses.insert(key, AlertStatus::Acknowledged);
                continue;
            }
            if alert.user_id == self.self_id || alert.is_acknowledged_by(&self.self_id) {
                // Never notify for our own alert; stay visible in-app.
                self.statuses.insert(key, AlertStatus::Silenced);
                continue;
            }

            // UNSEEN -> NOTIFYING: first notification fires immediately,
            // then on the kind's interval until acknowledged or resolved.
            self.statuses.insert(key.clone(), AlertStatus::Notifying);
            if let Some(every) = self.repeat_interval(alert.kind) {
                self.repeats.insert(
                    key,
                    RepeatState {
                        every,
                        next_fire: now + every,
                    },
                );
            }
            actions.push(AlertAction::Notify(alert.clone()));
        }

        actions
    }

    /// Fire any repeats that have come due.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<AlertAction> {
        let mut actions = Vec::new();
        for (key, repeat) in self.repeats.iter_mut() {
            if repeat.next_fire > now {
                continue;
            }
            if self.statuses.get(key) != Some(&AlertStatus::Notifying) {
                continue;
            }
            if let Some(alert) = self.alerts.get(key) {
                actions.push(AlertAction::Notify(alert.clone()));
            }
            repeat.next_fire = now + repeat.every;
        }
        actions
    }

    /// Acknowledge an alert on behalf of this client.
    ///
    /// Valid from any acknowledgment trigger: the in-app action, clicking
    /// the OS notification, or closing it. Local state updates
    /// optimistically; the returned `WriteAck` is fire-and-forget.
    pub fn acknowledge(&mut self, key: &AlertKey, now: DateTime<Utc>) -> Vec<AlertAction> {
        match self.statuses.get(key).copied() {
            Some(status) if !status.is_terminal() => {}
            _ => return Vec::new(),
        }

        self.repeats.remove(key);
        self.statuses.insert(key.clone(), AlertStatus::Acknowledged);

        let mut actions = Vec::new();
        if let Some(alert) = self.alerts.get_mut(key) {
            alert.acknowledge_local(&self.self_id, now);
            if let Some(alert_id) = alert.id.clone() {
                actions.push(AlertAction::WriteAck {
                    alert_id,
                    user_id: self.self_id.clone(),
                });
            }
            if self.resolution == ResolutionPolicy::PerViewer {
                self.alerts.remove(key);
            }
        }
        actions
    }

    /// Alerts still active for this client under the resolution policy,
    /// oldest first. The `k/n seen` counter comes from
    /// [`Alert::ack_count`] against the caller's member count.
    pub fn visible_alerts(&self, active_members: usize) -> Vec<&Alert> {
        let mut visible: Vec<&Alert> = self
            .alerts
            .iter()
            .filter(|(key, alert)| match self.statuses.get(key) {
                None | Some(AlertStatus::Resolved) => false,
                // Under quorum an acknowledged alert stays on display
                // (with its counter) until the whole group has seen it.
                Some(AlertStatus::Acknowledged) => {
                    self.resolution == ResolutionPolicy::Quorum
                        && !self.resolution_satisfied(alert, active_members)
                }
                Some(_) => !self.resolution_satisfied(alert, active_members),
            })
            .map(|(_, alert)| alert)
            .collect();
        visible.sort_by_key(|a| a.timestamp);
        visible
    }

    pub fn status(&self, key: &AlertKey) -> Option<AlertStatus> {
        self.statuses.get(key).copied()
    }

    /// Every alert this manager currently tracks, regardless of status.
    /// Detection feeds these back in as the cooldown history.
    pub fn tracked_alerts(&self) -> Vec<Alert> {
        self.alerts.values().cloned().collect()
    }

    /// Number of live notification loops. At most one exists per key.
    pub fn active_repeat_count(&self) -> usize {
        self.repeats.len()
    }

    /// Tear down everything: every repeat loop, the dedup set, all
    /// tracked alerts. Called on logout and session end; a loop that
    /// survives this is a phantom-notification bug.
    pub fn shutdown(&mut self) {
        self.repeats.clear();
        self.statuses.clear();
        self.alerts.clear();
    }

    fn repeat_interval(&self, kind: AlertKind) -> Option<Duration> {
        match kind {
            AlertKind::Emergency => Some(self.emergency_repeat),
            AlertKind::Lagging => Some(self.lagging_repeat),
            // Single-shot by design; re-arming is the battery monitor's job.
            AlertKind::LowBattery => None,
        }
    }

    fn resolution_satisfied(&self, alert: &Alert, active_members: usize) -> bool {
        match self.resolution {
            ResolutionPolicy::PerViewer => alert.is_acknowledged_by(&self.self_id),
            ResolutionPolicy::Quorum => {
                active_members > 0 && alert.ack_count() >= active_members
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LatLng;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn alert(kind: AlertKind, user_id: &str, at: DateTime<Utc>) -> Alert {
        Alert {
            id: Some(format!("rec-{user_id}-{}", at.timestamp())),
            kind,
            user_id: user_id.to_string(),
            name: user_id.to_uppercase(),
            timestamp: at,
            message: "test alert".to_string(),
            distance_m: None,
            max_distance_m: None,
            location: Some(LatLng { lat: 0.0, lng: 0.0 }),
            acknowledged: Default::default(),
        }
    }

    fn manager(resolution: ResolutionPolicy) -> AlertManager {
        let mut policy = AlertPolicy::default();
        policy.resolution = resolution;
        AlertManager::new("me", &policy)
    }

    #[test]
    fn duplicate_snapshot_delivery_starts_one_loop() {
        let mut mgr = manager(ResolutionPolicy::PerViewer);
        let a = alert(AlertKind::Emergency, "u1", ts(0));

        let first = mgr.sync(&[a.clone()], 3, ts(0));
        assert_eq!(first.len(), 1);
        assert_eq!(mgr.active_repeat_count(), 1);

        // Same snapshot re-delivered by a second store callback.
        let second = mgr.sync(&[a], 3, ts(1));
        assert!(second.is_empty());
        assert_eq!(mgr.active_repeat_count(), 1);
    }

    #[test]
    fn first_notification_fires_immediately_then_repeats() {
        let mut mgr = manager(ResolutionPolicy::PerViewer);
        let a = alert(AlertKind::Emergency, "u1", ts(0));

        let actions = mgr.sync(&[a], 3, ts(0));
        assert!(matches!(actions.as_slice(), [AlertAction::Notify(_)]));

        // Emergency repeats on a 3s interval.
        assert!(mgr.tick(ts(2)).is_empty());
        assert_eq!(mgr.tick(ts(3)).len(), 1);
        assert!(mgr.tick(ts(4)).is_empty());
        assert_eq!(mgr.tick(ts(6)).len(), 1);
    }

    #[test]
    fn lagging_repeats_slower_than_emergency() {
        let mut mgr = manager(ResolutionPolicy::PerViewer);
        mgr.sync(&[alert(AlertKind::Lagging, "u1", ts(0))], 3, ts(0));

        assert!(mgr.tick(ts(9)).is_empty());
        assert_eq!(mgr.tick(ts(10)).len(), 1);
    }

    #[test]
    fn low_battery_is_single_shot() {
        let mut mgr = manager(ResolutionPolicy::PerViewer);
        let actions = mgr.sync(&[alert(AlertKind::LowBattery, "u1", ts(0))], 3, ts(0));
        assert_eq!(actions.len(), 1);
        assert_eq!(mgr.active_repeat_count(), 0);
        assert!(mgr.tick(ts(60)).is_empty());
    }

    #[test]
    fn acknowledge_tears_down_and_writes_back() {
        let mut mgr = manager(ResolutionPolicy::PerViewer);
        let a = alert(AlertKind::Emergency, "u1", ts(0));
        let key = a.key();
        mgr.sync(&[a.clone()], 3, ts(0));

        let actions = mgr.acknowledge(&key, ts(5));
        assert!(matches!(
            actions.as_slice(),
            [AlertAction::WriteAck { user_id, .. }] if user_id == "me"
        ));
        assert_eq!(mgr.active_repeat_count(), 0);
        assert_eq!(mgr.status(&key), Some(AlertStatus::Acknowledged));
        assert!(mgr.visible_alerts(3).is_empty());

        // Re-delivery of the acknowledged key must not restart the loop.
        let replay = mgr.sync(&[a], 3, ts(6));
        assert!(replay.is_empty());
        assert_eq!(mgr.active_repeat_count(), 0);
        assert!(mgr.tick(ts(30)).is_empty());
    }

    #[test]
    fn quorum_keeps_alert_until_all_active_members_acknowledge() {
        let mut mgr = manager(ResolutionPolicy::Quorum);
        let mut a = alert(AlertKind::Emergency, "u1", ts(0));
        a.acknowledge_local("a", ts(1));

        // One of three acknowledged: still active.
        mgr.sync(&[a.clone()], 3, ts(1));
        assert_eq!(mgr.visible_alerts(3).len(), 1);
        assert_eq!(mgr.visible_alerts(3)[0].ack_count(), 1);

        // All three acknowledged: gone for everyone.
        a.acknowledge_local("b", ts(2));
        a.acknowledge_local("c", ts(3));
        mgr.sync(&[a], 3, ts(3));
        assert!(mgr.visible_alerts(3).is_empty());
        assert_eq!(mgr.active_repeat_count(), 0);
    }

    #[test]
    fn per_viewer_dismisses_independently() {
        let mut mgr = manager(ResolutionPolicy::PerViewer);
        let mut a = alert(AlertKind::Lagging, "u1", ts(0));
        // Everyone else has seen it; this client has not.
        a.acknowledge_local("a", ts(1));
        a.acknowledge_local("b", ts(1));

        let actions = mgr.sync(&[a.clone()], 3, ts(1));
        assert_eq!(actions.len(), 1);
        assert_eq!(mgr.visible_alerts(3).len(), 1);

        // Once acknowledged by this client it leaves this client's view.
        mgr.acknowledge(&a.key(), ts(2));
        assert!(mgr.visible_alerts(3).is_empty());
    }

    #[test]
    fn self_originated_alert_never_notifies_locally() {
        let mut mgr = manager(ResolutionPolicy::PerViewer);
        let a = alert(AlertKind::Emergency, "me", ts(0));
        let key = a.key();

        let actions = mgr.sync(&[a], 3, ts(0));
        assert!(actions.is_empty());
        assert_eq!(mgr.status(&key), Some(AlertStatus::Silenced));
        // Still shown in-app.
        assert_eq!(mgr.visible_alerts(3).len(), 1);
    }

    #[test]
    fn already_acknowledged_on_first_sight_is_silent() {
        let mut mgr = manager(ResolutionPolicy::Quorum);
        let mut a = alert(AlertKind::Emergency, "u1", ts(0));
        a.acknowledge_local("me", ts(1));

        let actions = mgr.sync(&[a.clone()], 3, ts(1));
        assert!(actions.is_empty());
        assert_eq!(mgr.status(&a.key()), Some(AlertStatus::Silenced));
    }

    #[test]
    fn disappearance_resolves_and_stops_the_loop() {
        let mut mgr = manager(ResolutionPolicy::PerViewer);
        let a = alert(AlertKind::Emergency, "u1", ts(0));
        let key = a.key();
        mgr.sync(&[a], 3, ts(0));
        assert_eq!(mgr.active_repeat_count(), 1);

        // Owner cancelled; the record vanished from the remote set.
        mgr.sync(&[], 3, ts(5));
        assert_eq!(mgr.status(&key), Some(AlertStatus::Resolved));
        assert_eq!(mgr.active_repeat_count(), 0);
        assert!(mgr.tick(ts(30)).is_empty());
    }

    #[test]
    fn shutdown_leaves_no_live_loops() {
        let mut mgr = manager(ResolutionPolicy::PerViewer);
        mgr.sync(
            &[
                alert(AlertKind::Emergency, "u1", ts(0)),
                alert(AlertKind::Lagging, "u2", ts(0)),
            ],
            3,
            ts(0),
        );
        assert_eq!(mgr.active_repeat_count(), 2);

        mgr.shutdown();
        assert_eq!(mgr.active_repeat_count(), 0);
        assert!(mgr.tick(ts(60)).is_empty());
        assert!(mgr.visible_alerts(3).is_empty());
    }

    #[test]
    fn alert_without_store_id_acknowledges_locally_only() {
        let mut mgr = manager(ResolutionPolicy::PerViewer);
        let mut a = alert(AlertKind::Lagging, "u1", ts(0));
        a.id = None;
        let key = a.key();
        mgr.sync(&[a], 3, ts(0));

        // No id to write back against; local teardown still happens.
        let actions = mgr.acknowledge(&key, ts(1));
        assert!(actions.is_empty());
        assert_eq!(mgr.active_repeat_count(), 0);
    }
}
