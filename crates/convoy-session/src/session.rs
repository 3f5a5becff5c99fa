//! Group session: wires the engine to the store and notifier.
//!
//! One `GroupSession` exists per login. It owns the alert manager, the
//! lag detector and the battery monitor, subscribes to the group's
//! member and alert collections, and runs a single ticker task that
//! drives notification repeats. `logout` tears all of it down; no timer
//! survives the session.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use tokio::task::JoinHandle;
use tokio::time::interval;

use convoy_core::{
    Alert, AlertAction, AlertKey, AlertManager, AlertPolicy, BatteryMonitor, LagDetector,
    Position,
};

use crate::notify::{title_for, Notifier, Permission};
use crate::store::{paths, RealtimeStore};

/// Identity of the logged-in member.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub user_id: String,
    pub name: String,
}

pub struct GroupSession<S: RealtimeStore, N: Notifier> {
    store: Arc<S>,
    notifier: Arc<N>,
    group_id: String,
    user: SessionUser,
    run_detection: bool,
    tick_ms: u64,
    lag_cooldown: Duration,
    detector: Mutex<LagDetector>,
    battery: Mutex<BatteryMonitor>,
    manager: Mutex<AlertManager>,
    own_position: Mutex<Option<Position>>,
    /// Active-member count from the latest snapshot; the `n` the quorum
    /// policy and the k/n counter resolve against.
    active_members: AtomicUsize,
    /// Lagging alerts this client emitted, kept for cooldown lookup
    /// between the push and the snapshot echoing it back.
    recent_emitted: Mutex<Vec<Alert>>,
    /// Store id of our own active emergency alert, if any.
    own_emergency: Mutex<Option<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<S: RealtimeStore, N: Notifier> GroupSession<S, N> {
    pub fn new(
        store: Arc<S>,
        notifier: Arc<N>,
        group_id: impl Into<String>,
        user: SessionUser,
        policy: AlertPolicy,
        run_detection: bool,
        tick_ms: u64,
    ) -> Self {
        Self {
            store,
            notifier,
            group_id: group_id.into(),
            run_detection,
            tick_ms,
            lag_cooldown: Duration::seconds(policy.lag_cooldown_secs),
            detector: Mutex::new(LagDetector::new(&policy)),
            battery: Mutex::new(BatteryMonitor::new(&policy)),
            manager: Mutex::new(AlertManager::new(user.user_id.clone(), &policy)),
            user,
            own_position: Mutex::new(None),
            active_members: AtomicUsize::new(0),
            recent_emitted: Mutex::new(Vec::new()),
            own_emergency: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the subscription and ticker loops.
    pub fn start(self: &Arc<Self>) {
        if self.notifier.permission() == Permission::Default {
            let granted = self.notifier.request_permission();
            tracing::info!(?granted, "notification permission requested");
        }

        let mut tasks = match self.tasks.lock() {
            Ok(tasks) => tasks,
            Err(_) => return,
        };

        let session = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut rx = session
                .store
                .subscribe(&paths::members(&session.group_id));
            loop {
                let snapshot = rx.borrow_and_update().clone();
                session.on_members_snapshot(snapshot, Utc::now());
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }));

        let session = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut rx = session.store.subscribe(&paths::alerts(&session.group_id));
            loop {
                let snapshot = rx.borrow_and_update().clone();
                session.on_alerts_snapshot(snapshot, Utc::now());
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }));

        let session = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut ticker = interval(StdDuration::from_millis(session.tick_ms));
            loop {
                ticker.tick().await;
                session.on_tick(Utc::now());
            }
        }));
    }

    /// Process a full snapshot of the member position collection.
    ///
    /// Recomputes the active-member count, refreshes our own position,
    /// and - when this client runs detection - checks for lagging
    /// members and broadcasts any new alerts.
    pub fn on_members_snapshot(&self, snapshot: Value, now: DateTime<Utc>) {
        let members = parse_members(snapshot);

        let active = members.values().filter(|p| p.is_active(now)).count();
        self.active_members.store(active, Ordering::SeqCst);

        if let Some(own) = members.get(&self.user.user_id) {
            if let Ok(mut slot) = self.own_position.lock() {
                *slot = Some(own.clone());
            }
        }

        if self.run_detection {
            self.detect_lagging(&members, now);
        }
    }

    fn detect_lagging(&self, members: &HashMap<String, Position>, now: DateTime<Utc>) {
        let own = match self.own_position.lock() {
            Ok(own) => own.clone(),
            Err(_) => return,
        };

        // Cooldown lookup sees both the alerts the group already knows
        // about and the ones we pushed that have not echoed back yet.
        let mut recent: Vec<Alert> = match self.manager.lock() {
            Ok(manager) => manager.tracked_alerts(),
            Err(_) => return,
        };
        if let Ok(mut emitted) = self.recent_emitted.lock() {
            emitted.retain(|a| now - a.timestamp < self.lag_cooldown);
            recent.extend(emitted.iter().cloned());
        }

        let new_alerts = match self.detector.lock() {
            Ok(detector) => detector.detect(members, own.as_ref(), &recent, now),
            Err(_) => return,
        };

        for alert in new_alerts {
            tracing::info!(user_id = %alert.user_id, distance_m = ?alert.distance_m, "lagging member detected");
            self.publish_alert(alert);
        }
    }

    /// Process a full snapshot of the alert collection.
    pub fn on_alerts_snapshot(&self, snapshot: Value, now: DateTime<Utc>) {
        let alerts = parse_alerts(snapshot);
        let active = self.active_members.load(Ordering::SeqCst);

        let actions = match self.manager.lock() {
            Ok(mut manager) => manager.sync(&alerts, active, now),
            Err(_) => return,
        };
        self.execute(actions);
    }

    /// Drive notification repeats.
    pub fn on_tick(&self, now: DateTime<Utc>) {
        let actions = match self.manager.lock() {
            Ok(mut manager) => manager.tick(now),
            Err(_) => return,
        };
        self.execute(actions);
    }

    /// Acknowledge an alert on behalf of this user. Valid from the in-app
    /// action, an OS-notification click, or an OS-notification close.
    pub fn acknowledge(&self, key: &AlertKey) {
        let actions = match self.manager.lock() {
            Ok(mut manager) => manager.acknowledge(key, Utc::now()),
            Err(_) => return,
        };
        self.execute(actions);
    }

    /// Publish this user's latest position to the group.
    pub fn publish_position(
        &self,
        lat: f64,
        lng: f64,
        accuracy_m: f64,
        battery_pct: Option<f64>,
    ) {
        let now = Utc::now();
        let emergency = self
            .own_emergency
            .lock()
            .map(|e| e.is_some())
            .unwrap_or(false);
        let position = Position {
            user_id: self.user.user_id.clone(),
            name: Some(self.user.name.clone()),
            lat,
            lng,
            accuracy_m,
            timestamp: now,
            battery_pct,
            emergency,
        };

        match serde_json::to_value(&position) {
            Ok(value) => {
                let path = paths::member(&self.group_id, &self.user.user_id);
                if let Err(err) = self.store.write(&path, value) {
                    tracing::warn!(%err, "position write failed");
                }
            }
            Err(err) => tracing::warn!(%err, "position serialization failed"),
        }

        // Low-battery detection runs on the affected user's own client.
        let battery_alert = match self.battery.lock() {
            Ok(mut battery) => battery.update(&position, now),
            Err(_) => None,
        };
        if let Some(alert) = battery_alert {
            self.publish_alert(alert);
        }

        if let Ok(mut slot) = self.own_position.lock() {
            *slot = Some(position);
        }
    }

    /// Toggle emergency mode. Activating broadcasts an emergency alert;
    /// deactivating deletes our own active emergency record, which other
    /// clients observe as resolution.
    pub fn set_emergency(&self, on: bool) {
        if on {
            let already_active = self
                .own_emergency
                .lock()
                .map(|e| e.is_some())
                .unwrap_or(true);
            if already_active {
                return;
            }
            let location = self
                .own_position
                .lock()
                .ok()
                .and_then(|p| p.clone())
                .map(|p| convoy_core::LatLng { lat: p.lat, lng: p.lng });
            let alert = Alert {
                id: None,
                kind: convoy_core::AlertKind::Emergency,
                user_id: self.user.user_id.clone(),
                name: self.user.name.clone(),
                timestamp: Utc::now(),
                message: "Emergency help needed!".to_string(),
                distance_m: None,
                max_distance_m: None,
                location,
                acknowledged: Default::default(),
            };
            if let Some(id) = self.publish_alert(alert) {
                if let Ok(mut own) = self.own_emergency.lock() {
                    *own = Some(id);
                }
            }
        } else {
            let id = match self.own_emergency.lock() {
                Ok(mut own) => own.take(),
                Err(_) => None,
            };
            if let Some(id) = id {
                let path = paths::alert(&self.group_id, &id);
                if let Err(err) = self.store.write(&path, Value::Null) {
                    tracing::warn!(%err, "emergency cancel write failed");
                }
            }
        }
    }

    /// Adjust the lag radius (admin distance controls).
    pub fn set_lag_threshold_m(&self, threshold_m: f64) {
        if let Ok(mut detector) = self.detector.lock() {
            detector.set_threshold_m(threshold_m);
        }
    }

    /// Alerts currently active for this client, oldest first.
    pub fn visible_alerts(&self) -> Vec<Alert> {
        let active = self.active_members.load(Ordering::SeqCst);
        match self.manager.lock() {
            Ok(manager) => manager
                .visible_alerts(active)
                .into_iter()
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Active-member count from the latest snapshot (the `n` in "k/n seen").
    pub fn active_member_count(&self) -> usize {
        self.active_members.load(Ordering::SeqCst)
    }

    /// Live notification loops (diagnostics and teardown checks).
    pub fn active_repeat_count(&self) -> usize {
        self.manager
            .lock()
            .map(|m| m.active_repeat_count())
            .unwrap_or(0)
    }

    /// End the session: abort every loop, clear all alert state, dismiss
    /// any outstanding platform notifications.
    pub fn logout(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        if let Ok(mut manager) = self.manager.lock() {
            manager.shutdown();
        }
        if let Ok(mut battery) = self.battery.lock() {
            battery.reset();
        }
        if let Ok(mut emitted) = self.recent_emitted.lock() {
            emitted.clear();
        }
        self.notifier.dismiss_all();
    }

    /// Push an alert to the shared collection. Returns the store id on
    /// success; failures are logged, never surfaced (fire and forget).
    fn publish_alert(&self, alert: Alert) -> Option<String> {
        let value = match serde_json::to_value(&alert) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(%err, "alert serialization failed");
                return None;
            }
        };
        match self.store.push(&paths::alerts(&self.group_id), value) {
            Ok(id) => {
                if alert.kind == convoy_core::AlertKind::Lagging {
                    if let Ok(mut emitted) = self.recent_emitted.lock() {
                        emitted.push(alert);
                    }
                }
                Some(id)
            }
            Err(err) => {
                tracing::warn!(%err, "alert push failed");
                None
            }
        }
    }

    fn execute(&self, actions: Vec<AlertAction>) {
        for action in actions {
            match action {
                AlertAction::Notify(alert) => {
                    if self.notifier.permission() == Permission::Granted {
                        self.notifier.show(title_for(alert.kind), &alert.message);
                    } else {
                        // Degrade to in-app only; state already advanced.
                        tracing::debug!(key = %alert.key(), "notification suppressed (no permission)");
                    }
                }
                AlertAction::WriteAck { alert_id, user_id } => {
                    let path = paths::ack(&self.group_id, &alert_id, &user_id);
                    let record = serde_json::json!({
                        "user_id": user_id,
                        "timestamp": Utc::now(),
                    });
                    // Optimistic: local state is already acknowledged;
                    // a failed write degrades to local-only removal.
                    if let Err(err) = self.store.write(&path, record) {
                        tracing::warn!(%err, "acknowledgment write failed; keeping local state");
                    }
                }
            }
        }
    }
}

fn parse_members(snapshot: Value) -> HashMap<String, Position> {
    let Value::Object(entries) = snapshot else {
        return HashMap::new();
    };
    let mut members = HashMap::new();
    for (user_id, raw) in entries {
        match serde_json::from_value::<Position>(raw) {
            Ok(mut position) => {
                if position.user_id.is_empty() {
                    position.user_id = user_id.clone();
                }
                members.insert(user_id, position);
            }
            Err(err) => {
                tracing::warn!(%user_id, %err, "skipping malformed member record");
            }
        }
    }
    members
}

fn parse_alerts(snapshot: Value) -> Vec<Alert> {
    let Value::Object(entries) = snapshot else {
        return Vec::new();
    };
    let mut alerts = Vec::new();
    for (alert_id, raw) in entries {
        match serde_json::from_value::<Alert>(raw) {
            Ok(mut alert) => {
                alert.id = Some(alert_id);
                alerts.push(alert);
            }
            Err(err) => {
                tracing::warn!(%alert_id, %err, "skipping malformed alert record");
            }
        }
    }
    alerts
}
