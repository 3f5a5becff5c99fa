//! Local notification capability (permission-gated).
//!
//! Permission denial is never an error: the session transitions alert
//! state as if notified and the alert stays in the in-app list, so
//! acknowledgment remains possible without OS notifications.

use convoy_core::AlertKind;
use std::sync::Mutex;

/// Platform notification permission, as reported by the capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
    /// Not yet decided; the session asks once at startup.
    Default,
}

pub trait Notifier: Send + Sync + 'static {
    fn permission(&self) -> Permission;

    /// Ask the platform for permission. Implementations that cannot
    /// prompt just report their current state.
    fn request_permission(&self) -> Permission {
        self.permission()
    }

    fn show(&self, title: &str, body: &str);

    /// Tear down any outstanding platform notifications (logout).
    fn dismiss_all(&self) {}
}

/// Notification title per alert class.
pub fn title_for(kind: AlertKind) -> &'static str {
    match kind {
        AlertKind::Lagging => "Member Lagging Behind",
        AlertKind::Emergency => "Emergency Alert!",
        AlertKind::LowBattery => "Low Battery",
    }
}

/// Logs notifications through tracing. Used by the simulator and any
/// headless deployment.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn permission(&self) -> Permission {
        Permission::Granted
    }

    fn show(&self, title: &str, body: &str) {
        tracing::info!(title, body, "notification");
    }
}

/// Records shown notifications in memory. Test double; also useful for
/// asserting on notification traffic in integration harnesses.
pub struct RecordingNotifier {
    permission: Permission,
    shown: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn granted() -> Self {
        Self::with_permission(Permission::Granted)
    }

    pub fn with_permission(permission: Permission) -> Self {
        Self {
            permission,
            shown: Mutex::new(Vec::new()),
        }
    }

    pub fn shown(&self) -> Vec<(String, String)> {
        self.shown.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn shown_count(&self) -> usize {
        self.shown.lock().map(|s| s.len()).unwrap_or(0)
    }
}

impl Notifier for RecordingNotifier {
    fn permission(&self) -> Permission {
        self.permission
    }

    fn show(&self, title: &str, body: &str) {
        if let Ok(mut shown) = self.shown.lock() {
            shown.push((title.to_string(), body.to_string()));
        }
    }
}
