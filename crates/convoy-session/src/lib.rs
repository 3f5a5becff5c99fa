//! Runtime session layer for the Convoy alert engine.
//!
//! Binds the pure engine in `convoy-core` to its two capabilities: a
//! realtime document store with live subscriptions and a permission-gated
//! local notifier. A [`GroupSession`] per login subscribes to the group's
//! member and alert collections, runs detection when configured to, and
//! drives notification repeats from a single ticker.

pub mod config;
pub mod notify;
pub mod session;
pub mod store;

pub use config::Config;
pub use notify::{ConsoleNotifier, Notifier, Permission, RecordingNotifier};
pub use session::{GroupSession, SessionUser};
pub use store::{paths, MemoryStore, RealtimeStore, StoreError};
