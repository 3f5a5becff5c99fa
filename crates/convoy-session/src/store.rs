//! Realtime store boundary and an in-memory implementation.
//!
//! The engine's only external data dependency is a key-value/document
//! tree with live subscriptions. Subscriptions deliver the full current
//! value at a path on every change, never a diff; writing JSON `null` at
//! a path deletes the node. [`MemoryStore`] implements the same contract
//! in-process for tests and the simulator.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::RwLock;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store rejected write at {path}: {reason}")]
    WriteFailed { path: String, reason: String },
}

/// The external realtime-store capability.
///
/// Writes are fire-and-forget from the caller's perspective: a failed
/// write is logged and the local optimistic state stands.
pub trait RealtimeStore: Send + Sync + 'static {
    /// Upsert the value at `path`. A `null` value deletes the node.
    fn write(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Append `value` under `path` with a generated id; returns the id.
    fn push(&self, path: &str, value: Value) -> Result<String, StoreError>;

    /// One-shot read of the value at `path` (`null` when absent).
    fn read(&self, path: &str) -> Value;

    /// Live subscription to `path`. The receiver holds the full current
    /// value and is updated with the full value on every change.
    fn subscribe(&self, path: &str) -> watch::Receiver<Value>;
}

/// Store paths used by the engine.
pub mod paths {
    /// Per-group member position collection.
    pub fn members(group_id: &str) -> String {
        format!("groups/{group_id}/members")
    }

    pub fn member(group_id: &str, user_id: &str) -> String {
        format!("groups/{group_id}/members/{user_id}")
    }

    /// Per-group alert collection, keyed by store-generated id.
    pub fn alerts(group_id: &str) -> String {
        format!("groups/{group_id}/alerts")
    }

    pub fn alert(group_id: &str, alert_id: &str) -> String {
        format!("groups/{group_id}/alerts/{alert_id}")
    }

    /// Acknowledgment sub-map entry nested under an alert.
    pub fn ack(group_id: &str, alert_id: &str, user_id: &str) -> String {
        format!("groups/{group_id}/alerts/{alert_id}/acknowledged/{user_id}")
    }
}

/// In-memory realtime store: a JSON tree plus per-path watchers.
///
/// Watcher fan-out recomputes the value at every subscribed path after
/// each mutation; group-sized trees make that cheap.
pub struct MemoryStore {
    tree: RwLock<Value>,
    watchers: DashMap<String, watch::Sender<Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(Value::Null),
            watchers: DashMap::new(),
        }
    }

    fn value_at(tree: &Value, path: &str) -> Value {
        let mut node = tree;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            match node.get(segment) {
                Some(child) => node = child,
                None => return Value::Null,
            }
        }
        node.clone()
    }

    fn set_at(tree: &mut Value, path: &str, value: Value) {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            *tree = value;
            return;
        }

        let mut node = tree;
        for segment in &segments[..segments.len() - 1] {
            if !node.is_object() {
                *node = Value::Object(Default::default());
            }
            let Some(map) = node.as_object_mut() else {
                return;
            };
            node = map.entry(segment.to_string()).or_insert(Value::Null);
        }

        if !node.is_object() {
            *node = Value::Object(Default::default());
        }
        let Some(map) = node.as_object_mut() else {
            return;
        };
        let leaf = segments[segments.len() - 1];
        if value.is_null() {
            map.remove(leaf);
        } else {
            map.insert(leaf.to_string(), value);
        }
    }

    fn notify_watchers(&self, tree: &Value) {
        for entry in self.watchers.iter() {
            let current = Self::value_at(tree, entry.key());
            // send_replace never fails; receivers may be gone, which is fine.
            entry.value().send_replace(current);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeStore for MemoryStore {
    fn write(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let mut tree = self.tree.write().map_err(|_| StoreError::WriteFailed {
            path: path.to_string(),
            reason: "store lock poisoned".to_string(),
        })?;
        Self::set_at(&mut tree, path, value);
        self.notify_watchers(&tree);
        Ok(())
    }

    fn push(&self, path: &str, value: Value) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.write(&format!("{path}/{id}"), value)?;
        Ok(id)
    }

    fn read(&self, path: &str) -> Value {
        match self.tree.read() {
            Ok(tree) => Self::value_at(&tree, path),
            Err(_) => Value::Null,
        }
    }

    fn subscribe(&self, path: &str) -> watch::Receiver<Value> {
        // Clone the sender out so the watcher shard lock is released
        // before the tree lock is taken; write() nests them the other
        // way around.
        let sender = self
            .watchers
            .entry(path.to_string())
            .or_insert_with(|| watch::channel(Value::Null).0)
            .clone();
        let receiver = sender.subscribe();
        if let Ok(tree) = self.tree.read() {
            sender.send_replace(Self::value_at(&tree, path));
        }
        receiver
    }
}
