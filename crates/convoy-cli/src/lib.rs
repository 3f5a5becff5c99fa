//! Simulator support for the Convoy alert engine.

pub mod walk;

pub use walk::{DriftRoute, LoopRoute, Route};
