//! The workflow engine: drives items through conversion and description,
//! owning all writes to the workspace document.
//!
//! One dispatcher pulls pending items in discovery order and is the only
//! component that moves an item into `processing`, which together with the
//! store's transition validation enforces at-most-one-in-flight per item.
//! The `processing` marker is persisted before the provider call so a crash
//! mid-call is recoverable, never silent loss.

mod engine;
mod worker;

pub use engine::{Engine, EngineError, RunPass, RunReport};
