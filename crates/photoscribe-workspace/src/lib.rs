//! photoscribe-workspace: the persisted workspace document and its
//! single-writer store.
//!
//! The document is the system of record for resumability: schema-versioned
//! JSON, items in discovery order, description attempts retained
//! permanently, unknown fields preserved across software upgrades.

mod document;
mod store;

pub use document::{DocumentSummary, SCHEMA_VERSION, WorkspaceDocument};
pub use store::{MergeReport, WorkspaceError, WorkspaceStore, read_document};
