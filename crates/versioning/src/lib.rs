//! Grove Versioning - linear content versioning over opaque trees
//!
//! This crate provides:
//! - Commit records (ULID-based IDs, singly linked parent chains)
//! - A sled-backed append-only commit log with an in-memory index
//! - Tracker orchestration: commit, revert, reset, change detection
//! - Publish policies and the orphan-tracker query

pub mod commit;
pub mod store;
pub mod tracker;

// Re-exports
pub use commit::{now_ms, CommitId, CommitOptions, TrackerId, UserId, VersionCommit};
pub use store::{StoreConfig, VersionStore};
pub use tracker::{History, PublishPolicy, Published, Reviewed, VersionTracker};

/// Result type for versioning operations
pub type Result<T> = anyhow::Result<T>;
