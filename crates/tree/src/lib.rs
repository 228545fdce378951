//! Grove Tree - content tree primitives for the versioning engine
//!
//! This crate provides the tree layer underneath version tracking:
//! - Nodes with ordered children and opaque payloads
//! - Deep clone with a freeze flag (snapshots are immutable)
//! - Structural equality ignoring node identities
//! - Ownership-counted release so aliased snapshot trees free exactly once

pub mod content;
pub mod node;
pub mod store;

// Re-export main types for convenience
pub use content::{Section, Text};
pub use node::{Content, Node, NodeId};
pub use store::{MemoryTreeStore, ReleaseOutcome, TreeStore};

/// Common result type used throughout grove-tree
pub type Result<T> = anyhow::Result<T>;
