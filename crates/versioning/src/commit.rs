//! Commit data structures

use grove_tree::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identity of a commit (ULID for timestamp + uniqueness)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CommitId(Ulid);

impl CommitId {
    /// Generate a fresh commit identity
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for CommitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of a version tracker
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TrackerId(Ulid);

impl TrackerId {
    /// Generate a fresh tracker identity
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Raw bytes, used as a store key prefix
    pub fn to_bytes(self) -> [u8; 16] {
        self.0.to_bytes()
    }
}

impl Default for TrackerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque author/approver identity; stored, never validated
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Wrap an identity token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Optional metadata attached at commit time
#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    /// Free-text message
    pub message: Option<String>,
    /// Scheduled publish time; defaults to the creation time
    pub publish_at_ms: Option<u64>,
}

/// An immutable record pairing a frozen tree snapshot with metadata
///
/// Commits form a singly linked history per tracker via `parent`;
/// the oldest commit has no parent. The parent is stored as an id,
/// never a live reference, so the chain is acyclic by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionCommit {
    /// Unique ID
    pub id: CommitId,
    /// Tracker this commit belongs to, fixed at creation
    pub tracker: TrackerId,
    /// Parent commit ID; `None` marks the oldest commit
    pub parent: Option<CommitId>,
    /// Root of the frozen snapshot tree
    pub root_node: NodeId,
    /// Author identity
    pub author: Option<UserId>,
    /// Creation timestamp (Unix milliseconds)
    pub created_at_ms: u64,
    /// Free-text message
    pub message: Option<String>,
    /// Scheduled publish time (Unix milliseconds)
    pub publish_at_ms: u64,
    /// Approver identity, if approved
    pub approved_by: Option<UserId>,
    /// Approval timestamp, if approved
    pub approved_at_ms: Option<u64>,
}

impl VersionCommit {
    /// Create a new commit record
    pub fn new(
        tracker: TrackerId,
        parent: Option<CommitId>,
        root_node: NodeId,
        author: Option<UserId>,
        opts: CommitOptions,
    ) -> Self {
        let now = now_ms();
        Self {
            id: CommitId::new(),
            tracker,
            parent,
            root_node,
            author,
            created_at_ms: now,
            message: opts.message,
            publish_at_ms: opts.publish_at_ms.unwrap_or(now),
            approved_by: None,
            approved_at_ms: None,
        }
    }

    /// Whether the scheduled publish time has passed
    ///
    /// Derived against the current clock on every read; callers must
    /// not cache this across a boundary where "now" matters.
    pub fn is_published(&self) -> bool {
        self.is_published_at(now_ms())
    }

    /// Publish check against an explicit clock reading
    pub fn is_published_at(&self, now_ms: u64) -> bool {
        self.publish_at_ms <= now_ms
    }

    /// Whether both approver and approval timestamp are set
    pub fn is_approved(&self) -> bool {
        self.approved_by.is_some() && self.approved_at_ms.is_some()
    }

    /// Record approval by `user`, stamped with the current time
    ///
    /// Re-approval overwrites both fields; only the latest values are
    /// stored. Tree state is untouched.
    pub fn approve(&mut self, user: UserId) {
        self.approved_at_ms = Some(now_ms());
        self.approved_by = Some(user);
    }

    /// Serialize commit to bytes
    pub fn serialize(&self) -> anyhow::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize commit from bytes
    pub fn deserialize(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Current wall clock in Unix milliseconds
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}
