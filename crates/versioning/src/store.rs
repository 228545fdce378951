//! Sled-backed store for commits, trackers, and referrer edges
//!
//! Commits live in an append-only log keyed by a monotonic sequence
//! number, with an in-memory id index rebuilt on open. Tracker records
//! and external referrer edges sit in sibling keyspaces of the same
//! database.

use crate::commit::{CommitId, TrackerId, VersionCommit};
use crate::tracker::VersionTracker;
use anyhow::{bail, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Store configuration, passed explicitly at construction rather than
/// read from ambient global state
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Flush the database after every write (durability over throughput)
    pub flush_on_write: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            flush_on_write: true,
        }
    }
}

/// Backing store for the versioning engine
pub struct VersionStore {
    db: sled::Db,
    /// Append-only commit log: sequence number -> commit
    commits: sled::Tree,
    /// Tracker records: tracker id -> record
    trackers: sled::Tree,
    /// External referrer edges: tracker id ++ label -> ()
    referrers: sled::Tree,
    /// In-memory index: commit id -> sequence number
    index: RwLock<BTreeMap<CommitId, u64>>,
    /// Monotonic sequence counter
    seq_counter: AtomicU64,
    config: StoreConfig,
}

impl VersionStore {
    /// Open or create a store at the given path
    pub fn open(path: &Path, config: StoreConfig) -> Result<Self> {
        let db = sled::open(path.join("versions.db"))?;
        let commits = db.open_tree("commits")?;
        let trackers = db.open_tree("trackers")?;
        let referrers = db.open_tree("referrers")?;

        // Rebuild the commit index on startup
        let mut index = BTreeMap::new();
        let mut max_seq = 0u64;
        for item in commits.iter() {
            let (key, value) = item?;
            let seq = u64::from_le_bytes(key.as_ref().try_into()?);
            let commit = VersionCommit::deserialize(&value)?;
            index.insert(commit.id, seq);
            max_seq = max_seq.max(seq);
        }

        tracing::info!(commits = index.len(), "version store opened");

        Ok(Self {
            db,
            commits,
            trackers,
            referrers,
            index: RwLock::new(index),
            seq_counter: AtomicU64::new(max_seq + 1),
            config,
        })
    }

    /// Append a commit to the log
    pub fn append_commit(&self, commit: &VersionCommit) -> Result<u64> {
        let seq = self.seq_counter.fetch_add(1, Ordering::SeqCst);
        let key = seq.to_le_bytes();
        let value = commit.serialize()?;

        self.commits.insert(key, value)?;
        self.index.write().insert(commit.id, seq);
        self.maybe_flush()?;

        Ok(seq)
    }

    /// Rewrite an existing commit record in place
    ///
    /// Only approval metadata ever changes after creation; the commit
    /// keeps its sequence position.
    pub fn update_commit(&self, commit: &VersionCommit) -> Result<()> {
        let seq = match self.index.read().get(&commit.id) {
            Some(&seq) => seq,
            None => bail!("commit {} not in store", commit.id),
        };

        self.commits.insert(seq.to_le_bytes(), commit.serialize()?)?;
        self.maybe_flush()?;
        Ok(())
    }

    /// Get a commit by ID
    pub fn get_commit(&self, id: &CommitId) -> Result<Option<VersionCommit>> {
        let seq = match self.index.read().get(id) {
            Some(&seq) => seq,
            None => return Ok(None),
        };

        let value = match self.commits.get(seq.to_le_bytes())? {
            Some(v) => v,
            None => return Ok(None),
        };

        Ok(Some(VersionCommit::deserialize(&value)?))
    }

    /// All commits belonging to a tracker, in one log scan
    pub fn commits_for_tracker(&self, tracker: TrackerId) -> Result<Vec<VersionCommit>> {
        let mut commits = Vec::new();
        for item in self.commits.iter() {
            let (_, value) = item?;
            let commit = VersionCommit::deserialize(&value)?;
            if commit.tracker == tracker {
                commits.push(commit);
            }
        }
        Ok(commits)
    }

    /// Delete a commit record (idempotent)
    pub fn delete_commit(&self, id: &CommitId) -> Result<()> {
        let seq = match self.index.write().remove(id) {
            Some(seq) => seq,
            None => return Ok(()), // Already deleted
        };

        self.commits.remove(seq.to_le_bytes())?;
        self.maybe_flush()?;
        Ok(())
    }

    /// Total number of commits in the log
    pub fn commit_count(&self) -> usize {
        self.index.read().len()
    }

    /// Persist a tracker record
    pub fn save_tracker(&self, tracker: &VersionTracker) -> Result<()> {
        let value = bincode::serialize(tracker)?;
        self.trackers.insert(tracker.id.to_bytes(), value)?;
        self.maybe_flush()?;
        Ok(())
    }

    /// Load a tracker record by ID
    pub fn load_tracker(&self, id: TrackerId) -> Result<Option<VersionTracker>> {
        match self.trackers.get(id.to_bytes())? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Delete a tracker record and its referrer edges
    pub fn delete_tracker(&self, id: TrackerId) -> Result<()> {
        self.trackers.remove(id.to_bytes())?;
        for item in self.referrers.scan_prefix(id.to_bytes()) {
            let (key, _) = item?;
            self.referrers.remove(key)?;
        }
        self.maybe_flush()?;
        Ok(())
    }

    /// All tracker records
    pub fn all_trackers(&self) -> Result<Vec<VersionTracker>> {
        let mut trackers = Vec::new();
        for item in self.trackers.iter() {
            let (_, value) = item?;
            trackers.push(bincode::deserialize(&value)?);
        }
        Ok(trackers)
    }

    /// Register an external referrer edge on a tracker
    ///
    /// Collaborators (pages, review queues) register a label while they
    /// point at the tracker; commit rows never count, they are the
    /// internal history relation.
    pub fn add_referrer(&self, tracker: TrackerId, label: &str) -> Result<()> {
        self.referrers
            .insert(Self::referrer_key(tracker, label), Vec::new())?;
        self.maybe_flush()?;
        Ok(())
    }

    /// Remove an external referrer edge (idempotent)
    pub fn remove_referrer(&self, tracker: TrackerId, label: &str) -> Result<()> {
        self.referrers.remove(Self::referrer_key(tracker, label))?;
        self.maybe_flush()?;
        Ok(())
    }

    /// Whether any external referrer points at the tracker
    pub fn has_referrers(&self, tracker: TrackerId) -> Result<bool> {
        match self.referrers.scan_prefix(tracker.to_bytes()).next() {
            Some(item) => {
                item?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Trackers with no live external referrer
    ///
    /// A read-only query used by undelete flows: a tracker whose owning
    /// entity was deleted is still recoverable through its commits.
    pub fn orphan_trackers(&self) -> Result<Vec<VersionTracker>> {
        let mut orphans = Vec::new();
        for tracker in self.all_trackers()? {
            if !self.has_referrers(tracker.id)? {
                orphans.push(tracker);
            }
        }
        Ok(orphans)
    }

    /// Flush the database to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn maybe_flush(&self) -> Result<()> {
        if self.config.flush_on_write {
            self.db.flush()?;
        }
        Ok(())
    }

    fn referrer_key(tracker: TrackerId, label: &str) -> Vec<u8> {
        let mut key = tracker.to_bytes().to_vec();
        key.extend_from_slice(label.as_bytes());
        key
    }
}
