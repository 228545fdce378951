//! Version tracker orchestration
//!
//! A tracker owns one mutable working tree and a head pointer into its
//! commit chain. Committing freezes a deep clone of the working copy;
//! reverting aliases a historical snapshot across two commits and
//! re-clones it into a fresh working copy.

use crate::commit::{CommitId, CommitOptions, TrackerId, UserId, VersionCommit};
use crate::store::VersionStore;
use ahash::AHashMap;
use anyhow::{anyhow, bail, Context, Result};
use grove_tree::{NodeId, ReleaseOutcome, TreeStore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Eligibility gate for [`VersionTracker::published_node`]
///
/// The seam where collaborator policy (review queues, preview bypass)
/// plugs in; the engine never looks past this trait.
pub trait PublishPolicy {
    /// Whether a commit may be served
    fn eligible(&self, commit: &VersionCommit) -> bool;
}

/// Serve any commit whose publish time has passed
pub struct Published;

impl PublishPolicy for Published {
    fn eligible(&self, commit: &VersionCommit) -> bool {
        commit.is_published()
    }
}

/// Serve only commits that are both published and approved
pub struct Reviewed;

impl PublishPolicy for Reviewed {
    fn eligible(&self, commit: &VersionCommit) -> bool {
        commit.is_published() && commit.is_approved()
    }
}

/// A tracker: one mutable working tree plus a linear commit history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionTracker {
    /// Unique ID
    pub id: TrackerId,
    /// Newest commit; `None` means nothing has ever been committed
    pub head: Option<CommitId>,
    /// Root of the mutable working tree
    pub working_copy: NodeId,
}

impl VersionTracker {
    /// Create a tracker around an existing working tree
    pub fn create(
        store: &VersionStore,
        trees: &impl TreeStore,
        working_copy: NodeId,
    ) -> Result<Self> {
        if trees.is_frozen(working_copy)? {
            bail!("working copy {} is frozen; trackers own mutable trees", working_copy);
        }
        let tracker = Self {
            id: TrackerId::new(),
            head: None,
            working_copy,
        };
        store.save_tracker(&tracker)?;
        Ok(tracker)
    }

    /// Snapshot the working copy into a new commit and advance head
    ///
    /// The working copy itself is untouched and stays mutable; the
    /// commit owns a frozen deep clone. Always produces a commit, even
    /// when nothing changed; callers wanting to skip empty commits
    /// check [`has_changes`](Self::has_changes) first.
    pub fn commit(
        &mut self,
        store: &VersionStore,
        trees: &impl TreeStore,
        author: Option<UserId>,
        opts: CommitOptions,
    ) -> Result<VersionCommit> {
        let snapshot = trees.clone_tree(self.working_copy, true)?;
        let commit = VersionCommit::new(self.id, self.head, snapshot, author, opts);

        store.append_commit(&commit)?;
        self.head = Some(commit.id);
        store.save_tracker(self)?;

        Ok(commit)
    }

    /// Rewind to a historical commit
    ///
    /// The new head commit points at the *same* snapshot tree as
    /// `commit` (identity-shared, not cloned); the working copy is
    /// replaced with a fresh unfrozen clone of that snapshot.
    pub fn revert_to(
        &mut self,
        store: &VersionStore,
        trees: &impl TreeStore,
        commit: &VersionCommit,
        author: Option<UserId>,
        opts: CommitOptions,
    ) -> Result<VersionCommit> {
        if commit.tracker != self.id {
            bail!("commit {} belongs to another tracker", commit.id);
        }

        // The new commit becomes a second owner of the snapshot tree
        trees.retain(commit.root_node)?;
        let new_commit = VersionCommit::new(self.id, self.head, commit.root_node, author, opts);
        store.append_commit(&new_commit)?;
        self.head = Some(new_commit.id);

        let old_working_copy = self.working_copy;
        self.working_copy = trees.clone_tree(commit.root_node, false)?;
        // Persisting with the new working copy has to come before
        // releasing the old one
        store.save_tracker(self)?;

        match trees.try_release(old_working_copy)? {
            ReleaseOutcome::Released => {}
            ReleaseOutcome::Retained { remaining } => {
                bail!(
                    "old working copy {} still has {} owner(s)",
                    old_working_copy,
                    remaining
                );
            }
        }

        Ok(new_commit)
    }

    /// Discard uncommitted edits by re-cloning the head snapshot
    ///
    /// Precondition: the tracker has committed at least once.
    pub fn reset(&mut self, store: &VersionStore, trees: &impl TreeStore) -> Result<()> {
        let head = match self.head {
            Some(head) => head,
            None => bail!("reset on a tracker with no commits"),
        };
        let head_commit = store
            .get_commit(&head)?
            .with_context(|| format!("head commit {} missing from store", head))?;

        let old_working_copy = self.working_copy;
        self.working_copy = trees.clone_tree(head_commit.root_node, false)?;
        store.save_tracker(self)?;

        // A retained old tree just floats away; leaking beats
        // corrupting the store.
        if let ReleaseOutcome::Retained { remaining } = trees.try_release(old_working_copy)? {
            tracing::debug!(
                tree = %old_working_copy,
                remaining,
                "old working copy still referenced, leaving it allocated"
            );
        }

        Ok(())
    }

    /// Whether the working copy diverges from the head snapshot
    ///
    /// True when nothing has ever been committed.
    pub fn has_changes(&self, store: &VersionStore, trees: &impl TreeStore) -> Result<bool> {
        let head = match self.head {
            Some(head) => head,
            None => return Ok(true),
        };
        let head_commit = store
            .get_commit(&head)?
            .with_context(|| format!("head commit {} missing from store", head))?;

        trees.prefetch(&[self.working_copy, head_commit.root_node]);
        Ok(!trees.trees_equal(self.working_copy, head_commit.root_node)?)
    }

    /// Lazy walk over commits, newest first
    ///
    /// Restartable: each call walks from the current head again.
    pub fn history<'a>(&self, store: &'a VersionStore) -> History<'a> {
        History {
            store,
            next: self.head,
            seen: HashSet::new(),
        }
    }

    /// All commits, newest first, fetched in a single log scan
    ///
    /// Parent links are rehydrated from an in-memory index; the
    /// ordering is identical to [`history`](Self::history).
    pub fn history_list(&self, store: &VersionStore) -> Result<Vec<VersionCommit>> {
        let mut by_id: AHashMap<CommitId, VersionCommit> = store
            .commits_for_tracker(self.id)?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        let mut commits = Vec::new();
        let mut next = self.head;
        while let Some(id) = next {
            // remove() doubles as the cycle guard: revisiting an id
            // fails the lookup instead of looping
            let commit = by_id
                .remove(&id)
                .with_context(|| format!("commit {} missing from tracker history", id))?;
            next = commit.parent;
            commits.push(commit);
        }
        Ok(commits)
    }

    /// Snapshot tree of the newest commit the policy accepts
    pub fn published_node(
        &self,
        store: &VersionStore,
        policy: &impl PublishPolicy,
    ) -> Result<Option<NodeId>> {
        for commit in self.history(store) {
            let commit = commit?;
            if policy.eligible(&commit) {
                return Ok(Some(commit.root_node));
            }
        }
        Ok(None)
    }

    /// Delete the tracker, its commits, and every tree it owns
    ///
    /// Commits created by reverts may share a snapshot tree, so roots
    /// are collected into an identity set first and each distinct tree
    /// is released exactly once, after all commit records are gone.
    pub fn delete(mut self, store: &VersionStore, trees: &impl TreeStore) -> Result<()> {
        let commits = self.history_list(store)?;

        // Sever tracker -> head before deleting commit rows
        self.head = None;
        store.save_tracker(&self)?;

        let mut roots: HashSet<NodeId> = HashSet::new();
        roots.insert(self.working_copy);
        for commit in &commits {
            roots.insert(commit.root_node);
        }

        for commit in &commits {
            store.delete_commit(&commit.id)?;
        }
        store.delete_tracker(self.id)?;

        for root in roots {
            trees.thaw(root)?;
            trees.remove_tree(root)?;
        }

        Ok(())
    }
}

/// Iterator walking parent references, newest first
pub struct History<'a> {
    store: &'a VersionStore,
    next: Option<CommitId>,
    seen: HashSet<CommitId>,
}

impl<'a> History<'a> {
    /// Walk parent references starting at an arbitrary commit
    pub fn starting_at(store: &'a VersionStore, commit: CommitId) -> Self {
        Self {
            store,
            next: Some(commit),
            seen: HashSet::new(),
        }
    }
}

impl Iterator for History<'_> {
    type Item = Result<VersionCommit>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next.take()?;
        if !self.seen.insert(id) {
            return Some(Err(anyhow!("commit cycle detected at {}", id)));
        }
        match self.store.get_commit(&id) {
            Ok(Some(commit)) => {
                self.next = commit.parent;
                Some(Ok(commit))
            }
            Ok(None) => Some(Err(anyhow!("commit {} missing from store", id))),
            Err(e) => Some(Err(e)),
        }
    }
}
