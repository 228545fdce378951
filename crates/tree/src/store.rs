//! In-memory node arena with ownership-counted tree release
//!
//! All nodes of all trees live in one arena so that a commit and a
//! former working copy can alias the same frozen tree. Each tree root
//! carries an owners count; a tree is only freed when its last owner
//! releases it.

use crate::node::{Content, Node, NodeId};
use ahash::AHashMap;
use anyhow::{bail, Result};
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome of releasing one ownership reference on a tree root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The last reference was dropped and the tree was freed
    Released,
    /// Other owners remain; nothing was freed
    Retained {
        /// Owners still holding the tree
        remaining: usize,
    },
}

/// Contract the versioning engine depends on
///
/// Any backing store satisfying this trait can sit under a tracker;
/// [`MemoryTreeStore`] is the reference implementation.
pub trait TreeStore {
    /// Deep-copy a tree: fresh identities, preserved child order,
    /// every node's frozen flag set to `freeze`. The source tree is
    /// left untouched.
    fn clone_tree(&self, root: NodeId, freeze: bool) -> Result<NodeId>;

    /// Shape- and payload-based equality, ignoring identities and
    /// frozen flags
    fn trees_equal(&self, a: NodeId, b: NodeId) -> Result<bool>;

    /// Batching hint: eagerly load a set of trees before repeated
    /// per-node reads. Purely a performance contract.
    fn prefetch(&self, roots: &[NodeId]);

    /// Whether a tree root is frozen
    fn is_frozen(&self, root: NodeId) -> Result<bool>;

    /// Add one owner to a tree root
    fn retain(&self, root: NodeId) -> Result<()>;

    /// Drop one owner; frees the tree when the count reaches zero.
    /// Refuses frozen roots, which must be thawed first.
    fn try_release(&self, root: NodeId) -> Result<ReleaseOutcome>;

    /// Clear the frozen flag on every node of the tree
    fn thaw(&self, root: NodeId) -> Result<()>;

    /// Free a tree regardless of its owners count
    ///
    /// Only valid once no live record references the root; an unknown
    /// root is an error (a double free is a bug to surface).
    fn remove_tree(&self, root: NodeId) -> Result<()>;
}

struct Arena {
    /// Every node of every live tree
    nodes: AHashMap<NodeId, Node>,
    /// Owners count per tree root
    owners: AHashMap<NodeId, usize>,
}

/// Reference in-memory tree store
pub struct MemoryTreeStore {
    arena: RwLock<Arena>,
    /// Physical tree frees, for the exactly-once release property
    releases: AtomicU64,
}

impl MemoryTreeStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            arena: RwLock::new(Arena {
                nodes: AHashMap::new(),
                owners: AHashMap::new(),
            }),
            releases: AtomicU64::new(0),
        }
    }

    /// Create a fresh unfrozen tree with a single root node
    pub fn create_root(&self, payload: Box<dyn Content>) -> NodeId {
        let mut arena = self.arena.write();
        let id = NodeId::new();
        arena.nodes.insert(
            id,
            Node {
                id,
                root: id,
                children: SmallVec::new(),
                frozen: false,
                payload,
            },
        );
        arena.owners.insert(id, 1);
        id
    }

    /// Append a child under `parent`
    pub fn add_child(&self, parent: NodeId, payload: Box<dyn Content>) -> Result<NodeId> {
        let mut arena = self.arena.write();
        let root = {
            let node = Self::node(&arena, parent)?;
            if node.frozen {
                bail!("node {} is frozen; clone the tree before editing", parent);
            }
            node.root
        };

        let id = NodeId::new();
        arena.nodes.insert(
            id,
            Node {
                id,
                root,
                children: SmallVec::new(),
                frozen: false,
                payload,
            },
        );
        if let Some(node) = arena.nodes.get_mut(&parent) {
            node.children.push(id);
        }
        Ok(id)
    }

    /// Replace a node's payload
    pub fn set_payload(&self, node: NodeId, payload: Box<dyn Content>) -> Result<()> {
        let mut arena = self.arena.write();
        let entry = match arena.nodes.get_mut(&node) {
            Some(n) => n,
            None => bail!("unknown node: {}", node),
        };
        if entry.frozen {
            bail!("node {} is frozen; clone the tree before editing", node);
        }
        entry.payload = payload;
        Ok(())
    }

    /// Detach `child` from `parent` and free its subtree
    pub fn remove_child(&self, parent: NodeId, child: NodeId) -> Result<()> {
        let mut arena = self.arena.write();
        {
            let node = Self::node(&arena, parent)?;
            if node.frozen {
                bail!("node {} is frozen; clone the tree before editing", parent);
            }
            if !node.children.contains(&child) {
                bail!("node {} is not a child of {}", child, parent);
            }
        }
        if let Some(node) = arena.nodes.get_mut(&parent) {
            node.children.retain(|c| *c != child);
        }
        let subtree = Self::collect_subtree(&arena, child)?;
        for id in subtree {
            arena.nodes.remove(&id);
        }
        Ok(())
    }

    /// Ordered child identities of a node
    pub fn children(&self, node: NodeId) -> Result<Vec<NodeId>> {
        let arena = self.arena.read();
        Ok(Self::node(&arena, node)?.children.to_vec())
    }

    /// Render a node's payload
    pub fn render(&self, node: NodeId) -> Result<String> {
        let arena = self.arena.read();
        Ok(Self::node(&arena, node)?.payload.render())
    }

    /// Whether a node is still present in the arena
    pub fn contains(&self, node: NodeId) -> bool {
        self.arena.read().nodes.contains_key(&node)
    }

    /// Number of nodes in a tree
    pub fn tree_size(&self, root: NodeId) -> Result<usize> {
        let arena = self.arena.read();
        Ok(Self::collect_subtree(&arena, root)?.len())
    }

    /// Number of physical tree frees so far
    pub fn release_count(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }

    fn node<'a>(arena: &'a Arena, id: NodeId) -> Result<&'a Node> {
        match arena.nodes.get(&id) {
            Some(n) => Ok(n),
            None => bail!("unknown node: {}", id),
        }
    }

    /// Every node id in the subtree under `root`, parents before children
    fn collect_subtree(arena: &Arena, root: NodeId) -> Result<Vec<NodeId>> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = Self::node(arena, id)?;
            out.push(id);
            stack.extend(node.children.iter().copied());
        }
        Ok(out)
    }

    fn copy_subtree(
        arena: &mut Arena,
        src: NodeId,
        dst_root: NodeId,
        freeze: bool,
    ) -> Result<NodeId> {
        let (payload, child_ids) = {
            let node = Self::node(arena, src)?;
            (node.payload.clone_content(), node.children.clone())
        };

        let mut children = SmallVec::new();
        for child in child_ids {
            children.push(Self::copy_subtree(arena, child, dst_root, freeze)?);
        }

        let id = NodeId::new();
        arena.nodes.insert(
            id,
            Node {
                id,
                root: dst_root,
                children,
                frozen: freeze,
                payload,
            },
        );
        Ok(id)
    }

    fn subtrees_equal(arena: &Arena, a: NodeId, b: NodeId) -> Result<bool> {
        let node_a = Self::node(arena, a)?;
        let node_b = Self::node(arena, b)?;

        if !node_a.payload.content_eq(node_b.payload.as_ref()) {
            return Ok(false);
        }
        if node_a.children.len() != node_b.children.len() {
            return Ok(false);
        }
        for (ca, cb) in node_a.children.iter().zip(node_b.children.iter()) {
            if !Self::subtrees_equal(arena, *ca, *cb)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Free every node of `root` and bump the release counter.
    /// Caller has already removed the owners entry.
    fn free_tree(arena: &mut Arena, root: NodeId, releases: &AtomicU64) -> Result<()> {
        let subtree = Self::collect_subtree(arena, root)?;
        for id in subtree {
            arena.nodes.remove(&id);
        }
        releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Default for MemoryTreeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeStore for MemoryTreeStore {
    fn clone_tree(&self, root: NodeId, freeze: bool) -> Result<NodeId> {
        let mut arena = self.arena.write();
        if !arena.owners.contains_key(&root) {
            bail!("unknown tree root: {}", root);
        }

        let (payload, child_ids) = {
            let node = Self::node(&arena, root)?;
            (node.payload.clone_content(), node.children.clone())
        };

        let new_root = NodeId::new();
        let mut children = SmallVec::new();
        for child in child_ids {
            children.push(Self::copy_subtree(&mut arena, child, new_root, freeze)?);
        }
        arena.nodes.insert(
            new_root,
            Node {
                id: new_root,
                root: new_root,
                children,
                frozen: freeze,
                payload,
            },
        );
        arena.owners.insert(new_root, 1);
        Ok(new_root)
    }

    fn trees_equal(&self, a: NodeId, b: NodeId) -> Result<bool> {
        let arena = self.arena.read();
        Self::subtrees_equal(&arena, a, b)
    }

    fn prefetch(&self, roots: &[NodeId]) {
        // The arena is already resident; this is a contract hook for
        // stores that page nodes in from disk or a network.
        tracing::trace!(trees = roots.len(), "prefetch hint");
    }

    fn is_frozen(&self, root: NodeId) -> Result<bool> {
        let arena = self.arena.read();
        Ok(Self::node(&arena, root)?.frozen)
    }

    fn retain(&self, root: NodeId) -> Result<()> {
        let mut arena = self.arena.write();
        match arena.owners.get_mut(&root) {
            Some(count) => {
                *count += 1;
                Ok(())
            }
            None => bail!("unknown tree root: {}", root),
        }
    }

    fn try_release(&self, root: NodeId) -> Result<ReleaseOutcome> {
        let mut arena = self.arena.write();
        if Self::node(&arena, root)?.frozen {
            bail!("cannot release frozen tree {}; thaw it first", root);
        }
        let count = match arena.owners.get_mut(&root) {
            Some(count) => {
                *count -= 1;
                *count
            }
            None => bail!("unknown tree root: {}", root),
        };
        if count > 0 {
            return Ok(ReleaseOutcome::Retained { remaining: count });
        }
        arena.owners.remove(&root);
        Self::free_tree(&mut arena, root, &self.releases)?;
        Ok(ReleaseOutcome::Released)
    }

    fn thaw(&self, root: NodeId) -> Result<()> {
        let mut arena = self.arena.write();
        let subtree = Self::collect_subtree(&arena, root)?;
        for id in subtree {
            if let Some(node) = arena.nodes.get_mut(&id) {
                node.frozen = false;
            }
        }
        Ok(())
    }

    fn remove_tree(&self, root: NodeId) -> Result<()> {
        let mut arena = self.arena.write();
        if !arena.owners.contains_key(&root) {
            bail!("unknown tree root: {} (already removed?)", root);
        }
        if Self::node(&arena, root)?.frozen {
            bail!("cannot remove frozen tree {}; thaw it first", root);
        }
        arena.owners.remove(&root);
        Self::free_tree(&mut arena, root, &self.releases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{Section, Text};

    /// Section root with two text children
    fn sample_tree(store: &MemoryTreeStore) -> Result<NodeId> {
        let root = store.create_root(Box::new(Section::new("page")));
        store.add_child(root, Box::new(Text::new("first")))?;
        store.add_child(root, Box::new(Text::new("second")))?;
        Ok(root)
    }

    #[test]
    fn test_clone_preserves_shape_and_payload() -> Result<()> {
        let store = MemoryTreeStore::new();
        let root = sample_tree(&store)?;

        let clone = store.clone_tree(root, false)?;

        assert!(store.trees_equal(root, clone)?);
        assert_eq!(store.tree_size(clone)?, 3);

        let children = store.children(clone)?;
        assert_eq!(children.len(), 2);
        assert_eq!(store.render(children[0])?, "first");
        assert_eq!(store.render(children[1])?, "second");
        Ok(())
    }

    #[test]
    fn test_clone_assigns_fresh_identities() -> Result<()> {
        let store = MemoryTreeStore::new();
        let root = sample_tree(&store)?;

        let clone = store.clone_tree(root, false)?;

        assert_ne!(root, clone);
        let originals = store.children(root)?;
        let cloned = store.children(clone)?;
        for id in &cloned {
            assert!(!originals.contains(id));
        }
        Ok(())
    }

    #[test]
    fn test_clone_freeze_flag() -> Result<()> {
        let store = MemoryTreeStore::new();
        let root = sample_tree(&store)?;

        let snapshot = store.clone_tree(root, true)?;

        assert!(store.is_frozen(snapshot)?);
        assert!(!store.is_frozen(root)?);
        // Frozen flag applies to every descendant
        for child in store.children(snapshot)? {
            assert!(store.add_child(child, Box::new(Text::new("x"))).is_err());
        }
        Ok(())
    }

    #[test]
    fn test_clone_leaves_source_untouched() -> Result<()> {
        let store = MemoryTreeStore::new();
        let root = sample_tree(&store)?;
        let size_before = store.tree_size(root)?;

        store.clone_tree(root, true)?;

        assert_eq!(store.tree_size(root)?, size_before);
        assert!(!store.is_frozen(root)?);
        // Source stays editable
        store.add_child(root, Box::new(Text::new("third")))?;
        Ok(())
    }

    #[test]
    fn test_equality_ignores_frozen_state() -> Result<()> {
        let store = MemoryTreeStore::new();
        let root = sample_tree(&store)?;
        let snapshot = store.clone_tree(root, true)?;

        assert!(store.trees_equal(root, snapshot)?);
        Ok(())
    }

    #[test]
    fn test_equality_detects_payload_change() -> Result<()> {
        let store = MemoryTreeStore::new();
        let root = sample_tree(&store)?;
        let clone = store.clone_tree(root, false)?;

        let children = store.children(clone)?;
        store.set_payload(children[0], Box::new(Text::new("edited")))?;

        assert!(!store.trees_equal(root, clone)?);
        Ok(())
    }

    #[test]
    fn test_equality_detects_shape_change() -> Result<()> {
        let store = MemoryTreeStore::new();
        let root = sample_tree(&store)?;
        let clone = store.clone_tree(root, false)?;

        store.add_child(clone, Box::new(Text::new("third")))?;

        assert!(!store.trees_equal(root, clone)?);
        Ok(())
    }

    #[test]
    fn test_equality_respects_child_order() -> Result<()> {
        let store = MemoryTreeStore::new();

        let a = store.create_root(Box::new(Section::new("page")));
        store.add_child(a, Box::new(Text::new("one")))?;
        store.add_child(a, Box::new(Text::new("two")))?;

        let b = store.create_root(Box::new(Section::new("page")));
        store.add_child(b, Box::new(Text::new("two")))?;
        store.add_child(b, Box::new(Text::new("one")))?;

        assert!(!store.trees_equal(a, b)?);
        Ok(())
    }

    #[test]
    fn test_frozen_edits_rejected() -> Result<()> {
        let store = MemoryTreeStore::new();
        let root = sample_tree(&store)?;
        let snapshot = store.clone_tree(root, true)?;
        let children = store.children(snapshot)?;

        let err = store
            .add_child(snapshot, Box::new(Text::new("x")))
            .unwrap_err();
        assert!(err.to_string().contains("frozen"));

        assert!(store
            .set_payload(children[0], Box::new(Text::new("x")))
            .is_err());
        assert!(store.remove_child(snapshot, children[0]).is_err());
        Ok(())
    }

    #[test]
    fn test_remove_child_frees_subtree() -> Result<()> {
        let store = MemoryTreeStore::new();
        let root = store.create_root(Box::new(Section::new("page")));
        let branch = store.add_child(root, Box::new(Section::new("aside")))?;
        let leaf = store.add_child(branch, Box::new(Text::new("deep")))?;

        store.remove_child(root, branch)?;

        assert!(!store.contains(branch));
        assert!(!store.contains(leaf));
        assert_eq!(store.tree_size(root)?, 1);
        Ok(())
    }

    #[test]
    fn test_release_frees_at_zero_owners() -> Result<()> {
        let store = MemoryTreeStore::new();
        let root = sample_tree(&store)?;
        let leaf = store.children(root)?[0];

        assert_eq!(store.try_release(root)?, ReleaseOutcome::Released);
        assert!(!store.contains(root));
        assert!(!store.contains(leaf));
        assert_eq!(store.release_count(), 1);
        Ok(())
    }

    #[test]
    fn test_retained_release_frees_nothing() -> Result<()> {
        let store = MemoryTreeStore::new();
        let root = sample_tree(&store)?;
        store.retain(root)?;

        assert_eq!(
            store.try_release(root)?,
            ReleaseOutcome::Retained { remaining: 1 }
        );
        assert!(store.contains(root));
        assert_eq!(store.release_count(), 0);

        assert_eq!(store.try_release(root)?, ReleaseOutcome::Released);
        assert_eq!(store.release_count(), 1);
        Ok(())
    }

    #[test]
    fn test_release_refuses_frozen_tree() -> Result<()> {
        let store = MemoryTreeStore::new();
        let root = sample_tree(&store)?;
        let snapshot = store.clone_tree(root, true)?;

        let err = store.try_release(snapshot).unwrap_err();
        assert!(err.to_string().contains("frozen"));

        store.thaw(snapshot)?;
        assert_eq!(store.try_release(snapshot)?, ReleaseOutcome::Released);
        Ok(())
    }

    #[test]
    fn test_remove_tree_ignores_owner_count() -> Result<()> {
        let store = MemoryTreeStore::new();
        let root = sample_tree(&store)?;
        store.retain(root)?;

        store.remove_tree(root)?;

        assert!(!store.contains(root));
        assert_eq!(store.release_count(), 1);
        Ok(())
    }

    #[test]
    fn test_remove_tree_twice_is_an_error() -> Result<()> {
        let store = MemoryTreeStore::new();
        let root = store.create_root(Box::new(Text::new("solo")));

        store.remove_tree(root)?;
        assert!(store.remove_tree(root).is_err());
        Ok(())
    }
}
