//! Content nodes and the opaque payload interface

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::any::Any;
use std::fmt;
use ulid::Ulid;

/// Identity of a single content node (ULID for timestamp + uniqueness)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(Ulid);

impl NodeId {
    /// Generate a fresh node identity
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Capability interface for opaque node payloads
///
/// The tree engine never inspects payload semantics beyond this trait:
/// payloads know how to copy themselves, compare against a sibling, and
/// render for display. Concrete widget types live outside the engine.
pub trait Content: fmt::Debug + Send + Sync {
    /// Deep-copy the payload
    fn clone_content(&self) -> Box<dyn Content>;

    /// Semantic equality against another payload
    ///
    /// Payloads of different concrete types are never equal.
    fn content_eq(&self, other: &dyn Content) -> bool;

    /// Render the payload for display
    fn render(&self) -> String;

    /// Downcast support for `content_eq` implementations
    fn as_any(&self) -> &dyn Any;
}

/// A node in a content tree: ordered children plus an opaque payload
///
/// Nodes form a strict rooted tree; subtrees are never shared between
/// two trees. The `frozen` flag marks a node that belongs to an
/// immutable snapshot and must not be edited in place.
#[derive(Debug)]
pub struct Node {
    /// Identity of this node
    pub id: NodeId,
    /// Root of the tree this node belongs to
    pub root: NodeId,
    /// Ordered child node identities
    pub children: SmallVec<[NodeId; 4]>,
    /// Whether this node is part of a frozen snapshot
    pub frozen: bool,
    /// Opaque payload
    pub payload: Box<dyn Content>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Text;

    #[test]
    fn test_node_id_ordering() {
        let a = NodeId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = NodeId::new();

        // ULIDs are time-ordered
        assert!(a < b);
    }

    #[test]
    fn test_content_eq_across_types() {
        #[derive(Debug, Clone, PartialEq)]
        struct Marker;

        impl Content for Marker {
            fn clone_content(&self) -> Box<dyn Content> {
                Box::new(self.clone())
            }
            fn content_eq(&self, other: &dyn Content) -> bool {
                other.as_any().downcast_ref::<Marker>().is_some()
            }
            fn render(&self) -> String {
                String::new()
            }
            fn as_any(&self) -> &dyn Any {
                self
            }
        }

        let text = Text::new("hello");
        let marker = Marker;

        assert!(!text.content_eq(&marker));
        assert!(!marker.content_eq(&text));
        assert!(marker.content_eq(&Marker));
    }
}
