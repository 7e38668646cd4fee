//! The outline container and its assembled tree.

use crate::core::forest::OutlineNode;
use crate::core::note::Note;
use serde::{Deserialize, Serialize};

/// Container metadata for an outline, without its notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineSummary {
    pub id: String,
    pub reader_id: String,
    pub title: String,
    /// Bumped by one on every structural mutation; mutations must quote the
    /// version they read.
    pub version: i64,
    pub created_at: i64,
    pub modified_at: i64,
}

/// An outline together with its notes arranged as a forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outline {
    #[serde(flatten)]
    pub summary: OutlineSummary,
    pub notes: Vec<OutlineNode>,
}

impl Outline {
    pub fn id(&self) -> &str {
        &self.summary.id
    }

    pub fn version(&self) -> i64 {
        self.summary.version
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Total number of notes across all trees.
    pub fn note_count(&self) -> usize {
        self.notes.iter().map(OutlineNode::subtree_size).sum()
    }

    /// Visits every note depth-first in document order, yielding its depth
    /// (roots are depth 0).
    pub fn walk_depth_first(&self) -> DepthFirst<'_> {
        DepthFirst {
            stack: self.notes.iter().rev().map(|n| (0, n)).collect(),
        }
    }

    /// Looks up a node anywhere in the forest.
    pub fn find(&self, note_id: &str) -> Option<&OutlineNode> {
        let mut stack: Vec<&OutlineNode> = self.notes.iter().collect();
        while let Some(node) = stack.pop() {
            if node.note.id == note_id {
                return Some(node);
            }
            stack.extend(node.children.iter());
        }
        None
    }
}

/// Depth-first iterator over an outline, see [`Outline::walk_depth_first`].
pub struct DepthFirst<'a> {
    stack: Vec<(usize, &'a OutlineNode)>,
}

impl<'a> Iterator for DepthFirst<'a> {
    type Item = (usize, &'a Note);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, node) = self.stack.pop()?;
        self.stack
            .extend(node.children.iter().rev().map(|child| (depth + 1, child)));
        Some((depth, &node.note))
    }
}
