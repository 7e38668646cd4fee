//! Strategy and result types for removing notes from an outline.
//!
//! Removal only soft-deletes position rows; the notes themselves stay in the
//! database and can be placed again later.
//!
//! ## Strategies
//!
//! - [`DeleteStrategy::DeleteAll`] removes the target note and its whole
//!   subtree from the outline.
//! - [`DeleteStrategy::PromoteChildren`] removes only the target note and
//!   splices its children, in order, into the slot it vacated.
//!
//! ## Serialization
//!
//! - `DeleteStrategy` variants serialize as PascalCase strings
//!   (`"DeleteAll"`, `"PromoteChildren"`).
//! - `DeleteResult` fields serialize in camelCase (`deletedCount`,
//!   `affectedIds`), consistent with all other return types in this crate.
//!
//! ```rust
//! use marginalia_core::{DeleteStrategy, DeleteResult};
//!
//! let strategy = DeleteStrategy::PromoteChildren;
//! let json = serde_json::to_string(&strategy).unwrap();
//! assert_eq!(json, r#""PromoteChildren""#);
//!
//! let result = DeleteResult {
//!     deleted_count: 1,
//!     affected_ids: vec!["a".to_string(), "b".to_string()],
//! };
//! let json = serde_json::to_string(&result).unwrap();
//! assert!(json.contains("deletedCount"));
//! assert!(json.contains("affectedIds"));
//! ```

use serde::{Deserialize, Serialize};

/// Determines what happens to a removed note's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DeleteStrategy {
    /// Remove the target note and all of its descendants.
    DeleteAll,

    /// Remove only the target note and move its children into its place.
    PromoteChildren,
}

/// The outcome of removing a note from an outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    /// Number of position rows removed from the outline.
    pub deleted_count: usize,

    /// IDs of every note whose position was removed or rewritten.
    pub affected_ids: Vec<String>,
}
