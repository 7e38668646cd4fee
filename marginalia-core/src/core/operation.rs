//! Operation types recorded in the Marginalia operation log.

use serde::{Deserialize, Serialize};

/// A single structural mutation recorded in the operation log.
///
/// Every variant carries a stable `operation_id`, a wall-clock `timestamp`,
/// and the `reader_id` of the reader who made the change. One mutation call
/// usually logs several operations inside the same transaction, e.g. a
/// `CreateNote` followed by a `PlaceNote` for the new note and one for each
/// neighbour whose pointers were rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Operation {
    /// A new, empty outline was created.
    CreateOutline {
        operation_id: String,
        timestamp: i64,
        reader_id: String,
        outline_id: String,
        title: String,
    },
    /// An outline was soft-deleted.
    DeleteOutline {
        operation_id: String,
        timestamp: i64,
        reader_id: String,
        outline_id: String,
    },
    /// A brand-new note was created.
    CreateNote {
        operation_id: String,
        timestamp: i64,
        reader_id: String,
        note_id: String,
        /// Outline the note was created into, if any.
        outline_id: Option<String>,
        body: String,
    },
    /// A note was created as a copy of another note.
    CloneNote {
        operation_id: String,
        timestamp: i64,
        reader_id: String,
        note_id: String,
        original_id: String,
        outline_id: String,
    },
    /// A position row was inserted or had its pointers rewritten.
    PlaceNote {
        operation_id: String,
        timestamp: i64,
        reader_id: String,
        outline_id: String,
        note_id: String,
        previous: Option<String>,
        next: Option<String>,
        parent_id: Option<String>,
    },
    /// A note's position was removed from an outline.
    RemoveNote {
        operation_id: String,
        timestamp: i64,
        reader_id: String,
        outline_id: String,
        note_id: String,
    },
    /// A note's tag set was replaced.
    UpdateTags {
        operation_id: String,
        timestamp: i64,
        reader_id: String,
        note_id: String,
        tags: Vec<String>,
    },
}

impl Operation {
    /// Returns the stable identifier for this operation.
    #[must_use]
    pub fn operation_id(&self) -> &str {
        match self {
            Self::CreateOutline { operation_id, .. }
            | Self::DeleteOutline { operation_id, .. }
            | Self::CreateNote { operation_id, .. }
            | Self::CloneNote { operation_id, .. }
            | Self::PlaceNote { operation_id, .. }
            | Self::RemoveNote { operation_id, .. }
            | Self::UpdateTags { operation_id, .. } => operation_id,
        }
    }

    /// Returns the wall-clock Unix timestamp (seconds) when this operation was created.
    #[must_use]
    pub fn timestamp(&self) -> i64 {
        match self {
            Self::CreateOutline { timestamp, .. }
            | Self::DeleteOutline { timestamp, .. }
            | Self::CreateNote { timestamp, .. }
            | Self::CloneNote { timestamp, .. }
            | Self::PlaceNote { timestamp, .. }
            | Self::RemoveNote { timestamp, .. }
            | Self::UpdateTags { timestamp, .. } => *timestamp,
        }
    }

    /// Returns the reader who performed this operation.
    #[must_use]
    pub fn reader_id(&self) -> &str {
        match self {
            Self::CreateOutline { reader_id, .. }
            | Self::DeleteOutline { reader_id, .. }
            | Self::CreateNote { reader_id, .. }
            | Self::CloneNote { reader_id, .. }
            | Self::PlaceNote { reader_id, .. }
            | Self::RemoveNote { reader_id, .. }
            | Self::UpdateTags { reader_id, .. } => reader_id,
        }
    }

    /// The variant name, as stored in the `operation_type` column.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::CreateOutline { .. } => "CreateOutline",
            Self::DeleteOutline { .. } => "DeleteOutline",
            Self::CreateNote { .. } => "CreateNote",
            Self::CloneNote { .. } => "CloneNote",
            Self::PlaceNote { .. } => "PlaceNote",
            Self::RemoveNote { .. } => "RemoveNote",
            Self::UpdateTags { .. } => "UpdateTags",
        }
    }
}
