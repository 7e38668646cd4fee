//! Error types for the Marginalia core library.

use thiserror::Error;

/// A structural defect found while rebuilding an outline from its positions.
///
/// Raised only by the linearizer and the forest builder. A corruption is never
/// a stored state; it means previously committed position rows disagree with
/// each other.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Corruption {
    /// Every row claims a predecessor, so no chain has a head.
    #[error("no chain head: every position has a previous pointer")]
    NoRoot,

    /// A `next` pointer names a note that is not among the positions.
    #[error("next pointer references missing note {0}")]
    DanglingNext(String),

    /// A `next` chain reached the same note twice.
    #[error("circular sibling chain at note {0}")]
    Circular(String),

    /// Some rows were not reachable from any root.
    #[error("only {found} of {expected} positions are reachable from a root")]
    IncompleteCoverage { expected: usize, found: usize },

    /// Two linked siblings disagree on their parent (strict mode only).
    #[error("note {id} links to {next} which has a different parent")]
    ParentMismatch { id: String, next: String },
}

impl Corruption {
    /// Returns `true` if the corruption is a cycle rather than some other defect.
    #[must_use]
    pub fn is_circular(&self) -> bool {
        matches!(self, Self::Circular(_))
    }
}

/// All errors that can occur within the Marginalia core library.
#[derive(Debug, Error)]
pub enum MarginaliaError {
    /// A SQLite operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// An outline id does not exist, is deleted, or belongs to another reader.
    #[error("Outline not found: {0}")]
    OutlineNotFound(String),

    /// A note id does not exist or belongs to another reader.
    #[error("Note not found: {0}")]
    NoteNotFound(String),

    /// A `previous`/`next`/`parent_id` reference resolved neither in the batch
    /// nor in the outline.
    #[error("Reference not found: {0}")]
    ReferenceNotFound(String),

    /// A note specification or note body is malformed.
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// The requested placement cannot be spliced into a well-formed chain.
    #[error("Invalid splice: {0}")]
    InvalidSplice(String),

    /// Committed position rows do not form a valid forest.
    #[error("Structural corruption: {0}")]
    StructuralCorruption(#[from] Corruption),

    /// The outline changed since the caller read it.
    #[error("Version conflict: expected {expected}, found {actual}")]
    Conflict { expected: i64, actual: i64 },

    /// Another connection holds the write lock on the database.
    #[error("Outline busy: {0}")]
    Busy(String),

    /// A mutation batch exceeds the configured size bound.
    #[error("Batch of {size} notes exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    /// The opened file is not a valid Marginalia database.
    #[error("Invalid workspace: {0}")]
    InvalidWorkspace(String),

    /// An I/O operation on the filesystem failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored note data could not be (de)serialized as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias that pins the error type to [`MarginaliaError`].
pub type Result<T> = std::result::Result<T, MarginaliaError>;

impl MarginaliaError {
    /// Returns a short, human-readable message suitable for display to the end user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Database(e) => format!("Failed to save: {e}"),
            Self::OutlineNotFound(_) => "Outline no longer exists".to_string(),
            Self::NoteNotFound(_) => "Note no longer exists".to_string(),
            Self::ReferenceNotFound(r) => format!("Cannot place note next to unknown note {r}"),
            Self::ValidationFailed(msg) => msg.clone(),
            Self::InvalidSplice(msg) => msg.clone(),
            Self::StructuralCorruption(c) if c.is_circular() => {
                "This outline contains a circular ordering and cannot be displayed".to_string()
            }
            Self::StructuralCorruption(_) => "This outline is damaged and cannot be displayed".to_string(),
            Self::Conflict { .. } => "The outline was changed elsewhere, reload and try again".to_string(),
            Self::Busy(_) => "The outline is being edited elsewhere, try again".to_string(),
            Self::BatchTooLarge { limit, .. } => format!("Add at most {limit} notes at once"),
            Self::InvalidWorkspace(_) => "Could not open database file".to_string(),
            Self::Io(e) => format!("File error: {e}"),
            Self::Json(e) => format!("Data format error: {e}"),
        }
    }

    /// The transport status this error maps to (HTTP semantics).
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::OutlineNotFound(_) | Self::NoteNotFound(_) | Self::ReferenceNotFound(_) => 404,
            Self::ValidationFailed(_)
            | Self::InvalidSplice(_)
            | Self::StructuralCorruption(_)
            | Self::BatchTooLarge { .. } => 400,
            Self::Conflict { .. } | Self::Busy(_) => 409,
            Self::Database(_) | Self::InvalidWorkspace(_) | Self::Io(_) | Self::Json(_) => 500,
        }
    }

    /// Only lost races can succeed on a plain retry (after a re-read).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Busy(_))
    }

    /// Turns SQLite lock contention on `outline_id` into [`MarginaliaError::Busy`];
    /// every other SQLite error stays a [`MarginaliaError::Database`].
    pub fn from_write_lock(err: rusqlite::Error, outline_id: &str) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, _)
                if matches!(
                    failure.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                log::warn!("outline {outline_id}: write lock held by another connection");
                Self::Busy(outline_id.to_string())
            }
            _ => Self::Database(err),
        }
    }
}
