//! Core library for Marginalia, the outline engine behind reading notes.
//!
//! An outline is an ordered, nested arrangement of notes. Order is stored as
//! per-note `previous`/`next` pointers and nesting as a `parent_id`, so a
//! single insert or move touches a handful of rows instead of renumbering a
//! whole list. The primary entry point is [`Workspace`]: reads rebuild the
//! forest from those pointers and reject corrupt chains, writes splice new
//! pointers in atomically under an optimistic outline version.
//!
//! Types are re-exported from their respective sub-modules for convenience;
//! consumers should import from the crate root rather than the `core` module.

pub mod core;

// Re-export commonly used types.
#[doc(inline)]
pub use core::{
    delete::{DeleteResult, DeleteStrategy},
    error::{Corruption, MarginaliaError, Result},
    export::{export_file_name, export_outline, write_export, ExportOutline, APP_VERSION},
    forest::{build_forest, OutlineNode},
    linearize::{chain_heads, linearize, linearize_strict},
    mutation::{
        BatchItemResult, BatchResult, ItemErrorKind, ItemOutcome, MoveTarget, NoteSource, NoteSpec,
        OutlineBatch, PlacedNote,
    },
    note::{FieldValue, Note, NoteDraft},
    operation::Operation,
    operation_log::{OperationLog, OperationSummary, PurgeStrategy},
    outline::{Outline, OutlineSummary},
    position::Position,
    settings::{load_settings, save_settings, EngineSettings},
    storage::Storage,
    workspace::Workspace,
};
