//! Internal domain modules for the Marginalia outline engine.
//!
//! All public types from these modules are re-exported at the crate root
//! with `#[doc(inline)]`; import from there in preference to this module.

pub mod delete;
pub mod error;
pub mod export;
pub mod forest;
pub mod linearize;
pub mod mutation;
pub mod note;
pub mod operation;
pub mod operation_log;
pub mod outline;
pub mod position;
pub mod settings;
pub mod splice;
pub mod storage;
pub mod workspace;

#[doc(inline)]
pub use delete::{DeleteResult, DeleteStrategy};
#[doc(inline)]
pub use error::{Corruption, MarginaliaError, Result};
#[doc(inline)]
pub use export::{export_file_name, export_outline, write_export, ExportOutline, APP_VERSION};
#[doc(inline)]
pub use forest::{build_forest, OutlineNode};
#[doc(inline)]
pub use linearize::{chain_heads, linearize, linearize_strict};
#[doc(inline)]
pub use mutation::{
    BatchItemResult, BatchResult, ItemErrorKind, ItemOutcome, MoveTarget, NoteSource, NoteSpec,
    OutlineBatch, PlacedNote,
};
#[doc(inline)]
pub use note::{FieldValue, Note, NoteDraft};
#[doc(inline)]
pub use operation::Operation;
#[doc(inline)]
pub use operation_log::{OperationLog, OperationSummary, PurgeStrategy};
#[doc(inline)]
pub use outline::{Outline, OutlineSummary};
#[doc(inline)]
pub use position::Position;
#[doc(inline)]
pub use settings::{load_settings, save_settings, EngineSettings};
#[doc(inline)]
pub use storage::Storage;
#[doc(inline)]
pub use workspace::Workspace;
