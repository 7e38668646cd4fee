//! High-level outline operations over a Marginalia SQLite database.

use crate::core::forest::{build_forest, OutlineNode};
use crate::core::linearize::{linearize, linearize_strict};
use crate::core::mutation::{check_keys, plan_batch, Accepted};
use crate::core::note::normalise_tags;
use crate::core::position::{self, Position};
use crate::core::splice::{ChainChanges, ChainEditor};
use crate::{
    BatchItemResult, BatchResult, Corruption, DeleteResult, DeleteStrategy, EngineSettings,
    ItemErrorKind, ItemOutcome, MarginaliaError, MoveTarget, Note, NoteDraft, NoteSource, NoteSpec,
    Operation, OperationLog, OperationSummary, Outline, OutlineBatch, OutlineSummary, PlacedNote,
    PurgeStrategy, Result, Storage,
};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use uuid::Uuid;

/// Schema version written to `workspace_meta` on creation.
const SCHEMA_VERSION: i64 = 1;

/// An open Marginalia database.
///
/// `Workspace` is the entry point for the outline engine: reads go through
/// [`Workspace::get_outline`], structural writes through
/// [`Workspace::add_notes`], [`Workspace::move_note`] and
/// [`Workspace::remove_note`]. Every structural write runs in one immediate
/// SQLite transaction and must quote the outline version it was computed
/// against, so concurrent writers to the same outline are serialized and
/// stale ones fail with [`MarginaliaError::Conflict`]. A writer that cannot
/// get the database lock in time fails with [`MarginaliaError::Busy`]; both
/// are retryable.
pub struct Workspace {
    storage: Storage,
    operation_log: OperationLog,
    settings: EngineSettings,
}

impl Workspace {
    /// Creates a new database at `path` and initialises the schema.
    ///
    /// # Errors
    ///
    /// Returns [`MarginaliaError::Database`] for any SQLite failure.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let storage = Storage::create(path)?;
        Self::initialise(storage)
    }

    /// Creates a database that lives only in memory.
    pub fn open_in_memory() -> Result<Self> {
        let storage = Storage::open_in_memory()?;
        Self::initialise(storage)
    }

    fn initialise(storage: Storage) -> Result<Self> {
        storage.connection().execute(
            "INSERT OR REPLACE INTO workspace_meta (key, value) VALUES ('schema_version', ?)",
            [SCHEMA_VERSION.to_string()],
        )?;
        Ok(Self::with_storage(storage))
    }

    /// Opens an existing database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`MarginaliaError::InvalidWorkspace`] if the file is not a
    /// Marginalia database or was written by a newer schema, or
    /// [`MarginaliaError::Database`] for any SQLite failure.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let storage = Storage::open(path)?;

        let schema_version = storage
            .connection()
            .query_row(
                "SELECT value FROM workspace_meta WHERE key = 'schema_version'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(SCHEMA_VERSION);

        if schema_version > SCHEMA_VERSION {
            return Err(MarginaliaError::InvalidWorkspace(format!(
                "Database schema version {schema_version} is newer than supported version {SCHEMA_VERSION}"
            )));
        }

        Ok(Self::with_storage(storage))
    }

    fn with_storage(storage: Storage) -> Self {
        let settings = EngineSettings::default();
        Self {
            storage,
            operation_log: OperationLog::new(PurgeStrategy::LocalOnly {
                keep_last: settings.operation_log_keep_last,
            }),
            settings,
        }
    }

    /// Replaces the engine settings.
    #[must_use]
    pub fn with_settings(mut self, settings: EngineSettings) -> Self {
        self.operation_log = OperationLog::new(PurgeStrategy::LocalOnly {
            keep_last: settings.operation_log_keep_last,
        });
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Returns the underlying SQLite connection.
    pub fn connection(&self) -> &Connection {
        self.storage.connection()
    }

    // ── Outline containers ───────────────────────────────────────────

    /// Creates an empty outline owned by `reader_id`.
    pub fn create_outline(&mut self, reader_id: &str, title: &str) -> Result<OutlineSummary> {
        let title = title.trim();
        if title.is_empty() {
            return Err(MarginaliaError::ValidationFailed(
                "Outline title must not be empty".to_string(),
            ));
        }
        let now = chrono::Utc::now().timestamp();
        let summary = OutlineSummary {
            id: Uuid::new_v4().to_string(),
            reader_id: reader_id.to_string(),
            title: title.to_string(),
            version: 0,
            created_at: now,
            modified_at: now,
        };

        let tx = self.storage.connection_mut().transaction()?;
        tx.execute(
            "INSERT INTO outlines (id, reader_id, title, version, created_at, modified_at)
             VALUES (?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                summary.id,
                summary.reader_id,
                summary.title,
                summary.version,
                summary.created_at,
                summary.modified_at,
            ],
        )?;
        let op = Operation::CreateOutline {
            operation_id: Uuid::new_v4().to_string(),
            timestamp: now,
            reader_id: reader_id.to_string(),
            outline_id: summary.id.clone(),
            title: summary.title.clone(),
        };
        self.operation_log.log(&tx, &op)?;
        self.operation_log.purge_if_needed(&tx)?;
        tx.commit()?;

        Ok(summary)
    }

    /// Returns the container metadata of an outline without its notes.
    ///
    /// # Errors
    ///
    /// [`MarginaliaError::OutlineNotFound`] if the outline does not exist, is
    /// deleted, or belongs to another reader.
    pub fn get_outline_summary(&self, reader_id: &str, outline_id: &str) -> Result<OutlineSummary> {
        load_outline_summary(self.connection(), reader_id, outline_id)
    }

    /// Lists the live outlines of `reader_id`, oldest first.
    pub fn list_outlines(&self, reader_id: &str) -> Result<Vec<OutlineSummary>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, reader_id, title, version, created_at, modified_at
             FROM outlines
             WHERE reader_id = ?1 AND deleted_at IS NULL
             ORDER BY created_at, title",
        )?;
        let outlines = stmt
            .query_map([reader_id], map_outline_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(outlines)
    }

    /// Soft-deletes an outline. Its notes and position rows are kept but the
    /// outline is no longer readable or writable.
    pub fn delete_outline(&mut self, reader_id: &str, outline_id: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let tx = begin_write(self.storage.connection_mut(), outline_id)?;
        load_outline_summary(&tx, reader_id, outline_id)?;
        tx.execute(
            "UPDATE outlines SET deleted_at = ?1, modified_at = ?1 WHERE id = ?2",
            rusqlite::params![now, outline_id],
        )?;
        let op = Operation::DeleteOutline {
            operation_id: Uuid::new_v4().to_string(),
            timestamp: now,
            reader_id: reader_id.to_string(),
            outline_id: outline_id.to_string(),
        };
        self.operation_log.log(&tx, &op)?;
        self.operation_log.purge_if_needed(&tx)?;
        tx.commit()?;
        log::info!("outline {outline_id} deleted");
        Ok(())
    }

    // ── Notes ────────────────────────────────────────────────────────

    /// Creates a note outside any outline.
    ///
    /// # Errors
    ///
    /// [`MarginaliaError::ValidationFailed`] if the draft has no body.
    pub fn create_note(&mut self, reader_id: &str, draft: NoteDraft) -> Result<Note> {
        draft.validate().map_err(MarginaliaError::ValidationFailed)?;
        let now = chrono::Utc::now().timestamp();
        let note = note_from_draft(reader_id, draft, now);

        let tx = self.storage.connection_mut().transaction()?;
        insert_note(&tx, &note)?;
        let op = Operation::CreateNote {
            operation_id: Uuid::new_v4().to_string(),
            timestamp: now,
            reader_id: reader_id.to_string(),
            note_id: note.id.clone(),
            outline_id: None,
            body: note.body.clone(),
        };
        self.operation_log.log(&tx, &op)?;
        self.operation_log.purge_if_needed(&tx)?;
        tx.commit()?;

        Ok(note)
    }

    /// Fetches a single note by ID.
    ///
    /// # Errors
    ///
    /// [`MarginaliaError::NoteNotFound`] if no such note exists, or
    /// [`MarginaliaError::Json`] if its stored metadata is corrupt.
    pub fn get_note(&self, note_id: &str) -> Result<Note> {
        load_note(self.connection(), note_id)?
            .ok_or_else(|| MarginaliaError::NoteNotFound(note_id.to_string()))
    }

    /// Replaces all tags of a note. Returns the normalised tag list.
    ///
    /// Tags are normalised (lowercased, trimmed, deduplicated) before storage.
    pub fn update_note_tags(
        &mut self,
        reader_id: &str,
        note_id: &str,
        tags: Vec<String>,
    ) -> Result<Vec<String>> {
        let normalised = normalise_tags(tags);
        let now = chrono::Utc::now().timestamp();

        let tx = self.storage.connection_mut().transaction()?;
        match load_note(&tx, note_id)? {
            Some(note) if note.reader_id == reader_id => {}
            _ => return Err(MarginaliaError::NoteNotFound(note_id.to_string())),
        }
        tx.execute("DELETE FROM note_tags WHERE note_id = ?", [note_id])?;
        for tag in &normalised {
            tx.execute(
                "INSERT INTO note_tags (note_id, tag) VALUES (?, ?)",
                rusqlite::params![note_id, tag],
            )?;
        }
        tx.execute(
            "UPDATE notes SET modified_at = ? WHERE id = ?",
            rusqlite::params![now, note_id],
        )?;
        let op = Operation::UpdateTags {
            operation_id: Uuid::new_v4().to_string(),
            timestamp: now,
            reader_id: reader_id.to_string(),
            note_id: note_id.to_string(),
            tags: normalised.clone(),
        };
        self.operation_log.log(&tx, &op)?;
        self.operation_log.purge_if_needed(&tx)?;
        tx.commit()?;
        Ok(normalised)
    }

    /// Returns all distinct tags used by `reader_id`, sorted alphabetically.
    pub fn get_all_tags(&self, reader_id: &str) -> Result<Vec<String>> {
        let mut stmt = self.connection().prepare(
            "SELECT DISTINCT nt.tag FROM note_tags nt
             JOIN notes n ON n.id = nt.note_id
             WHERE n.reader_id = ?
             ORDER BY nt.tag",
        )?;
        let tags = stmt
            .query_map([reader_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    // ── Read path ────────────────────────────────────────────────────

    /// Loads an outline and assembles its notes into a forest.
    ///
    /// # Errors
    ///
    /// [`MarginaliaError::OutlineNotFound`] if the outline is missing, deleted
    /// or owned by another reader. [`MarginaliaError::StructuralCorruption`] if
    /// the stored positions do not form a valid forest; use
    /// [`Corruption::is_circular`] to tell cycles from other damage.
    pub fn get_outline(&self, reader_id: &str, outline_id: &str) -> Result<Outline> {
        let tx = self.connection().unchecked_transaction()?;
        let summary = load_outline_summary(&tx, reader_id, outline_id)?;
        let (positions, notes) = load_outline_rows(&tx, outline_id)?;
        tx.commit()?;

        let strict = self.settings.strict_sibling_check;
        match assemble(&positions, notes, strict) {
            Ok(forest) => Ok(Outline {
                summary,
                notes: forest,
            }),
            Err(corruption) => {
                log::error!(
                    "outline {outline_id} (version {}) is structurally corrupt: {corruption}",
                    summary.version
                );
                Err(corruption.into())
            }
        }
    }

    // ── Mutation protocol ────────────────────────────────────────────

    /// Creates and clones notes into an outline in one atomic batch.
    ///
    /// Items whose own content is invalid (empty body, unknown clone source)
    /// are reported as failed and skipped; the rest of the batch is still
    /// applied. Structural problems abort the whole batch and write nothing:
    /// an unresolvable reference (including one to a failed item), a
    /// placement that cannot be spliced, or a stale `expected_version`.
    ///
    /// # Errors
    ///
    /// - [`MarginaliaError::BatchTooLarge`] above the configured batch size.
    /// - [`MarginaliaError::ValidationFailed`] for empty or duplicate keys.
    /// - [`MarginaliaError::OutlineNotFound`] for an unknown outline.
    /// - [`MarginaliaError::Conflict`] if the outline version moved on.
    /// - [`MarginaliaError::ReferenceNotFound`] / [`MarginaliaError::InvalidSplice`]
    ///   for pointer problems.
    /// - [`MarginaliaError::StructuralCorruption`] if the outline was already
    ///   corrupt and the result would not verify.
    pub fn add_notes(
        &mut self,
        reader_id: &str,
        outline_id: &str,
        batch: &OutlineBatch,
    ) -> Result<BatchResult> {
        let limit = self.settings.max_batch_size;
        if batch.notes.len() > limit {
            return Err(MarginaliaError::BatchTooLarge {
                size: batch.notes.len(),
                limit,
            });
        }
        check_keys(&batch.notes)?;
        let strict = self.settings.strict_sibling_check;
        let now = chrono::Utc::now().timestamp();

        let tx = begin_write(self.storage.connection_mut(), outline_id)?;
        let summary = load_outline_summary(&tx, reader_id, outline_id)?;
        check_version(&summary, batch.expected_version)?;

        let mut failures: HashMap<usize, (ItemErrorKind, String)> = HashMap::new();
        let mut prepared: Vec<(usize, Note, Option<String>)> = Vec::new();
        for (index, spec) in batch.notes.iter().enumerate() {
            match prepare_note(&tx, reader_id, spec, now)? {
                Ok((note, original)) => prepared.push((index, note, original)),
                Err(failure) => {
                    failures.insert(index, failure);
                }
            }
        }

        let failed_keys: HashSet<&str> = failures
            .keys()
            .map(|&index| batch.notes[index].key.as_str())
            .collect();
        let accepted: Vec<Accepted<'_>> = prepared
            .iter()
            .map(|(index, note, _)| Accepted {
                spec: &batch.notes[*index],
                note_id: note.id.clone(),
            })
            .collect();

        let mut editor = ChainEditor::new(position::list_for_outline(&tx, outline_id)?);
        if let Err(e) = plan_batch(&mut editor, outline_id, reader_id, &accepted, &failed_keys) {
            log::warn!("rejected batch for outline {outline_id}: {e}");
            return Err(e);
        }

        let mut version = summary.version;
        let mut placed: HashMap<usize, PlacedNote> = HashMap::new();
        if !prepared.is_empty() {
            verify_before_commit(&editor, outline_id, strict)?;

            for (index, note, original) in prepared {
                let op = match original {
                    Some(original_id) => Operation::CloneNote {
                        operation_id: Uuid::new_v4().to_string(),
                        timestamp: now,
                        reader_id: reader_id.to_string(),
                        note_id: note.id.clone(),
                        original_id,
                        outline_id: outline_id.to_string(),
                    },
                    None => Operation::CreateNote {
                        operation_id: Uuid::new_v4().to_string(),
                        timestamp: now,
                        reader_id: reader_id.to_string(),
                        note_id: note.id.clone(),
                        outline_id: Some(outline_id.to_string()),
                        body: note.body.clone(),
                    },
                };
                insert_note(&tx, &note)?;
                self.operation_log.log(&tx, &op)?;
                let row = editor
                    .get(&note.id)
                    .cloned()
                    .ok_or_else(|| MarginaliaError::NoteNotFound(note.id.clone()))?;
                placed.insert(index, placed_note(note, row));
            }

            write_changes(&tx, &self.operation_log, reader_id, editor.into_changes(), now)?;
            version = bump_version(&tx, outline_id, summary.version, now)?;
            self.operation_log.purge_if_needed(&tx)?;
            commit_write(tx, outline_id)?;
            log::debug!(
                "outline {outline_id}: placed {} notes, version {version}",
                placed.len()
            );
        }

        let items = batch
            .notes
            .iter()
            .enumerate()
            .map(|(index, spec)| {
                let outcome = match (placed.remove(&index), failures.remove(&index)) {
                    (Some(note), _) => ItemOutcome::Placed(note),
                    (None, Some((kind, message))) => ItemOutcome::Failed { kind, message },
                    (None, None) => ItemOutcome::Failed {
                        kind: ItemErrorKind::Validation,
                        message: "Item was not processed".to_string(),
                    },
                };
                BatchItemResult {
                    key: spec.key.clone(),
                    outcome,
                }
            })
            .collect();

        Ok(BatchResult {
            outline_id: outline_id.to_string(),
            version,
            items,
        })
    }

    /// Moves a placed note (with its subtree) to a new location in the same outline.
    ///
    /// Without `target.parent_id` the note takes the parent of its anchor
    /// sibling, or becomes a root. Without any anchor it is appended to the
    /// end of its new sibling group.
    ///
    /// # Errors
    ///
    /// [`MarginaliaError::NoteNotFound`] if the note is not in the outline,
    /// [`MarginaliaError::ReferenceNotFound`] for unknown targets,
    /// [`MarginaliaError::InvalidSplice`] for moves under the note's own
    /// subtree, and [`MarginaliaError::Conflict`] for a stale version.
    pub fn move_note(
        &mut self,
        reader_id: &str,
        outline_id: &str,
        note_id: &str,
        target: &MoveTarget,
        expected_version: i64,
    ) -> Result<PlacedNote> {
        let strict = self.settings.strict_sibling_check;
        let now = chrono::Utc::now().timestamp();
        let tx = begin_write(self.storage.connection_mut(), outline_id)?;
        let summary = load_outline_summary(&tx, reader_id, outline_id)?;
        check_version(&summary, expected_version)?;

        let mut editor = ChainEditor::new(position::list_for_outline(&tx, outline_id)?);
        if !editor.contains(note_id) {
            return Err(MarginaliaError::NoteNotFound(note_id.to_string()));
        }
        for reference in [&target.previous, &target.next, &target.parent_id].into_iter().flatten() {
            if reference == note_id {
                return Err(MarginaliaError::InvalidSplice(format!(
                    "note {note_id} cannot be placed relative to itself"
                )));
            }
            if !editor.contains(reference) {
                return Err(MarginaliaError::ReferenceNotFound(reference.clone()));
            }
        }

        let parent = match &target.parent_id {
            Some(parent) => Some(parent.clone()),
            None => target
                .previous
                .as_ref()
                .or(target.next.as_ref())
                .and_then(|anchor| editor.get(anchor))
                .and_then(|anchor| anchor.parent_id.clone()),
        };
        if editor.creates_cycle(note_id, parent.as_deref()) {
            return Err(MarginaliaError::InvalidSplice(format!(
                "note {note_id} cannot be moved into its own subtree"
            )));
        }

        editor.unlink(note_id)?;
        editor.insert_run(
            &[note_id.to_string()],
            parent.as_deref(),
            target.previous.as_deref(),
            target.next.as_deref(),
        )?;
        verify_before_commit(&editor, outline_id, strict)?;

        let row = editor
            .get(note_id)
            .cloned()
            .ok_or_else(|| MarginaliaError::NoteNotFound(note_id.to_string()))?;
        let note = load_note(&tx, note_id)?
            .ok_or_else(|| MarginaliaError::NoteNotFound(note_id.to_string()))?;

        write_changes(&tx, &self.operation_log, reader_id, editor.into_changes(), now)?;
        let version = bump_version(&tx, outline_id, summary.version, now)?;
        self.operation_log.purge_if_needed(&tx)?;
        commit_write(tx, outline_id)?;
        log::debug!("outline {outline_id}: moved {note_id}, version {version}");

        Ok(placed_note(note, row))
    }

    /// Removes a note from an outline and closes the gap it leaves.
    ///
    /// Only position rows are soft-deleted; the notes themselves remain.
    ///
    /// # Errors
    ///
    /// [`MarginaliaError::NoteNotFound`] if the note is not in the outline and
    /// [`MarginaliaError::Conflict`] for a stale version.
    pub fn remove_note(
        &mut self,
        reader_id: &str,
        outline_id: &str,
        note_id: &str,
        strategy: DeleteStrategy,
        expected_version: i64,
    ) -> Result<DeleteResult> {
        let strict = self.settings.strict_sibling_check;
        let now = chrono::Utc::now().timestamp();
        let tx = begin_write(self.storage.connection_mut(), outline_id)?;
        let summary = load_outline_summary(&tx, reader_id, outline_id)?;
        check_version(&summary, expected_version)?;

        let mut editor = ChainEditor::new(position::list_for_outline(&tx, outline_id)?);
        let Some(row) = editor.get(note_id).cloned() else {
            return Err(MarginaliaError::NoteNotFound(note_id.to_string()));
        };

        match strategy {
            DeleteStrategy::DeleteAll => {
                let descendants = editor.descendants(note_id);
                editor.unlink(note_id)?;
                editor.remove(note_id);
                for id in &descendants {
                    editor.remove(id);
                }
            }
            DeleteStrategy::PromoteChildren => {
                let children = editor.children_of(note_id);
                editor.unlink(note_id)?;
                editor.remove(note_id);
                editor.insert_run(
                    &children,
                    row.parent_id.as_deref(),
                    row.previous.as_deref(),
                    row.next.as_deref(),
                )?;
            }
        }
        verify_before_commit(&editor, outline_id, strict)?;

        let changes = editor.into_changes();
        let deleted_count = changes.removed.len();
        let affected_ids: Vec<String> = changes
            .removed
            .iter()
            .cloned()
            .chain(changes.updated.iter().map(|p| p.note_id.clone()))
            .collect();

        write_changes(&tx, &self.operation_log, reader_id, changes, now)?;
        let version = bump_version(&tx, outline_id, summary.version, now)?;
        self.operation_log.purge_if_needed(&tx)?;
        commit_write(tx, outline_id)?;
        log::debug!("outline {outline_id}: removed {deleted_count} notes, version {version}");

        Ok(DeleteResult {
            deleted_count,
            affected_ids,
        })
    }

    // ── Operations log queries ───────────────────────────────────────

    /// Returns operation summaries matching the given filters, newest first.
    pub fn list_operations(
        &self,
        type_filter: Option<&str>,
        since: Option<i64>,
        until: Option<i64>,
    ) -> Result<Vec<OperationSummary>> {
        self.operation_log.list(self.connection(), type_filter, since, until)
    }

    /// Deletes all operations from the log. Returns the number deleted.
    pub fn purge_all_operations(&self) -> Result<usize> {
        self.operation_log.purge_all(self.connection())
    }
}

/// Linearizes and nests one outline's rows.
fn assemble(
    positions: &[Position],
    notes: HashMap<String, Note>,
    strict: bool,
) -> std::result::Result<Vec<OutlineNode>, Corruption> {
    let ordered = if strict {
        linearize_strict(positions)?
    } else {
        linearize(positions)?
    };
    build_forest(&ordered, notes)
}

/// Opens the immediate transaction a structural write runs in.
fn begin_write<'c>(conn: &'c mut Connection, outline_id: &str) -> Result<Transaction<'c>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| MarginaliaError::from_write_lock(e, outline_id))
}

fn commit_write(tx: Transaction<'_>, outline_id: &str) -> Result<()> {
    tx.commit()
        .map_err(|e| MarginaliaError::from_write_lock(e, outline_id))
}

fn verify_before_commit(editor: &ChainEditor, outline_id: &str, strict: bool) -> Result<()> {
    editor.verify(strict).map_err(|corruption| {
        log::error!("outline {outline_id}: mutation would leave a corrupt chain: {corruption}");
        MarginaliaError::StructuralCorruption(corruption)
    })
}

fn check_version(summary: &OutlineSummary, expected: i64) -> Result<()> {
    if summary.version != expected {
        log::warn!(
            "outline {}: stale write at version {expected}, current is {}",
            summary.id,
            summary.version
        );
        return Err(MarginaliaError::Conflict {
            expected,
            actual: summary.version,
        });
    }
    Ok(())
}

/// Compare-and-swap on the outline version. Returns the new version.
fn bump_version(conn: &Connection, outline_id: &str, expected: i64, now: i64) -> Result<i64> {
    let changed = conn.execute(
        "UPDATE outlines SET version = version + 1, modified_at = ?1 WHERE id = ?2 AND version = ?3",
        rusqlite::params![now, outline_id, expected],
    )?;
    if changed != 1 {
        let actual: i64 = conn.query_row(
            "SELECT version FROM outlines WHERE id = ?",
            [outline_id],
            |row| row.get(0),
        )?;
        return Err(MarginaliaError::Conflict { expected, actual });
    }
    Ok(expected + 1)
}

/// Writes an editor's changes and logs one operation per touched position.
fn write_changes(
    conn: &Connection,
    operation_log: &OperationLog,
    reader_id: &str,
    changes: ChainChanges,
    now: i64,
) -> Result<()> {
    for row in &changes.inserted {
        position::insert(conn, row, now)?;
    }
    for row in &changes.updated {
        if !position::update(conn, row, now)? {
            return Err(MarginaliaError::NoteNotFound(row.note_id.clone()));
        }
    }
    for row in changes.inserted.iter().chain(changes.updated.iter()) {
        let op = Operation::PlaceNote {
            operation_id: Uuid::new_v4().to_string(),
            timestamp: now,
            reader_id: reader_id.to_string(),
            outline_id: row.outline_id.clone(),
            note_id: row.note_id.clone(),
            previous: row.previous.clone(),
            next: row.next.clone(),
            parent_id: row.parent_id.clone(),
        };
        operation_log.log(conn, &op)?;
    }
    for note_id in &changes.removed {
        let outline_id: Option<String> = conn
            .query_row(
                "SELECT outline_id FROM positions WHERE note_id = ? AND deleted_at IS NULL",
                [note_id],
                |row| row.get(0),
            )
            .optional()?;
        position::soft_delete(conn, note_id, now)?;
        let op = Operation::RemoveNote {
            operation_id: Uuid::new_v4().to_string(),
            timestamp: now,
            reader_id: reader_id.to_string(),
            outline_id: outline_id.unwrap_or_default(),
            note_id: note_id.clone(),
        };
        operation_log.log(conn, &op)?;
    }
    Ok(())
}

/// Outcome of preparing one batch item: the note to insert (and its clone
/// source), or the item's own failure.
type Prepared = std::result::Result<(Note, Option<String>), (ItemErrorKind, String)>;

fn prepare_note(conn: &Connection, reader_id: &str, spec: &NoteSpec, now: i64) -> Result<Prepared> {
    match &spec.source {
        NoteSource::New(draft) => Ok(match draft.validate() {
            Ok(()) => Ok((note_from_draft(reader_id, draft.clone(), now), None)),
            Err(message) => Err((ItemErrorKind::Validation, message)),
        }),
        NoteSource::Clone { original } => match load_note(conn, original)? {
            Some(source) if source.reader_id == reader_id => {
                let note = Note {
                    id: Uuid::new_v4().to_string(),
                    reader_id: reader_id.to_string(),
                    body: source.body,
                    metadata: source.metadata,
                    attachments: source.attachments,
                    tags: source.tags,
                    created_at: now,
                    modified_at: now,
                };
                Ok(Ok((note, Some(original.clone()))))
            }
            _ => Ok(Err((
                ItemErrorKind::NotFound,
                format!("Note not found: {original}"),
            ))),
        },
    }
}

fn note_from_draft(reader_id: &str, draft: NoteDraft, now: i64) -> Note {
    Note {
        id: Uuid::new_v4().to_string(),
        reader_id: reader_id.to_string(),
        body: draft.body,
        metadata: draft.metadata,
        attachments: draft.attachments,
        tags: normalise_tags(draft.tags),
        created_at: now,
        modified_at: now,
    }
}

fn placed_note(note: Note, row: Position) -> PlacedNote {
    PlacedNote {
        note,
        previous: row.previous,
        next: row.next,
        parent_id: row.parent_id,
    }
}

fn insert_note(conn: &Connection, note: &Note) -> Result<()> {
    conn.execute(
        "INSERT INTO notes (id, reader_id, body, metadata_json, attachments_json, created_at, modified_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            note.id,
            note.reader_id,
            note.body,
            serde_json::to_string(&note.metadata)?,
            serde_json::to_string(&note.attachments)?,
            note.created_at,
            note.modified_at,
        ],
    )?;
    for tag in &note.tags {
        conn.execute(
            "INSERT INTO note_tags (note_id, tag) VALUES (?, ?)",
            rusqlite::params![note.id, tag],
        )?;
    }
    Ok(())
}

fn map_outline_row(row: &rusqlite::Row) -> rusqlite::Result<OutlineSummary> {
    Ok(OutlineSummary {
        id: row.get(0)?,
        reader_id: row.get(1)?,
        title: row.get(2)?,
        version: row.get(3)?,
        created_at: row.get(4)?,
        modified_at: row.get(5)?,
    })
}

fn load_outline_summary(conn: &Connection, reader_id: &str, outline_id: &str) -> Result<OutlineSummary> {
    conn.query_row(
        "SELECT id, reader_id, title, version, created_at, modified_at
         FROM outlines
         WHERE id = ?1 AND reader_id = ?2 AND deleted_at IS NULL",
        [outline_id, reader_id],
        map_outline_row,
    )
    .optional()?
    .ok_or_else(|| MarginaliaError::OutlineNotFound(outline_id.to_string()))
}

fn load_note(conn: &Connection, note_id: &str) -> Result<Option<Note>> {
    let row = conn
        .query_row(
            "SELECT id, reader_id, body, metadata_json, attachments_json, created_at, modified_at
             FROM notes
             WHERE id = ?",
            [note_id],
            |row| map_note_row(row, 0),
        )
        .optional()?;
    let Some(row) = row else {
        return Ok(None);
    };

    let mut stmt = conn.prepare("SELECT tag FROM note_tags WHERE note_id = ? ORDER BY tag")?;
    let tags = stmt
        .query_map([note_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    note_from_row_tuple(row, tags).map(Some)
}

/// Loads the live positions of an outline and the notes they place.
///
/// Positions whose note row is missing are still returned so the forest
/// builder reports them instead of silently dropping them.
fn load_outline_rows(conn: &Connection, outline_id: &str) -> Result<(Vec<Position>, HashMap<String, Note>)> {
    let mut stmt = conn.prepare(
        "SELECT p.note_id, p.outline_id, p.reader_id, p.previous_id, p.next_id, p.parent_id,
                n.id, n.reader_id, n.body, n.metadata_json, n.attachments_json,
                n.created_at, n.modified_at
         FROM positions p
         LEFT JOIN notes n ON n.id = p.note_id
         WHERE p.outline_id = ?1 AND p.deleted_at IS NULL
         ORDER BY p.created_at, p.rowid",
    )?;
    let rows = stmt
        .query_map([outline_id], |row| {
            let position = Position {
                note_id: row.get(0)?,
                outline_id: row.get(1)?,
                reader_id: row.get(2)?,
                previous: row.get(3)?,
                next: row.get(4)?,
                parent_id: row.get(5)?,
            };
            let note = match row.get::<_, Option<String>>(6)? {
                Some(_) => Some(map_note_row(row, 6)?),
                None => None,
            };
            Ok((position, note))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut tag_stmt = conn.prepare(
        "SELECT nt.note_id, nt.tag
         FROM note_tags nt
         JOIN positions p ON p.note_id = nt.note_id
         WHERE p.outline_id = ?1 AND p.deleted_at IS NULL
         ORDER BY nt.tag",
    )?;
    let mut tags_by_note: HashMap<String, Vec<String>> = HashMap::new();
    let tag_rows = tag_stmt.query_map([outline_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for tag_row in tag_rows {
        let (note_id, tag) = tag_row?;
        tags_by_note.entry(note_id).or_default().push(tag);
    }

    let mut positions = Vec::with_capacity(rows.len());
    let mut notes = HashMap::with_capacity(rows.len());
    for (position, note_row) in rows {
        if let Some(note_row) = note_row {
            let tags = tags_by_note.remove(&position.note_id).unwrap_or_default();
            let note = note_from_row_tuple(note_row, tags)?;
            notes.insert(note.id.clone(), note);
        }
        positions.push(position);
    }
    Ok((positions, notes))
}

/// Raw 7-column tuple extracted from a `notes` row.
type NoteRow = (String, String, String, String, String, i64, i64);

/// Reads the note columns starting at column `offset`.
fn map_note_row(row: &rusqlite::Row, offset: usize) -> rusqlite::Result<NoteRow> {
    Ok((
        row.get::<_, String>(offset)?,
        row.get::<_, String>(offset + 1)?,
        row.get::<_, String>(offset + 2)?,
        row.get::<_, String>(offset + 3)?,
        row.get::<_, String>(offset + 4)?,
        row.get::<_, i64>(offset + 5)?,
        row.get::<_, i64>(offset + 6)?,
    ))
}

/// Converts a raw tuple into a [`Note`], parsing the JSON columns.
///
/// `tags` are read from `note_tags` one row per tag, already sorted.
fn note_from_row_tuple(
    (id, reader_id, body, metadata_json, attachments_json, created_at, modified_at): NoteRow,
    tags: Vec<String>,
) -> Result<Note> {
    Ok(Note {
        id,
        reader_id,
        body,
        metadata: serde_json::from_str(&metadata_json)?,
        attachments: serde_json::from_str(&attachments_json)?,
        tags,
        created_at,
        modified_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FieldValue;
    use tempfile::NamedTempFile;

    const READER: &str = "reader-1";

    fn setup() -> (Workspace, String) {
        let mut ws = Workspace::open_in_memory().unwrap();
        let outline = ws.create_outline(READER, "Reading notes").unwrap();
        (ws, outline.id)
    }

    fn version(ws: &Workspace, outline_id: &str) -> i64 {
        ws.get_outline_summary(READER, outline_id).unwrap().version
    }

    fn batch(ws: &Workspace, outline_id: &str, notes: Vec<NoteSpec>) -> OutlineBatch {
        OutlineBatch {
            expected_version: version(ws, outline_id),
            notes,
        }
    }

    fn new(key: &str) -> NoteSpec {
        NoteSpec::new(key, NoteDraft::new(format!("body {key}")))
    }

    fn placed_id(result: &BatchResult, key: &str) -> String {
        result.item(key).unwrap().placed().unwrap().note.id.clone()
    }

    /// Root bodies in order.
    fn root_bodies(outline: &Outline) -> Vec<String> {
        outline.notes.iter().map(|n| n.note.body.clone()).collect()
    }

    /// Adds a flat root chain of notes with the given keys and returns their ids.
    fn seed_chain(ws: &mut Workspace, outline_id: &str, keys: &[&str]) -> Vec<String> {
        let mut specs = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            let mut spec = new(key);
            if i > 0 {
                spec = spec.after(keys[i - 1]);
            }
            specs.push(spec);
        }
        let request = batch(ws, outline_id, specs);
        let result = ws.add_notes(READER, outline_id, &request).unwrap();
        keys.iter().map(|k| placed_id(&result, k)).collect()
    }

    #[test]
    fn test_create_workspace_on_disk_and_reopen() {
        let temp = NamedTempFile::new().unwrap();
        let outline_id = {
            let mut ws = Workspace::create(temp.path()).unwrap();
            let outline = ws.create_outline(READER, "Persisted").unwrap();
            seed_chain(&mut ws, &outline.id, &["a", "b"]);
            outline.id
        };

        let ws = Workspace::open(temp.path()).unwrap();
        let outline = ws.get_outline(READER, &outline_id).unwrap();
        assert_eq!(root_bodies(&outline), vec!["body a", "body b"]);
    }

    #[test]
    fn test_open_rejects_newer_schema() {
        let temp = NamedTempFile::new().unwrap();
        {
            let ws = Workspace::create(temp.path()).unwrap();
            ws.connection()
                .execute("UPDATE workspace_meta SET value = '99' WHERE key = 'schema_version'", [])
                .unwrap();
        }
        assert!(matches!(
            Workspace::open(temp.path()),
            Err(MarginaliaError::InvalidWorkspace(_))
        ));
    }

    #[test]
    fn test_new_outline_is_empty() {
        let (ws, outline_id) = setup();
        let outline = ws.get_outline(READER, &outline_id).unwrap();
        assert!(outline.is_empty());
        assert_eq!(outline.version(), 0);
        assert_eq!(outline.summary.title, "Reading notes");
    }

    #[test]
    fn test_create_outline_rejects_blank_title() {
        let mut ws = Workspace::open_in_memory().unwrap();
        assert!(matches!(
            ws.create_outline(READER, "  "),
            Err(MarginaliaError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_outline_is_scoped_to_reader() {
        let (ws, outline_id) = setup();
        assert!(matches!(
            ws.get_outline("someone-else", &outline_id),
            Err(MarginaliaError::OutlineNotFound(_))
        ));
        assert!(ws.list_outlines("someone-else").unwrap().is_empty());
        assert_eq!(ws.list_outlines(READER).unwrap().len(), 1);
    }

    #[test]
    fn test_deleted_outline_is_terminal_but_notes_survive() {
        let (mut ws, outline_id) = setup();
        let ids = seed_chain(&mut ws, &outline_id, &["a"]);
        ws.delete_outline(READER, &outline_id).unwrap();

        assert!(matches!(
            ws.get_outline(READER, &outline_id),
            Err(MarginaliaError::OutlineNotFound(_))
        ));
        let request = OutlineBatch { expected_version: 1, notes: vec![new("b")] };
        assert!(matches!(
            ws.add_notes(READER, &outline_id, &request),
            Err(MarginaliaError::OutlineNotFound(_))
        ));
        assert!(ws.list_outlines(READER).unwrap().is_empty());
        assert_eq!(ws.get_note(&ids[0]).unwrap().body, "body a");
    }

    #[test]
    fn test_unknown_outline_is_not_found() {
        let (mut ws, _) = setup();
        let request = OutlineBatch { expected_version: 0, notes: vec![new("a")] };
        assert!(matches!(
            ws.add_notes(READER, "no-such-outline", &request),
            Err(MarginaliaError::OutlineNotFound(_))
        ));
    }

    #[test]
    fn test_create_and_get_note() {
        let (mut ws, _) = setup();
        let mut draft = NoteDraft::new("Chapter one");
        draft.metadata.insert("page".into(), FieldValue::Number(12.0));
        draft.attachments.push("files/scan-1.png".into());
        draft.tags = vec!["Fiction".into(), " fiction ".into()];
        let note = ws.create_note(READER, draft).unwrap();

        let loaded = ws.get_note(&note.id).unwrap();
        assert_eq!(loaded, note);
        assert_eq!(loaded.tags, vec!["fiction"]);
        assert_eq!(loaded.metadata["page"], FieldValue::Number(12.0));
        assert!(matches!(ws.get_note("missing"), Err(MarginaliaError::NoteNotFound(_))));
    }

    #[test]
    fn test_create_note_rejects_empty_body() {
        let (mut ws, _) = setup();
        assert!(matches!(
            ws.create_note(READER, NoteDraft::new("")),
            Err(MarginaliaError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_note_tags_round_trip() {
        let (mut ws, _) = setup();
        let note = ws.create_note(READER, NoteDraft::new("tagged")).unwrap();
        let tags = ws
            .update_note_tags(READER, &note.id, vec!["  Rust  ".into(), "RUST".into(), "design".into()])
            .unwrap();
        assert_eq!(tags, vec!["design", "rust"]);
        assert_eq!(ws.get_note(&note.id).unwrap().tags, vec!["design", "rust"]);
        assert_eq!(ws.get_all_tags(READER).unwrap(), vec!["design", "rust"]);
        assert!(ws.get_all_tags("other").unwrap().is_empty());

        assert!(matches!(
            ws.update_note_tags("other", &note.id, vec!["x".into()]),
            Err(MarginaliaError::NoteNotFound(_))
        ));
    }

    #[test]
    fn test_add_notes_bumps_version_once() {
        let (mut ws, outline_id) = setup();
        let request = batch(&ws, &outline_id, vec![new("a"), new("b").after("a")]);
        let result = ws.add_notes(READER, &outline_id, &request).unwrap();
        assert_eq!(result.version, 1);
        assert_eq!(version(&ws, &outline_id), 1);
        assert_eq!(result.placed_count(), 2);
    }

    #[test]
    fn test_unanchored_notes_append_to_roots() {
        let (mut ws, outline_id) = setup();
        seed_chain(&mut ws, &outline_id, &["a", "b"]);
        let request = batch(&ws, &outline_id, vec![new("c")]);
        ws.add_notes(READER, &outline_id, &request).unwrap();

        let outline = ws.get_outline(READER, &outline_id).unwrap();
        assert_eq!(root_bodies(&outline), vec!["body a", "body b", "body c"]);
    }

    #[test]
    fn test_insert_before_first_note() {
        let (mut ws, outline_id) = setup();
        let ids = seed_chain(&mut ws, &outline_id, &["a", "b"]);
        let request = batch(&ws, &outline_id, vec![new("z").before(ids[0].as_str())]);
        let result = ws.add_notes(READER, &outline_id, &request).unwrap();

        let z = result.item("z").unwrap().placed().unwrap();
        assert_eq!(z.previous, None);
        assert_eq!(z.next.as_deref(), Some(ids[0].as_str()));
        let outline = ws.get_outline(READER, &outline_id).unwrap();
        assert_eq!(root_bodies(&outline), vec!["body z", "body a", "body b"]);
    }

    #[test]
    fn test_stale_version_is_conflict_and_writes_nothing() {
        let (mut ws, outline_id) = setup();
        seed_chain(&mut ws, &outline_id, &["a"]);
        let request = OutlineBatch { expected_version: 0, notes: vec![new("b")] };
        let err = ws.add_notes(READER, &outline_id, &request).unwrap_err();
        assert!(matches!(err, MarginaliaError::Conflict { expected: 0, actual: 1 }));
        assert!(err.is_retryable());
        assert_eq!(ws.get_outline(READER, &outline_id).unwrap().note_count(), 1);
    }

    #[test]
    fn test_batch_too_large() {
        let ws = Workspace::open_in_memory().unwrap();
        let mut ws = ws.with_settings(EngineSettings {
            max_batch_size: 2,
            ..EngineSettings::default()
        });
        let outline = ws.create_outline(READER, "Small").unwrap();
        let request = OutlineBatch {
            expected_version: 0,
            notes: vec![new("a"), new("b"), new("c")],
        };
        assert!(matches!(
            ws.add_notes(READER, &outline.id, &request),
            Err(MarginaliaError::BatchTooLarge { size: 3, limit: 2 })
        ));
    }

    #[test]
    fn test_invalid_body_fails_only_its_item() {
        let (mut ws, outline_id) = setup();
        let request = batch(
            &ws,
            &outline_id,
            vec![new("good"), NoteSpec::new("bad", NoteDraft::new("   "))],
        );
        let result = ws.add_notes(READER, &outline_id, &request).unwrap();

        assert!(result.item("good").unwrap().is_placed());
        assert!(matches!(
            result.item("bad").unwrap(),
            ItemOutcome::Failed { kind: ItemErrorKind::Validation, .. }
        ));
        assert_eq!(ws.get_outline(READER, &outline_id).unwrap().note_count(), 1);
    }

    #[test]
    fn test_dependency_on_failed_item_aborts_batch() {
        let (mut ws, outline_id) = setup();
        let request = batch(
            &ws,
            &outline_id,
            vec![
                NoteSpec::new("bad", NoteDraft::new("")),
                new("good").after("bad"),
            ],
        );
        let err = ws.add_notes(READER, &outline_id, &request).unwrap_err();
        assert!(matches!(err, MarginaliaError::ReferenceNotFound(_)));
        assert_eq!(err.status_code(), 404);
        assert_eq!(version(&ws, &outline_id), 0);
        assert!(ws.get_outline(READER, &outline_id).unwrap().is_empty());
    }

    #[test]
    fn test_all_items_failing_leaves_version_alone() {
        let (mut ws, outline_id) = setup();
        let request = batch(&ws, &outline_id, vec![NoteSpec::clone_of("c", "ghost-note")]);
        let result = ws.add_notes(READER, &outline_id, &request).unwrap();
        assert_eq!(result.version, 0);
        assert!(matches!(
            result.item("c").unwrap(),
            ItemOutcome::Failed { kind: ItemErrorKind::NotFound, .. }
        ));
    }

    #[test]
    fn test_unknown_reference_names_it() {
        let (mut ws, outline_id) = setup();
        let request = batch(&ws, &outline_id, vec![new("a").after("phantom")]);
        match ws.add_notes(READER, &outline_id, &request) {
            Err(MarginaliaError::ReferenceNotFound(r)) => assert_eq!(r, "phantom"),
            other => panic!("expected ReferenceNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_keys_rejected() {
        let (mut ws, outline_id) = setup();
        let request = batch(&ws, &outline_id, vec![new("a"), new("a")]);
        assert!(matches!(
            ws.add_notes(READER, &outline_id, &request),
            Err(MarginaliaError::ValidationFailed(_))
        ));
    }

    #[test]
    fn test_clone_of_other_readers_note_fails_item() {
        let (mut ws, outline_id) = setup();
        let foreign = ws.create_note("reader-2", NoteDraft::new("not yours")).unwrap();
        let request = batch(&ws, &outline_id, vec![NoteSpec::clone_of("c", foreign.id.as_str())]);
        let result = ws.add_notes(READER, &outline_id, &request).unwrap();
        assert!(!result.item("c").unwrap().is_placed());
    }

    #[test]
    fn test_note_in_other_outline_is_not_a_valid_anchor() {
        let (mut ws, outline_id) = setup();
        let other = ws.create_outline(READER, "Other").unwrap();
        let ids = seed_chain(&mut ws, &other.id, &["x"]);
        let request = batch(&ws, &outline_id, vec![new("a").after(ids[0].as_str())]);
        assert!(matches!(
            ws.add_notes(READER, &outline_id, &request),
            Err(MarginaliaError::ReferenceNotFound(_))
        ));
    }

    #[test]
    fn test_nested_batch_builds_tree() {
        let (mut ws, outline_id) = setup();
        let request = batch(
            &ws,
            &outline_id,
            vec![
                new("h1"),
                new("h2").after("h1"),
                new("k1").under("h1"),
                new("k2").after("k1"),
            ],
        );
        ws.add_notes(READER, &outline_id, &request).unwrap();

        let outline = ws.get_outline(READER, &outline_id).unwrap();
        assert_eq!(root_bodies(&outline), vec!["body h1", "body h2"]);
        let kids: Vec<&str> = outline.notes[0].children.iter().map(|c| c.note.body.as_str()).collect();
        assert_eq!(kids, vec!["body k1", "body k2"]);
        assert!(outline.notes[1].is_leaf());
    }

    #[test]
    fn test_move_note_reorders_siblings() {
        let (mut ws, outline_id) = setup();
        let ids = seed_chain(&mut ws, &outline_id, &["a", "b", "c"]);
        let target = MoveTarget {
            previous: None,
            next: Some(ids[0].clone()),
            parent_id: None,
        };
        let placed = ws
            .move_note(READER, &outline_id, &ids[2], &target, version(&ws, &outline_id))
            .unwrap();
        assert_eq!(placed.next.as_deref(), Some(ids[0].as_str()));

        let outline = ws.get_outline(READER, &outline_id).unwrap();
        assert_eq!(root_bodies(&outline), vec!["body c", "body a", "body b"]);
    }

    #[test]
    fn test_move_note_under_new_parent_carries_subtree() {
        let (mut ws, outline_id) = setup();
        let ids = seed_chain(&mut ws, &outline_id, &["a", "b"]);
        let request = batch(&ws, &outline_id, vec![new("b1").under(ids[1].as_str())]);
        ws.add_notes(READER, &outline_id, &request).unwrap();

        let target = MoveTarget {
            parent_id: Some(ids[0].clone()),
            ..MoveTarget::default()
        };
        ws.move_note(READER, &outline_id, &ids[1], &target, version(&ws, &outline_id))
            .unwrap();

        let outline = ws.get_outline(READER, &outline_id).unwrap();
        assert_eq!(root_bodies(&outline), vec!["body a"]);
        let b = &outline.notes[0].children[0];
        assert_eq!(b.note.id, ids[1]);
        assert_eq!(b.children[0].note.body, "body b1");
    }

    #[test]
    fn test_move_note_into_own_subtree_is_rejected() {
        let (mut ws, outline_id) = setup();
        let ids = seed_chain(&mut ws, &outline_id, &["a"]);
        let request = batch(&ws, &outline_id, vec![new("child").under(ids[0].as_str())]);
        let result = ws.add_notes(READER, &outline_id, &request).unwrap();
        let child = placed_id(&result, "child");

        let target = MoveTarget {
            parent_id: Some(child),
            ..MoveTarget::default()
        };
        let err = ws
            .move_note(READER, &outline_id, &ids[0], &target, version(&ws, &outline_id))
            .unwrap_err();
        assert!(matches!(err, MarginaliaError::InvalidSplice(_)));
    }

    #[test]
    fn test_move_note_with_stale_version() {
        let (mut ws, outline_id) = setup();
        let ids = seed_chain(&mut ws, &outline_id, &["a", "b"]);
        let err = ws
            .move_note(READER, &outline_id, &ids[1], &MoveTarget::default(), 0)
            .unwrap_err();
        assert!(matches!(err, MarginaliaError::Conflict { .. }));
    }

    #[test]
    fn test_remove_note_delete_all_closes_gap() {
        let (mut ws, outline_id) = setup();
        let ids = seed_chain(&mut ws, &outline_id, &["a", "b", "c"]);
        let request = batch(&ws, &outline_id, vec![new("b1").under(ids[1].as_str())]);
        let result = ws.add_notes(READER, &outline_id, &request).unwrap();
        let b1 = placed_id(&result, "b1");

        let removed = ws
            .remove_note(READER, &outline_id, &ids[1], DeleteStrategy::DeleteAll, version(&ws, &outline_id))
            .unwrap();
        assert_eq!(removed.deleted_count, 2);
        assert!(removed.affected_ids.contains(&b1));
        assert!(removed.affected_ids.contains(&ids[0]));

        let outline = ws.get_outline(READER, &outline_id).unwrap();
        assert_eq!(root_bodies(&outline), vec!["body a", "body c"]);
        // Notes themselves are not destroyed.
        assert_eq!(ws.get_note(&b1).unwrap().body, "body b1");
    }

    #[test]
    fn test_remove_note_promote_children_fills_slot() {
        let (mut ws, outline_id) = setup();
        let ids = seed_chain(&mut ws, &outline_id, &["a", "b", "c"]);
        let request = batch(
            &ws,
            &outline_id,
            vec![new("b1").under(ids[1].as_str()), new("b2").after("b1")],
        );
        ws.add_notes(READER, &outline_id, &request).unwrap();

        let removed = ws
            .remove_note(
                READER,
                &outline_id,
                &ids[1],
                DeleteStrategy::PromoteChildren,
                version(&ws, &outline_id),
            )
            .unwrap();
        assert_eq!(removed.deleted_count, 1);

        let outline = ws.get_outline(READER, &outline_id).unwrap();
        assert_eq!(
            root_bodies(&outline),
            vec!["body a", "body b1", "body b2", "body c"]
        );
    }

    #[test]
    fn test_removed_note_can_be_cloned_back() {
        let (mut ws, outline_id) = setup();
        let ids = seed_chain(&mut ws, &outline_id, &["a"]);
        ws.remove_note(READER, &outline_id, &ids[0], DeleteStrategy::DeleteAll, 1)
            .unwrap();
        assert!(ws.get_outline(READER, &outline_id).unwrap().is_empty());

        let request = batch(&ws, &outline_id, vec![NoteSpec::clone_of("again", ids[0].as_str())]);
        let result = ws.add_notes(READER, &outline_id, &request).unwrap();
        assert!(result.item("again").unwrap().is_placed());
    }

    #[test]
    fn test_remove_missing_note() {
        let (mut ws, outline_id) = setup();
        assert!(matches!(
            ws.remove_note(READER, &outline_id, "nope", DeleteStrategy::DeleteAll, 0),
            Err(MarginaliaError::NoteNotFound(_))
        ));
    }

    #[test]
    fn test_corrupt_chain_is_reported_as_circular() {
        let (mut ws, outline_id) = setup();
        let ids = seed_chain(&mut ws, &outline_id, &["a", "b"]);
        ws.connection()
            .execute(
                "UPDATE positions SET next_id = ?1 WHERE note_id = ?2",
                [&ids[0], &ids[1]],
            )
            .unwrap();

        match ws.get_outline(READER, &outline_id) {
            Err(MarginaliaError::StructuralCorruption(c)) => assert!(c.is_circular(), "got {c:?}"),
            other => panic!("expected corruption, got {other:?}"),
        }
    }

    #[test]
    fn test_corrupt_chain_is_reported_as_dangling() {
        let (mut ws, outline_id) = setup();
        let ids = seed_chain(&mut ws, &outline_id, &["a"]);
        ws.connection()
            .execute("UPDATE positions SET next_id = 'ghost' WHERE note_id = ?1", [&ids[0]])
            .unwrap();

        match ws.get_outline(READER, &outline_id) {
            Err(MarginaliaError::StructuralCorruption(c)) => {
                assert_eq!(c, Corruption::DanglingNext("ghost".into()));
            }
            other => panic!("expected corruption, got {other:?}"),
        }

        // A corrupt outline also refuses further structural writes.
        let request = batch(&ws, &outline_id, vec![new("b")]);
        assert!(matches!(
            ws.add_notes(READER, &outline_id, &request),
            Err(MarginaliaError::StructuralCorruption(_))
        ));
    }

    #[test]
    fn test_strict_sibling_check_setting() {
        let (mut ws, outline_id) = setup();
        let ids = seed_chain(&mut ws, &outline_id, &["a", "b"]);
        // b claims a parent while still chained to root a.
        ws.connection()
            .execute(
                "UPDATE positions SET parent_id = ?1 WHERE note_id = ?2",
                [&ids[0], &ids[1]],
            )
            .unwrap();
        assert!(ws.get_outline(READER, &outline_id).is_ok());

        let ws = ws.with_settings(EngineSettings {
            strict_sibling_check: true,
            ..EngineSettings::default()
        });
        assert!(matches!(
            ws.get_outline(READER, &outline_id),
            Err(MarginaliaError::StructuralCorruption(Corruption::ParentMismatch { .. }))
        ));
    }

    #[test]
    fn test_tags_with_commas_survive_clone() {
        let (mut ws, outline_id) = setup();
        let mut draft = NoteDraft::new("Letters");
        draft.tags = vec!["smith, john".to_string(), "ideas".to_string()];
        let request = batch(&ws, &outline_id, vec![NoteSpec::new("o", draft)]);
        let result = ws.add_notes(READER, &outline_id, &request).unwrap();
        let original = result.item("o").unwrap().placed().unwrap().note.clone();
        assert_eq!(original.tags, vec!["ideas", "smith, john"]);
        assert_eq!(ws.get_note(&original.id).unwrap().tags, original.tags);

        let request = batch(&ws, &outline_id, vec![NoteSpec::clone_of("c", original.id.as_str())]);
        let result = ws.add_notes(READER, &outline_id, &request).unwrap();
        let copy = result.item("c").unwrap().placed().unwrap();
        assert_eq!(copy.note.tags, original.tags);
        assert_eq!(ws.get_note(&copy.note.id).unwrap().tags, original.tags);

        let outline = ws.get_outline(READER, &outline_id).unwrap();
        for (_, note) in outline.walk_depth_first() {
            assert_eq!(note.tags, vec!["ideas", "smith, john"]);
        }
    }

    fn two_connections() -> (Workspace, Workspace, String, NamedTempFile) {
        let temp = NamedTempFile::new().unwrap();
        let mut writer = Workspace::create(temp.path()).unwrap();
        let outline_id = writer.create_outline(READER, "Shared").unwrap().id;
        let other = Workspace::open(temp.path()).unwrap();
        (writer, other, outline_id, temp)
    }

    #[test]
    fn test_write_lock_held_elsewhere_is_busy() {
        let (mut writer, other, outline_id, _temp) = two_connections();
        writer
            .connection()
            .busy_timeout(std::time::Duration::from_millis(50))
            .unwrap();
        other.connection().execute_batch("BEGIN IMMEDIATE").unwrap();

        let request = OutlineBatch { expected_version: 0, notes: vec![new("a")] };
        let err = writer.add_notes(READER, &outline_id, &request).unwrap_err();
        assert!(matches!(err, MarginaliaError::Busy(ref id) if *id == outline_id), "got {err:?}");
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), 409);

        other.connection().execute_batch("ROLLBACK").unwrap();
        let result = writer.add_notes(READER, &outline_id, &request).unwrap();
        assert_eq!(result.version, 1);
    }

    #[test]
    fn test_open_reader_does_not_block_writer() {
        let (mut writer, other, outline_id, _temp) = two_connections();
        writer
            .connection()
            .busy_timeout(std::time::Duration::from_millis(50))
            .unwrap();
        let count = |ws: &Workspace| -> i64 {
            ws.connection()
                .query_row("SELECT COUNT(*) FROM positions", [], |row| row.get(0))
                .unwrap()
        };

        other.connection().execute_batch("BEGIN").unwrap();
        assert_eq!(count(&other), 0);

        let request = OutlineBatch { expected_version: 0, notes: vec![new("a")] };
        writer.add_notes(READER, &outline_id, &request).unwrap();

        // The reader keeps its snapshot until it ends its transaction.
        assert_eq!(count(&other), 0);
        other.connection().execute_batch("COMMIT").unwrap();
        assert_eq!(count(&other), 1);
    }

    #[test]
    fn test_mutations_are_logged() {
        let (mut ws, outline_id) = setup();
        let ids = seed_chain(&mut ws, &outline_id, &["a", "b"]);
        ws.remove_note(READER, &outline_id, &ids[0], DeleteStrategy::DeleteAll, 1)
            .unwrap();

        let creates = ws.list_operations(Some("CreateNote"), None, None).unwrap();
        assert_eq!(creates.len(), 2);
        let removes = ws.list_operations(Some("RemoveNote"), None, None).unwrap();
        assert_eq!(removes.len(), 1);
        // a and b inserted, then b rewritten when a was removed.
        let places = ws.list_operations(Some("PlaceNote"), None, None).unwrap();
        assert_eq!(places.len(), 3);
        assert!(ws.list_operations(Some("CreateOutline"), None, None).unwrap().len() == 1);

        assert!(ws.purge_all_operations().unwrap() > 0);
        assert!(ws.list_operations(None, None, None).unwrap().is_empty());
    }
}
