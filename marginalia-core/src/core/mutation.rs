//! Request and response types for batch outline mutations, and the planner
//! that wires a batch's pointers into an outline's chains.
//!
//! ## Reference resolution
//!
//! Each [`NoteSpec`] carries a client-chosen `key`. A `previous`, `next` or
//! `parentId` value is looked up first among the batch keys, then among the
//! notes already placed in the outline. Anything else is
//! [`MarginaliaError::ReferenceNotFound`] and aborts the whole batch, as does
//! a reference to a batch item that failed its own validation.
//!
//! ## Splicing
//!
//! New notes that point at each other form runs. Each run is spliced as a unit
//! at its anchors (see [`ChainEditor::insert_run`]); a run without anchors is
//! appended to the end of its parent's sibling group. A run takes the parent
//! its members name explicitly, or else the parent of its anchor sibling, or
//! else becomes a root run.

use crate::core::note::{Note, NoteDraft};
use crate::core::position::Position;
use crate::core::splice::ChainEditor;
use crate::{MarginaliaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// What a batch item brings into the outline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NoteSource {
    /// A brand-new note.
    New(NoteDraft),
    /// A copy of an existing note: content, attachments and tags are copied,
    /// the original's position is not.
    Clone { original: String },
}

/// One note to create or clone into an outline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteSpec {
    /// Batch-local handle other items use to reference this one.
    pub key: String,
    pub source: NoteSource,
    #[serde(default)]
    pub previous: Option<String>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl NoteSpec {
    pub fn new(key: impl Into<String>, draft: NoteDraft) -> Self {
        Self {
            key: key.into(),
            source: NoteSource::New(draft),
            previous: None,
            next: None,
            parent_id: None,
        }
    }

    pub fn clone_of(key: impl Into<String>, original: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            source: NoteSource::Clone {
                original: original.into(),
            },
            previous: None,
            next: None,
            parent_id: None,
        }
    }

    pub fn after(mut self, previous: impl Into<String>) -> Self {
        self.previous = Some(previous.into());
        self
    }

    pub fn before(mut self, next: impl Into<String>) -> Self {
        self.next = Some(next.into());
        self
    }

    pub fn under(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// A batch of notes to add to one outline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineBatch {
    /// The outline version the caller read; a mismatch is a conflict.
    pub expected_version: i64,
    pub notes: Vec<NoteSpec>,
}

/// A target location for [`crate::Workspace::move_note`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveTarget {
    pub previous: Option<String>,
    pub next: Option<String>,
    pub parent_id: Option<String>,
}

/// A note as placed by a mutation, with its resolved pointers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedNote {
    pub note: Note,
    pub previous: Option<String>,
    pub next: Option<String>,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemErrorKind {
    NotFound,
    Validation,
}

/// Per-item result of a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ItemOutcome {
    Placed(PlacedNote),
    Failed { kind: ItemErrorKind, message: String },
}

impl ItemOutcome {
    pub fn is_placed(&self) -> bool {
        matches!(self, Self::Placed(_))
    }

    pub fn placed(&self) -> Option<&PlacedNote> {
        match self {
            Self::Placed(placed) => Some(placed),
            Self::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub key: String,
    pub outcome: ItemOutcome,
}

/// Multi-status response for a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub outline_id: String,
    /// Outline version after the batch (unchanged if nothing was placed).
    pub version: i64,
    pub items: Vec<BatchItemResult>,
}

impl BatchResult {
    /// The outcome for `key`, if that key was in the batch.
    pub fn item(&self, key: &str) -> Option<&ItemOutcome> {
        self.items.iter().find(|i| i.key == key).map(|i| &i.outcome)
    }

    pub fn placed_count(&self) -> usize {
        self.items.iter().filter(|i| i.outcome.is_placed()).count()
    }
}

/// Rejects batches whose keys are empty or repeated.
pub fn check_keys(specs: &[NoteSpec]) -> Result<()> {
    let mut seen = HashSet::new();
    for spec in specs {
        if spec.key.trim().is_empty() {
            return Err(MarginaliaError::ValidationFailed(
                "Every batch item needs a non-empty key".to_string(),
            ));
        }
        if !seen.insert(spec.key.as_str()) {
            return Err(MarginaliaError::ValidationFailed(format!(
                "Duplicate batch key {}",
                spec.key
            )));
        }
    }
    Ok(())
}

/// An accepted batch item with the note id it will get.
pub struct Accepted<'a> {
    pub spec: &'a NoteSpec,
    pub note_id: String,
}

struct Resolved {
    previous: Option<String>,
    next: Option<String>,
    parent: Option<String>,
    parent_given: bool,
}

/// Adds every accepted item to `editor` and splices it into place.
///
/// `failed_keys` are items rejected earlier; referencing one aborts the batch.
///
/// # Errors
///
/// [`MarginaliaError::ReferenceNotFound`] for unresolvable references and
/// [`MarginaliaError::InvalidSplice`] for placements that cannot form a
/// well-formed chain.
pub fn plan_batch(
    editor: &mut ChainEditor,
    outline_id: &str,
    reader_id: &str,
    accepted: &[Accepted<'_>],
    failed_keys: &HashSet<&str>,
) -> Result<()> {
    let key_to_id: HashMap<&str, &str> = accepted
        .iter()
        .map(|a| (a.spec.key.as_str(), a.note_id.as_str()))
        .collect();
    let new_ids: HashSet<&str> = key_to_id.values().copied().collect();

    let resolve = |reference: &str| -> Result<String> {
        if let Some(id) = key_to_id.get(reference) {
            return Ok((*id).to_string());
        }
        if failed_keys.contains(reference) {
            return Err(MarginaliaError::ReferenceNotFound(format!(
                "{reference} (batch item failed)"
            )));
        }
        if editor.contains(reference) {
            return Ok(reference.to_string());
        }
        Err(MarginaliaError::ReferenceNotFound(reference.to_string()))
    };

    let mut resolved: HashMap<&str, Resolved> = HashMap::new();
    for item in accepted {
        let spec = item.spec;
        let r = Resolved {
            previous: spec.previous.as_deref().map(&resolve).transpose()?,
            next: spec.next.as_deref().map(&resolve).transpose()?,
            parent: spec.parent_id.as_deref().map(&resolve).transpose()?,
            parent_given: spec.parent_id.is_some(),
        };
        for target in [&r.previous, &r.next, &r.parent].into_iter().flatten() {
            if *target == item.note_id {
                return Err(MarginaliaError::InvalidSplice(format!(
                    "{} references itself",
                    spec.key
                )));
            }
        }
        resolved.insert(item.note_id.as_str(), r);
    }

    // In-batch links become real pointers; links to existing notes are anchors.
    let mut anchor_after: HashMap<&str, String> = HashMap::new();
    let mut anchor_before: HashMap<&str, String> = HashMap::new();
    for item in accepted {
        editor.add(Position::new(&item.note_id, outline_id, reader_id));
    }
    for item in accepted {
        let id = item.note_id.as_str();
        let r = &resolved[id];
        if let Some(prev) = &r.previous {
            if new_ids.contains(prev.as_str()) {
                link(editor, prev, id)?;
            } else {
                anchor_after.insert(id, prev.clone());
            }
        }
        if let Some(next) = &r.next {
            if new_ids.contains(next.as_str()) {
                link(editor, id, next)?;
            } else {
                anchor_before.insert(id, next.clone());
            }
        }
    }

    for members in runs(editor, accepted)? {
        let head = members[0].as_str();
        let tail = members[members.len() - 1].as_str();
        for member in &members {
            let inner_after = member != head && anchor_after.contains_key(member.as_str());
            let inner_before = member != tail && anchor_before.contains_key(member.as_str());
            if inner_after || inner_before {
                return Err(MarginaliaError::InvalidSplice(format!(
                    "note {member} is linked both inside the batch and to an existing note"
                )));
            }
        }
        let after = anchor_after.get(head).map(String::as_str);
        let before = anchor_before.get(tail).map(String::as_str);

        let mut explicit: Vec<&Option<String>> = members
            .iter()
            .map(|m| &resolved[m.as_str()])
            .filter(|r| r.parent_given)
            .map(|r| &r.parent)
            .collect();
        explicit.dedup();
        if explicit.len() > 1 {
            return Err(MarginaliaError::InvalidSplice(format!(
                "linked notes starting at {head} name different parents"
            )));
        }
        let parent = match explicit.first() {
            Some(parent) => (*parent).clone(),
            None => after
                .or(before)
                .and_then(|anchor| editor.get(anchor))
                .and_then(|anchor| anchor.parent_id.clone()),
        };

        editor.insert_run(&members, parent.as_deref(), after, before)?;
    }

    for item in accepted {
        let parent = editor.get(&item.note_id).and_then(|p| p.parent_id.clone());
        if editor.creates_cycle(&item.note_id, parent.as_deref()) {
            return Err(MarginaliaError::InvalidSplice(format!(
                "{} would become its own ancestor",
                item.spec.key
            )));
        }
    }
    Ok(())
}

/// Links two new notes `first -> second`, refusing to overwrite a different link.
fn link(editor: &mut ChainEditor, first: &str, second: &str) -> Result<()> {
    let first_next = editor.get(first).and_then(|p| p.next.clone());
    let second_prev = editor.get(second).and_then(|p| p.previous.clone());
    if first_next.as_deref().is_some_and(|n| n != second)
        || second_prev.as_deref().is_some_and(|p| p != first)
    {
        return Err(MarginaliaError::InvalidSplice(format!(
            "conflicting links between {first} and {second}"
        )));
    }
    editor.set_next(first, Some(second.to_string()))?;
    editor.set_previous(second, Some(first.to_string()))
}

/// Groups the new notes into runs (head first) by following in-batch links.
fn runs(editor: &ChainEditor, accepted: &[Accepted<'_>]) -> Result<Vec<Vec<String>>> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut runs = Vec::new();
    for item in accepted {
        let id = item.note_id.as_str();
        if editor.get(id).is_some_and(|p| p.previous.is_some()) {
            continue;
        }
        let mut members = Vec::new();
        let mut current = Some(id.to_string());
        while let Some(member) = current {
            if members.len() > accepted.len() {
                return Err(MarginaliaError::InvalidSplice(format!(
                    "circular links starting at {}",
                    item.spec.key
                )));
            }
            current = editor.get(&member).and_then(|p| p.next.clone());
            members.push(member);
        }
        runs.push(members);
    }
    for members in &runs {
        visited.extend(members.iter().map(String::as_str));
    }
    if let Some(stray) = accepted.iter().find(|a| !visited.contains(a.note_id.as_str())) {
        return Err(MarginaliaError::InvalidSplice(format!(
            "circular links involving {}",
            stray.spec.key
        )));
    }
    Ok(runs)
}
