//! In-memory editing of one outline's position set.
//!
//! A [`ChainEditor`] holds every live position of an outline keyed by note id.
//! Mutations are computed here first, verified as a whole, and only then
//! written back by the caller inside its transaction, so no half-spliced chain
//! can ever be committed.

use crate::core::error::Corruption;
use crate::core::forest::check_nesting;
use crate::core::linearize::{linearize, linearize_strict};
use crate::core::position::Position;
use crate::{MarginaliaError, Result};
use std::collections::{HashMap, HashSet};

/// The rows a finished edit has to write back.
#[derive(Debug, Default)]
pub struct ChainChanges {
    pub inserted: Vec<Position>,
    pub updated: Vec<Position>,
    pub removed: Vec<String>,
}

impl ChainChanges {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

pub struct ChainEditor {
    rows: HashMap<String, Position>,
    /// Note ids in load/insert order, for deterministic output.
    order: Vec<String>,
    added: HashSet<String>,
    dirty: HashSet<String>,
    removed: Vec<String>,
    /// Added rows that have not been linked into a chain yet.
    pending: HashSet<String>,
}

impl ChainEditor {
    pub fn new(positions: Vec<Position>) -> Self {
        let order = positions.iter().map(|p| p.note_id.clone()).collect();
        let rows = positions.into_iter().map(|p| (p.note_id.clone(), p)).collect();
        Self {
            rows,
            order,
            added: HashSet::new(),
            dirty: HashSet::new(),
            removed: Vec::new(),
            pending: HashSet::new(),
        }
    }

    pub fn contains(&self, note_id: &str) -> bool {
        self.rows.contains_key(note_id)
    }

    pub fn get(&self, note_id: &str) -> Option<&Position> {
        self.rows.get(note_id)
    }

    fn row(&self, note_id: &str) -> Result<&Position> {
        self.rows
            .get(note_id)
            .ok_or_else(|| MarginaliaError::ReferenceNotFound(note_id.to_string()))
    }

    fn row_mut(&mut self, note_id: &str) -> Result<&mut Position> {
        self.dirty.insert(note_id.to_string());
        self.rows
            .get_mut(note_id)
            .ok_or_else(|| MarginaliaError::ReferenceNotFound(note_id.to_string()))
    }

    /// Adds a new row that is not yet linked anywhere.
    pub fn add(&mut self, position: Position) {
        let id = position.note_id.clone();
        self.order.push(id.clone());
        self.added.insert(id.clone());
        self.pending.insert(id.clone());
        self.rows.insert(id, position);
    }

    pub fn set_previous(&mut self, note_id: &str, previous: Option<String>) -> Result<()> {
        self.row_mut(note_id)?.previous = previous;
        Ok(())
    }

    pub fn set_next(&mut self, note_id: &str, next: Option<String>) -> Result<()> {
        self.row_mut(note_id)?.next = next;
        Ok(())
    }

    pub fn set_parent(&mut self, note_id: &str, parent_id: Option<String>) -> Result<()> {
        self.row_mut(note_id)?.parent_id = parent_id;
        Ok(())
    }

    /// Detaches `note_id` from its sibling chain and closes the gap.
    ///
    /// The note keeps its parent and its own children.
    pub fn unlink(&mut self, note_id: &str) -> Result<()> {
        let row = self.row(note_id)?;
        let (previous, next) = (row.previous.clone(), row.next.clone());
        if let Some(prev) = &previous {
            self.set_next(prev, next.clone())?;
        }
        if let Some(nxt) = &next {
            self.set_previous(nxt, previous.clone())?;
        }
        self.set_previous(note_id, None)?;
        self.set_next(note_id, None)
    }

    /// Drops a row entirely. Callers unlink first unless the whole sibling
    /// group is going away.
    pub fn remove(&mut self, note_id: &str) {
        if self.rows.remove(note_id).is_some() {
            self.order.retain(|id| id != note_id);
            self.dirty.remove(note_id);
            self.pending.remove(note_id);
            if !self.added.remove(note_id) {
                self.removed.push(note_id.to_string());
            }
        }
    }

    /// Direct children of `parent_id` in chain order.
    pub fn children_of(&self, parent_id: &str) -> Vec<String> {
        let head = self.order.iter().find(|id| {
            let row = &self.rows[id.as_str()];
            row.parent_id.as_deref() == Some(parent_id) && row.previous.is_none()
        });
        let mut children = Vec::new();
        let mut current = head.cloned();
        while let Some(id) = current {
            if children.len() > self.rows.len() {
                break;
            }
            current = self.rows.get(&id).and_then(|r| r.next.clone());
            children.push(id);
        }
        children
    }

    /// Every note below `note_id`, breadth-first.
    pub fn descendants(&self, note_id: &str) -> Vec<String> {
        let mut by_parent: HashMap<&str, Vec<&str>> = HashMap::new();
        for id in &self.order {
            if let Some(parent) = self.rows[id.as_str()].parent_id.as_deref() {
                by_parent.entry(parent).or_default().push(id);
            }
        }
        let mut out = Vec::new();
        let mut queue = std::collections::VecDeque::from([note_id]);
        let mut seen: HashSet<&str> = HashSet::from([note_id]);
        while let Some(current) = queue.pop_front() {
            for &child in by_parent.get(current).into_iter().flatten() {
                if seen.insert(child) {
                    out.push(child.to_string());
                    queue.push_back(child);
                }
            }
        }
        out
    }

    /// Returns `true` if giving `note_id` the parent `parent_id` would make it
    /// its own ancestor.
    pub fn creates_cycle(&self, note_id: &str, parent_id: Option<&str>) -> bool {
        let mut current = parent_id.map(str::to_string);
        let mut steps = 0;
        while let Some(id) = current {
            if id == note_id || steps > self.rows.len() {
                return true;
            }
            steps += 1;
            current = self.rows.get(&id).and_then(|r| r.parent_id.clone());
        }
        false
    }

    /// Last linked sibling under `parent_id`, ignoring `exclude` and rows not
    /// yet linked.
    fn group_tail(&self, parent_id: Option<&str>, exclude: &[String]) -> Option<String> {
        self.order
            .iter()
            .filter(|id| !self.pending.contains(*id) && !exclude.contains(id))
            .find(|id| {
                let row = &self.rows[id.as_str()];
                row.parent_id.as_deref() == parent_id && row.next.is_none()
            })
            .cloned()
    }

    /// Splices the already-linked run `members` (head first) into the sibling
    /// group of `parent_id`.
    ///
    /// - `after` only: the run follows `after`; its former successor follows the run.
    /// - `before` only: the run precedes `before`.
    /// - both: `after` and `before` must currently be adjacent.
    /// - neither: the run is appended to the end of the group.
    ///
    /// Every member is given `parent_id`.
    pub fn insert_run(
        &mut self,
        members: &[String],
        parent_id: Option<&str>,
        after: Option<&str>,
        before: Option<&str>,
    ) -> Result<()> {
        let (Some(head), Some(tail)) = (members.first(), members.last()) else {
            return Ok(());
        };
        let parent = parent_id.map(str::to_string);

        let (after, before) = match (after, before) {
            (Some(w), Some(y)) => {
                if self.row(w)?.next.as_deref() != Some(y) || self.row(y)?.previous.as_deref() != Some(w) {
                    return Err(MarginaliaError::InvalidSplice(format!(
                        "{w} and {y} are not adjacent siblings"
                    )));
                }
                (Some(w.to_string()), Some(y.to_string()))
            }
            (Some(w), None) => (Some(w.to_string()), self.row(w)?.next.clone()),
            (None, Some(y)) => (self.row(y)?.previous.clone(), Some(y.to_string())),
            (None, None) => (self.group_tail(parent_id, members), None),
        };

        for anchor in after.iter().chain(before.iter()) {
            if members.contains(anchor) {
                return Err(MarginaliaError::InvalidSplice(format!(
                    "note {anchor} cannot be placed next to itself"
                )));
            }
            if self.row(anchor)?.parent_id != parent {
                return Err(MarginaliaError::InvalidSplice(format!(
                    "note {anchor} has a different parent than the notes placed beside it"
                )));
            }
        }

        for member in members {
            self.set_parent(member, parent.clone())?;
            self.pending.remove(member);
        }
        if let Some(w) = &after {
            self.set_next(w, Some(head.clone()))?;
        }
        self.set_previous(head, after)?;
        if let Some(y) = &before {
            self.set_previous(y, Some(tail.clone()))?;
        }
        self.set_next(tail, before)
    }

    /// Re-linearizes and re-nests the whole set.
    ///
    /// # Errors
    ///
    /// The first [`Corruption`] found.
    pub fn verify(&self, strict: bool) -> std::result::Result<(), Corruption> {
        let positions = self.positions();
        let ordered = if strict {
            linearize_strict(&positions)?
        } else {
            linearize(&positions)?
        };
        check_nesting(&ordered)
    }

    /// All live rows in load/insert order.
    pub fn positions(&self) -> Vec<Position> {
        self.order.iter().map(|id| self.rows[id.as_str()].clone()).collect()
    }

    /// Consumes the editor and reports what must be written.
    pub fn into_changes(mut self) -> ChainChanges {
        let mut changes = ChainChanges {
            removed: std::mem::take(&mut self.removed),
            ..ChainChanges::default()
        };
        for id in &self.order {
            let row = &self.rows[id.as_str()];
            if self.added.contains(id) {
                changes.inserted.push(row.clone());
            } else if self.dirty.contains(id) {
                changes.updated.push(row.clone());
            }
        }
        changes
    }
}
