//! Rebuilds sibling order from scattered previous/next pointers.
//!
//! Positions are indexed by note id and every traversal is an id lookup, so
//! the chain walk below is the only place a cycle can show up.
//!
//! ## Ordering contract
//!
//! Within a sibling group the output follows the `next` chain exactly. Groups
//! themselves appear in head-discovery order (the order heads occur in the
//! input); callers must re-derive nesting from `parent_id` rather than rely on
//! cross-group order.

use crate::core::error::Corruption;
use crate::core::position::Position;
use std::collections::{HashMap, HashSet};

/// Returns the chain heads (rows with no `previous`) in input order.
///
/// For a well-formed outline there is exactly one head per sibling group.
pub fn chain_heads(positions: &[Position]) -> Vec<&Position> {
    positions.iter().filter(|p| p.previous.is_none()).collect()
}

/// Orders `positions` by walking each chain from its head.
///
/// # Errors
///
/// - [`Corruption::NoRoot`] if the input is non-empty and no row lacks a `previous`.
/// - [`Corruption::DanglingNext`] naming the first `next` id with no matching row.
/// - [`Corruption::Circular`] if a walk reaches a note that was already emitted.
/// - [`Corruption::IncompleteCoverage`] if some rows are unreachable from every head.
pub fn linearize(positions: &[Position]) -> Result<Vec<&Position>, Corruption> {
    walk(positions, false)
}

/// Like [`linearize`], but also checks that every `next` link joins two notes
/// with the same parent.
///
/// # Errors
///
/// Everything [`linearize`] reports, plus [`Corruption::ParentMismatch`].
pub fn linearize_strict(positions: &[Position]) -> Result<Vec<&Position>, Corruption> {
    walk(positions, true)
}

fn walk(positions: &[Position], check_parents: bool) -> Result<Vec<&Position>, Corruption> {
    if positions.is_empty() {
        return Ok(Vec::new());
    }

    let by_id: HashMap<&str, &Position> = positions
        .iter()
        .map(|p| (p.note_id.as_str(), p))
        .collect();

    let heads = chain_heads(positions);
    if heads.is_empty() {
        return Err(Corruption::NoRoot);
    }

    let mut ordered: Vec<&Position> = Vec::with_capacity(positions.len());
    let mut seen: HashSet<&str> = HashSet::with_capacity(positions.len());

    for head in heads {
        let mut current = head;
        loop {
            if !seen.insert(current.note_id.as_str()) || ordered.len() >= positions.len() {
                return Err(Corruption::Circular(current.note_id.clone()));
            }
            ordered.push(current);

            let Some(next_id) = current.next.as_deref() else {
                break;
            };
            let next = by_id
                .get(next_id)
                .copied()
                .ok_or_else(|| Corruption::DanglingNext(next_id.to_string()))?;
            if check_parents && next.parent_id != current.parent_id {
                return Err(Corruption::ParentMismatch {
                    id: current.note_id.clone(),
                    next: next.note_id.clone(),
                });
            }
            current = next;
        }
    }

    if ordered.len() != positions.len() {
        return Err(Corruption::IncompleteCoverage {
            expected: positions.len(),
            found: ordered.len(),
        });
    }

    Ok(ordered)
}
