//! Nests a linearized position sequence into a forest of notes.

use crate::core::error::Corruption;
use crate::core::note::Note;
use crate::core::position::Position;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One note in an outline tree together with its ordered children.
///
/// Sibling pointers are deliberately absent: consumers walk `children`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlineNode {
    #[serde(flatten)]
    pub note: Note,
    pub children: Vec<OutlineNode>,
}

impl OutlineNode {
    /// Number of notes in this subtree, including this one.
    pub fn subtree_size(&self) -> usize {
        1 + self.children.iter().map(OutlineNode::subtree_size).sum::<usize>()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Groups `ordered` by parent and assembles the tree.
///
/// `ordered` must come from the linearizer so sibling order is already right;
/// each child is appended to its parent's list in sequence order. `notes`
/// supplies the content for each position and is consumed.
///
/// # Errors
///
/// [`Corruption::IncompleteCoverage`] if the assembled forest does not hold
/// exactly `ordered.len()` notes. That covers parents missing from the set,
/// parent cycles, and positions whose note content is absent.
pub fn build_forest(
    ordered: &[&Position],
    mut notes: HashMap<String, Note>,
) -> Result<Vec<OutlineNode>, Corruption> {
    let mut roots: Vec<&str> = Vec::new();
    let mut children_of: HashMap<&str, Vec<&str>> = HashMap::new();
    for &position in ordered {
        match position.parent_id.as_deref() {
            None => roots.push(&position.note_id),
            Some(parent) => children_of.entry(parent).or_default().push(&position.note_id),
        }
    }

    let mut built = 0usize;
    let mut forest = Vec::with_capacity(roots.len());
    for root in roots {
        if let Some(node) = assemble(root, &mut children_of, &mut notes, &mut built) {
            forest.push(node);
        }
    }

    if built != ordered.len() {
        return Err(Corruption::IncompleteCoverage {
            expected: ordered.len(),
            found: built,
        });
    }
    Ok(forest)
}

/// Checks that every position in `ordered` hangs off a root, without
/// materializing notes.
///
/// # Errors
///
/// [`Corruption::IncompleteCoverage`] under the same conditions as [`build_forest`].
pub fn check_nesting(ordered: &[&Position]) -> Result<(), Corruption> {
    let mut children_of: HashMap<Option<&str>, Vec<&str>> = HashMap::new();
    for &position in ordered {
        children_of
            .entry(position.parent_id.as_deref())
            .or_default()
            .push(&position.note_id);
    }

    let mut reached = 0usize;
    let mut stack: Vec<&str> = children_of.remove(&None).unwrap_or_default();
    while let Some(id) = stack.pop() {
        reached += 1;
        if let Some(children) = children_of.remove(&Some(id)) {
            stack.extend(children);
        }
    }

    if reached != ordered.len() {
        return Err(Corruption::IncompleteCoverage {
            expected: ordered.len(),
            found: reached,
        });
    }
    Ok(())
}

fn assemble<'a>(
    id: &'a str,
    children_of: &mut HashMap<&'a str, Vec<&'a str>>,
    notes: &mut HashMap<String, Note>,
    built: &mut usize,
) -> Option<OutlineNode> {
    let note = notes.remove(id)?;
    *built += 1;
    // Removing the entry means a parent cycle can never be entered twice.
    let child_ids = children_of.remove(id).unwrap_or_default();
    let children = child_ids
        .into_iter()
        .filter_map(|child| assemble(child, children_of, notes, built))
        .collect();
    Some(OutlineNode { note, children })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::linearize::{chain_heads, linearize};

    fn pos(id: &str, previous: Option<&str>, next: Option<&str>, parent: Option<&str>) -> Position {
        Position::new(id, "o", "r").with_links(previous, next, parent)
    }

    fn note(id: &str) -> Note {
        Note {
            id: id.to_string(),
            reader_id: "r".to_string(),
            body: format!("body of {id}"),
            metadata: HashMap::new(),
            attachments: vec![],
            tags: vec![],
            created_at: 0,
            modified_at: 0,
        }
    }

    fn notes_for(rows: &[Position]) -> HashMap<String, Note> {
        rows.iter().map(|p| (p.note_id.clone(), note(&p.note_id))).collect()
    }

    /// Flattens a forest back into position rows, preserving sibling order.
    fn flatten(forest: &[OutlineNode], parent: Option<&str>, out: &mut Vec<Position>) {
        for (i, node) in forest.iter().enumerate() {
            let previous = i.checked_sub(1).map(|j| forest[j].note.id.as_str());
            let next = forest.get(i + 1).map(|n| n.note.id.as_str());
            out.push(pos(&node.note.id, previous, next, parent));
            flatten(&node.children, Some(&node.note.id), out);
        }
    }

    fn shape(forest: &[OutlineNode]) -> Vec<(String, Vec<String>)> {
        let mut out = Vec::new();
        for node in forest {
            out.push((
                node.note.id.clone(),
                node.children.iter().map(|c| c.note.id.clone()).collect(),
            ));
            out.extend(shape(&node.children));
        }
        out
    }

    /// Two roots; the first has two children, one of which has three children.
    fn eight_note_fixture() -> Vec<Position> {
        vec![
            pos("c2", Some("c1"), None, Some("r1")),
            pos("g1", None, Some("g2"), Some("c1")),
            pos("r2", Some("r1"), None, None),
            pos("g3", Some("g2"), None, Some("c1")),
            pos("r1", None, Some("r2"), None),
            pos("c1", None, Some("c2"), Some("r1")),
            pos("g2", Some("g1"), Some("g3"), Some("c1")),
            pos("x", None, None, Some("r2")),
        ]
    }

    #[test]
    fn test_deep_nesting_fixture() {
        let rows = eight_note_fixture();
        let ordered = linearize(&rows).unwrap();
        let forest = build_forest(&ordered, notes_for(&rows)).unwrap();

        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].note.id, "r1");
        assert_eq!(forest[1].note.id, "r2");
        let kids: Vec<&str> = forest[0].children.iter().map(|c| c.note.id.as_str()).collect();
        assert_eq!(kids, vec!["c1", "c2"]);
        let grandkids: Vec<&str> = forest[0].children[0]
            .children
            .iter()
            .map(|c| c.note.id.as_str())
            .collect();
        assert_eq!(grandkids, vec!["g1", "g2", "g3"]);
        assert!(forest[0].children[1].is_leaf());
        assert_eq!(forest[1].children[0].note.id, "x");
        assert_eq!(forest.iter().map(OutlineNode::subtree_size).sum::<usize>(), 8);
    }

    #[test]
    fn test_round_trip_through_positions() {
        let rows = eight_note_fixture();
        let ordered = linearize(&rows).unwrap();
        let forest = build_forest(&ordered, notes_for(&rows)).unwrap();

        let mut flat = Vec::new();
        flatten(&forest, None, &mut flat);
        flat.reverse();
        let reordered = linearize(&flat).unwrap();
        let rebuilt = build_forest(&reordered, notes_for(&flat)).unwrap();

        assert_eq!(shape(&rebuilt), shape(&forest));
        assert_eq!(rebuilt, forest);
    }

    /// Sibling groups for `n` notes: slot 0 holds the roots, slot `k + 1` the
    /// children of `n{k}`. Note `i` lands in a slot at or below `i`, so parents
    /// always precede their children and no parent cycle can form.
    fn generated_groups(n: usize, step: usize) -> Vec<Vec<String>> {
        let mut groups = vec![Vec::new(); n + 1];
        for i in 0..n {
            let slot = (i * step + 1) % (i + 1);
            groups[slot].push(format!("n{i}"));
        }
        groups
    }

    fn rows_for_groups(groups: &[Vec<String>]) -> Vec<Position> {
        let mut rows = Vec::new();
        for (slot, ids) in groups.iter().enumerate() {
            let parent = slot.checked_sub(1).map(|k| format!("n{k}"));
            for (i, id) in ids.iter().enumerate() {
                let previous = i.checked_sub(1).map(|j| ids[j].as_str());
                let next = ids.get(i + 1).map(String::as_str);
                rows.push(pos(id, previous, next, parent.as_deref()));
            }
        }
        rows
    }

    #[test]
    fn test_round_trip_over_generated_forests() {
        for n in 0..40 {
            for step in [1, 2, 3, 5, 7] {
                let groups = generated_groups(n, step);
                let mut rows = rows_for_groups(&groups);
                let shift = if rows.is_empty() { 0 } else { step % rows.len() };
                rows.rotate_left(shift);
                if step % 2 == 1 {
                    rows.reverse();
                }

                let ordered = linearize(&rows).unwrap();
                assert_eq!(ordered.len(), n);
                let group_count = groups.iter().filter(|g| !g.is_empty()).count();
                assert_eq!(chain_heads(&rows).len(), group_count);

                let forest = build_forest(&ordered, notes_for(&rows)).unwrap();
                assert_eq!(forest.iter().map(OutlineNode::subtree_size).sum::<usize>(), n);
                let roots: Vec<String> = forest.iter().map(|r| r.note.id.clone()).collect();
                assert_eq!(roots, groups[0]);
                for (id, children) in shape(&forest) {
                    let k: usize = id[1..].parse().unwrap();
                    assert_eq!(children, groups[k + 1], "children of {id} (n={n}, step={step})");
                }

                let mut flat = Vec::new();
                flatten(&forest, None, &mut flat);
                flat.reverse();
                let reordered = linearize(&flat).unwrap();
                let rebuilt = build_forest(&reordered, notes_for(&flat)).unwrap();
                assert_eq!(rebuilt, forest);
            }
        }
    }

    #[test]
    fn test_empty_forest() {
        let forest = build_forest(&[], HashMap::new()).unwrap();
        assert!(forest.is_empty());
    }

    #[test]
    fn test_orphan_subtree_is_incomplete() {
        let rows = vec![
            pos("a", None, None, None),
            pos("b", None, Some("c"), Some("missing")),
            pos("c", Some("b"), None, Some("missing")),
        ];
        let ordered = linearize(&rows).unwrap();
        assert_eq!(
            build_forest(&ordered, notes_for(&rows)).unwrap_err(),
            Corruption::IncompleteCoverage { expected: 3, found: 1 }
        );
    }

    #[test]
    fn test_check_nesting_agrees_with_build_forest() {
        let good = eight_note_fixture();
        assert!(check_nesting(&linearize(&good).unwrap()).is_ok());

        let orphaned = vec![pos("a", None, None, None), pos("b", None, None, Some("nowhere"))];
        assert_eq!(
            check_nesting(&linearize(&orphaned).unwrap()).unwrap_err(),
            Corruption::IncompleteCoverage { expected: 2, found: 1 }
        );
    }

    #[test]
    fn test_parent_cycle_is_incomplete() {
        let rows = vec![
            pos("root", None, None, None),
            pos("a", None, None, Some("b")),
            pos("b", None, None, Some("a")),
        ];
        let ordered = linearize(&rows).unwrap();
        assert!(matches!(
            build_forest(&ordered, notes_for(&rows)),
            Err(Corruption::IncompleteCoverage { expected: 3, found: 1 })
        ));
    }

    #[test]
    fn test_missing_note_content_is_incomplete() {
        let rows = vec![pos("a", None, Some("b"), None), pos("b", Some("a"), None, None)];
        let ordered = linearize(&rows).unwrap();
        let mut notes = notes_for(&rows);
        notes.remove("b");
        assert!(build_forest(&ordered, notes).is_err());
    }

    #[test]
    fn test_children_are_flattened_into_json() {
        let rows = vec![pos("a", None, None, None), pos("b", None, None, Some("a"))];
        let ordered = linearize(&rows).unwrap();
        let forest = build_forest(&ordered, notes_for(&rows)).unwrap();
        let json = serde_json::to_value(&forest).unwrap();
        assert_eq!(json[0]["id"], "a");
        assert_eq!(json[0]["children"][0]["id"], "b");
        assert!(json[0].get("next").is_none());
    }
}
