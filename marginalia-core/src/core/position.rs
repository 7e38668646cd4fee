//! Position rows: the previous/next/parent pointers that place a note in an outline.
//!
//! Every function here takes a plain [`Connection`] so it can run inside the
//! caller's transaction (a `rusqlite::Transaction` derefs to `Connection`).
//! The store does no structural checking; the linearizer and the splice
//! editor are the only places that reason about chain shape.

use crate::Result;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// Where one note sits inside one outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub note_id: String,
    pub outline_id: String,
    pub reader_id: String,
    pub previous: Option<String>,
    pub next: Option<String>,
    pub parent_id: Option<String>,
}

impl Position {
    /// A detached position with no neighbours and no parent.
    pub fn new(note_id: &str, outline_id: &str, reader_id: &str) -> Self {
        Self {
            note_id: note_id.to_string(),
            outline_id: outline_id.to_string(),
            reader_id: reader_id.to_string(),
            previous: None,
            next: None,
            parent_id: None,
        }
    }

    pub fn with_links(mut self, previous: Option<&str>, next: Option<&str>, parent_id: Option<&str>) -> Self {
        self.previous = previous.map(str::to_string);
        self.next = next.map(str::to_string);
        self.parent_id = parent_id.map(str::to_string);
        self
    }
}

fn map_position_row(row: &rusqlite::Row) -> rusqlite::Result<Position> {
    Ok(Position {
        note_id: row.get(0)?,
        outline_id: row.get(1)?,
        reader_id: row.get(2)?,
        previous: row.get(3)?,
        next: row.get(4)?,
        parent_id: row.get(5)?,
    })
}

/// Inserts a fresh position row.
///
/// A soft-deleted row for the same note is replaced, so a note can rejoin an
/// outline after being removed. A live row for the same note violates the
/// primary key and surfaces as a database error.
pub fn insert(conn: &Connection, position: &Position, now: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM positions WHERE note_id = ?1 AND deleted_at IS NOT NULL",
        [&position.note_id],
    )?;
    conn.execute(
        "INSERT INTO positions (note_id, outline_id, reader_id, previous_id, next_id, parent_id, created_at, modified_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        rusqlite::params![
            position.note_id,
            position.outline_id,
            position.reader_id,
            position.previous,
            position.next,
            position.parent_id,
            now,
        ],
    )?;
    Ok(())
}

/// Rewrites the pointers of a live position. Returns `false` if no live row matched.
pub fn update(conn: &Connection, position: &Position, now: i64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE positions SET previous_id = ?1, next_id = ?2, parent_id = ?3, modified_at = ?4
         WHERE note_id = ?5 AND deleted_at IS NULL",
        rusqlite::params![
            position.previous,
            position.next,
            position.parent_id,
            now,
            position.note_id,
        ],
    )?;
    Ok(changed == 1)
}

/// Marks a position deleted. The note itself is untouched.
pub fn soft_delete(conn: &Connection, note_id: &str, now: i64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE positions SET deleted_at = ?1, modified_at = ?1 WHERE note_id = ?2 AND deleted_at IS NULL",
        rusqlite::params![now, note_id],
    )?;
    Ok(changed == 1)
}

/// Fetches the live position of `note_id`, if it has one.
pub fn get(conn: &Connection, note_id: &str) -> Result<Option<Position>> {
    let position = conn
        .query_row(
            "SELECT note_id, outline_id, reader_id, previous_id, next_id, parent_id
             FROM positions WHERE note_id = ?1 AND deleted_at IS NULL",
            [note_id],
            map_position_row,
        )
        .optional()?;
    Ok(position)
}

/// Lists the live positions of one outline in insertion order.
pub fn list_for_outline(conn: &Connection, outline_id: &str) -> Result<Vec<Position>> {
    let mut stmt = conn.prepare(
        "SELECT note_id, outline_id, reader_id, previous_id, next_id, parent_id
         FROM positions
         WHERE outline_id = ?1 AND deleted_at IS NULL
         ORDER BY created_at, rowid",
    )?;
    let rows = stmt
        .query_map([outline_id], map_position_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
