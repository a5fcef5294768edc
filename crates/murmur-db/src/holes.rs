//! Hole/gap ledger.
//!
//! A hole `(start, end)` records that the message ids strictly between
//! `start` and `end` are not known to be cached for a dialog. Every id range
//! not covered by a hole is assumed fully present. Holes of one scope never
//! overlap.
//!
//! Two boundary markers use literal ids regardless of channel:
//!
//! - `(0, end)`: everything below `end` is unknown back to the origin
//! - `(1, 1)`: the sentinel; the oldest end of the history is closed
//!
//! When a range is closed against a marker, the marker is mapped into the
//! channel's composite id space so the comparison stays meaningful.

use rusqlite::{params, params_from_iter, Connection};

use murmur_types::ids::{channel_of, compose, local_part};
use murmur_types::records::MediaKind;
use murmur_types::{DialogId, MessageId};

use crate::{in_transaction, Result};

/// Literal start of the "unknown back to the origin" hole.
pub const ORIGIN: MessageId = 0;
/// Literal start and end of the boundary sentinel.
pub const SENTINEL: MessageId = 1;

/// Which ledger a hole lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HoleScope {
    /// Every message of the dialog.
    Messages,
    /// Important stream of a channel.
    Important,
    /// One media kind.
    Media(MediaKind),
    /// Every media kind at once (mutations only; queries require all kinds closed).
    AllMedia,
}

/// Dialog plus scope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HoleKey {
    pub dialog_id: DialogId,
    pub scope: HoleScope,
}

impl HoleKey {
    pub fn messages(dialog_id: DialogId) -> Self {
        Self {
            dialog_id,
            scope: HoleScope::Messages,
        }
    }

    pub fn important(dialog_id: DialogId) -> Self {
        Self {
            dialog_id,
            scope: HoleScope::Important,
        }
    }

    pub fn media(dialog_id: DialogId, kind: MediaKind) -> Self {
        Self {
            dialog_id,
            scope: HoleScope::Media(kind),
        }
    }

    pub fn all_media(dialog_id: DialogId) -> Self {
        Self {
            dialog_id,
            scope: HoleScope::AllMedia,
        }
    }

    fn table(&self) -> &'static str {
        match self.scope {
            HoleScope::Messages => "messages_holes",
            HoleScope::Important => "messages_imp_holes",
            HoleScope::Media(_) | HoleScope::AllMedia => "media_holes",
        }
    }

    /// Concrete keys this key expands to (one per media kind for `AllMedia`).
    fn expand(&self) -> Vec<HoleKey> {
        match self.scope {
            HoleScope::AllMedia => MediaKind::ALL
                .iter()
                .map(|kind| HoleKey::media(self.dialog_id, *kind))
                .collect(),
            _ => vec![*self],
        }
    }

    fn media_type(&self) -> Option<i32> {
        match self.scope {
            HoleScope::Media(kind) => Some(kind.as_i32()),
            _ => None,
        }
    }
}

/// One stored hole.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Hole {
    pub start: MessageId,
    pub end: MessageId,
    /// Media kind for rows of the media ledger.
    pub media: Option<MediaKind>,
}

impl Hole {
    pub fn is_sentinel(&self) -> bool {
        self.start == SENTINEL && self.end == SENTINEL
    }

    /// Whether `id` lies strictly inside the hole.
    pub fn contains(&self, id: MessageId) -> bool {
        self.start < id && id < self.end
    }
}

/// Change to apply to one hole when a range is closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Adjustment {
    Keep,
    Delete,
    /// Shrink the hole's end down to the given id.
    SetEnd(MessageId),
    /// Raise the hole's start up to the given id.
    SetStart(MessageId),
    /// Split into `(start, left_end)` and `(right_start, end)`.
    Split {
        left_end: MessageId,
        right_start: MessageId,
    },
}

/// Map a literal boundary id into the channel of the fetched range.
fn effective(id: MessageId, channel: i32) -> MessageId {
    if channel != 0 && (id == ORIGIN || id == SENTINEL) {
        compose(id as i32, channel)
    } else {
        id
    }
}

/// Decide what closing `[min_id, max_id]` does to `hole`.
///
/// Ranges adjacent by one id count as touching. The sentinel is exempt from
/// that rule on purpose: it marks the closed boundary, so only a range that
/// covers the first id removes it, and a range starting at id 2 keeps it.
pub fn plan(hole: &Hole, min_id: MessageId, max_id: MessageId) -> Adjustment {
    let channel = channel_of(max_id);
    let start = effective(hole.start, channel);
    let end = effective(hole.end, channel);

    if start == end && local_part(start) == 1 {
        return if local_part(min_id) <= 1 {
            Adjustment::Delete
        } else {
            Adjustment::Keep
        };
    }

    let reaches_upper = max_id >= end - 1;
    let reaches_lower = min_id <= start + 1;
    match (reaches_lower, reaches_upper) {
        (true, true) => Adjustment::Delete,
        (false, true) if min_id < end => Adjustment::SetEnd(min_id),
        (true, false) if max_id > start => Adjustment::SetStart(max_id),
        (false, false) => Adjustment::Split {
            left_end: min_id,
            right_start: max_id,
        },
        _ => Adjustment::Keep,
    }
}

/// List holes of a scope, ordered by start.
pub fn list(conn: &Connection, key: &HoleKey) -> Result<Vec<Hole>> {
    let (sql, with_type) = match key.scope {
        HoleScope::Media(_) => (
            "SELECT start_id, end_id, type FROM media_holes WHERE uid = ?1 AND type = ?2 ORDER BY start_id",
            true,
        ),
        HoleScope::AllMedia => (
            "SELECT start_id, end_id, type FROM media_holes WHERE uid = ?1 ORDER BY type, start_id",
            false,
        ),
        HoleScope::Messages => (
            "SELECT start_id, end_id, NULL FROM messages_holes WHERE uid = ?1 ORDER BY start_id",
            false,
        ),
        HoleScope::Important => (
            "SELECT start_id, end_id, NULL FROM messages_imp_holes WHERE uid = ?1 ORDER BY start_id",
            false,
        ),
    };

    let mut stmt = conn.prepare(sql)?;
    let map = |row: &rusqlite::Row<'_>| {
        Ok(Hole {
            start: row.get(0)?,
            end: row.get(1)?,
            media: row.get::<_, Option<i32>>(2)?.and_then(MediaKind::from_i32),
        })
    };
    let rows = if with_type {
        stmt.query_map(params![key.dialog_id, key.media_type()], map)?
            .collect::<std::result::Result<Vec<_>, _>>()?
    } else {
        stmt.query_map(params![key.dialog_id], map)?
            .collect::<std::result::Result<Vec<_>, _>>()?
    };
    Ok(rows)
}

/// Insert (or replace) a hole. `AllMedia` inserts one per media kind.
pub fn insert(conn: &Connection, key: &HoleKey, start: MessageId, end: MessageId) -> Result<()> {
    for key in key.expand() {
        write_hole(conn, &key, start, end, "INSERT OR REPLACE")?;
    }
    Ok(())
}

fn write_hole(
    conn: &Connection,
    key: &HoleKey,
    start: MessageId,
    end: MessageId,
    verb: &str,
) -> Result<()> {
    match key.media_type() {
        Some(kind) => conn.execute(
            &format!("{verb} INTO media_holes (uid, type, start_id, end_id) VALUES (?1, ?2, ?3, ?4)"),
            params![key.dialog_id, kind, start, end],
        )?,
        None => conn.execute(
            &format!("{verb} INTO {} (uid, start_id, end_id) VALUES (?1, ?2, ?3)", key.table()),
            params![key.dialog_id, start, end],
        )?,
    };
    Ok(())
}

/// Remove every hole of a scope (`AllMedia` clears every media kind).
pub fn delete_all(conn: &Connection, key: &HoleKey) -> Result<()> {
    match key.scope {
        HoleScope::Media(kind) => conn.execute(
            "DELETE FROM media_holes WHERE uid = ?1 AND type = ?2",
            params![key.dialog_id, kind.as_i32()],
        )?,
        _ => conn.execute(
            &format!("DELETE FROM {} WHERE uid = ?1", key.table()),
            [key.dialog_id],
        )?,
    };
    Ok(())
}

/// Remove every hole of a dialog in every ledger.
pub fn clear(conn: &Connection, dialog_id: DialogId) -> Result<()> {
    for key in [
        HoleKey::messages(dialog_id),
        HoleKey::important(dialog_id),
        HoleKey::all_media(dialog_id),
    ] {
        delete_all(conn, &key)?;
    }
    Ok(())
}

/// Record that `[min_id, max_id]` is now fully cached.
///
/// Returns the number of holes changed.
pub fn close_range(
    conn: &Connection,
    key: &HoleKey,
    min_id: MessageId,
    max_id: MessageId,
) -> Result<usize> {
    let (min_id, max_id) = if min_id <= max_id {
        (min_id, max_id)
    } else {
        (max_id, min_id)
    };

    in_transaction(conn, |tx| {
        let mut changed = 0;
        for key in key.expand() {
            for hole in touching(tx, &key, min_id, max_id)? {
                let adjustment = plan(&hole, min_id, max_id);
                if adjustment != Adjustment::Keep {
                    apply(tx, &key, &hole, adjustment)?;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    })
}

/// Holes overlapping or adjacent to `[min_id, max_id]`, plus the boundary markers.
fn touching(
    conn: &Connection,
    key: &HoleKey,
    min_id: MessageId,
    max_id: MessageId,
) -> Result<Vec<Hole>> {
    let lower = min_id.saturating_sub(1);
    let upper = max_id.saturating_add(1);
    let holes = list(conn, key)?;
    Ok(holes
        .into_iter()
        .filter(|h| {
            let channel = channel_of(max_id);
            let start = effective(h.start, channel);
            let end = effective(h.end, channel);
            end >= lower && start <= upper
        })
        .collect())
}

fn apply(conn: &Connection, key: &HoleKey, hole: &Hole, adjustment: Adjustment) -> Result<()> {
    let table = key.table();
    let mut values = vec![key.dialog_id, hole.start];
    let mut filter = String::from("uid = ?1 AND start_id = ?2");
    if let Some(kind) = key.media_type() {
        values.push(i64::from(kind));
        filter.push_str(" AND type = ?3");
    }
    let slot = values.len() + 1;

    match adjustment {
        Adjustment::Keep => {}
        Adjustment::Delete => {
            conn.execute(
                &format!("DELETE FROM {table} WHERE {filter}"),
                params_from_iter(&values),
            )?;
        }
        Adjustment::SetEnd(end) => {
            values.push(end);
            conn.execute(
                &format!("UPDATE {table} SET end_id = ?{slot} WHERE {filter}"),
                params_from_iter(&values),
            )?;
        }
        Adjustment::SetStart(start) => {
            values.push(start);
            conn.execute(
                &format!("UPDATE OR REPLACE {table} SET start_id = ?{slot} WHERE {filter}"),
                params_from_iter(&values),
            )?;
        }
        Adjustment::Split {
            left_end,
            right_start,
        } => {
            values.push(left_end);
            conn.execute(
                &format!("UPDATE {table} SET end_id = ?{slot} WHERE {filter}"),
                params_from_iter(&values),
            )?;
            write_hole(conn, key, right_start, hole.end, "INSERT OR REPLACE")?;
        }
    }
    Ok(())
}

/// Record that the oldest page of history has been fetched.
///
/// `max_id == 0` means the dialog has no history at all: every hole goes.
/// Otherwise everything up to `max_id` is closed. Either way the sentinel is
/// (re)inserted.
pub fn mark_complete_at_boundary(conn: &Connection, key: &HoleKey, max_id: MessageId) -> Result<()> {
    in_transaction(conn, |tx| {
        if max_id == 0 {
            delete_all(tx, key)?;
        } else {
            let first = compose(1, channel_of(max_id));
            close_range(tx, key, first.min(max_id), max_id)?;
        }
        for key in key.expand() {
            write_hole(tx, &key, SENTINEL, SENTINEL, "INSERT OR IGNORE")?;
        }
        Ok(())
    })
}

/// Whether the oldest end of the history is closed.
///
/// If neither boundary marker exists, the minimum stored id is probed and an
/// initial hole `(0, min)` is materialized (or the sentinel, when the minimum
/// is the first id). With nothing stored the answer is `false`.
pub fn query_boundary(conn: &Connection, key: &HoleKey) -> Result<bool> {
    if key.scope == HoleScope::AllMedia {
        for key in key.expand() {
            if !query_boundary(conn, &key)? {
                return Ok(false);
            }
        }
        return Ok(true);
    }

    let marker: Option<i64> = match key.media_type() {
        Some(kind) => conn.query_row(
            "SELECT MAX(start_id) FROM media_holes WHERE uid = ?1 AND type = ?2 AND start_id IN (0, 1)",
            params![key.dialog_id, kind],
            |row| row.get(0),
        )?,
        None => conn.query_row(
            &format!(
                "SELECT MAX(start_id) FROM {} WHERE uid = ?1 AND start_id IN (0, 1)",
                key.table()
            ),
            [key.dialog_id],
            |row| row.get(0),
        )?,
    };

    if let Some(start) = marker {
        return Ok(start == SENTINEL);
    }

    let Some(min_id) = min_stored_id(conn, key)? else {
        return Ok(false);
    };
    if local_part(min_id) == 1 {
        write_hole(conn, key, SENTINEL, SENTINEL, "INSERT OR IGNORE")?;
        Ok(true)
    } else {
        write_hole(conn, key, ORIGIN, min_id, "INSERT OR IGNORE")?;
        Ok(false)
    }
}

fn min_stored_id(conn: &Connection, key: &HoleKey) -> Result<Option<MessageId>> {
    let min: Option<i64> = match key.scope {
        HoleScope::Messages => conn.query_row(
            "SELECT MIN(mid) FROM messages WHERE uid = ?1 AND mid > 0",
            [key.dialog_id],
            |row| row.get(0),
        )?,
        HoleScope::Important => conn.query_row(
            "SELECT MIN(mid) FROM messages WHERE uid = ?1 AND mid > 0 AND imp = 1",
            [key.dialog_id],
            |row| row.get(0),
        )?,
        HoleScope::Media(kind) => conn.query_row(
            "SELECT MIN(mid) FROM media_index WHERE uid = ?1 AND type = ?2 AND mid > 0",
            params![key.dialog_id, kind.as_i32()],
            |row| row.get(0),
        )?,
        HoleScope::AllMedia => None,
    };
    Ok(min)
}

/// Seed the ledger when a dialog is first cached with `top_id` as its newest message.
///
/// Everything below `top_id` is unknown; a history whose newest message is the
/// first one is closed outright.
pub fn seed(conn: &Connection, key: &HoleKey, top_id: MessageId) -> Result<()> {
    if top_id <= 0 {
        return Ok(());
    }
    let start = if local_part(top_id) == 1 { SENTINEL } else { ORIGIN };
    let end = if start == SENTINEL { SENTINEL } else { top_id };
    for key in key.expand() {
        write_hole(conn, &key, start, end, "INSERT OR IGNORE")?;
    }
    Ok(())
}

/// Smallest hole start at or above `id`: forward pagination must stop there.
pub fn nearest_start_at_or_above(
    conn: &Connection,
    key: &HoleKey,
    id: MessageId,
) -> Result<Option<MessageId>> {
    let value = match key.media_type() {
        Some(kind) => conn.query_row(
            "SELECT MIN(start_id) FROM media_holes WHERE uid = ?1 AND type = ?2 AND start_id >= ?3",
            params![key.dialog_id, kind, id],
            |row| row.get(0),
        )?,
        None => conn.query_row(
            &format!(
                "SELECT MIN(start_id) FROM {} WHERE uid = ?1 AND start_id >= ?2",
                key.table()
            ),
            params![key.dialog_id, id],
            |row| row.get(0),
        )?,
    };
    Ok(value)
}

/// Largest hole end at or below `id`: backward pagination must stop there.
pub fn max_end_at_or_below(
    conn: &Connection,
    key: &HoleKey,
    id: MessageId,
) -> Result<Option<MessageId>> {
    let value = match key.media_type() {
        Some(kind) => conn.query_row(
            "SELECT MAX(end_id) FROM media_holes WHERE uid = ?1 AND type = ?2 AND end_id <= ?3",
            params![key.dialog_id, kind, id],
            |row| row.get(0),
        )?,
        None => conn.query_row(
            &format!(
                "SELECT MAX(end_id) FROM {} WHERE uid = ?1 AND end_id <= ?2",
                key.table()
            ),
            params![key.dialog_id, id],
            |row| row.get(0),
        )?,
    };
    Ok(value)
}

/// Whether any hole of the scope contains `id`.
pub fn is_inside_hole(conn: &Connection, key: &HoleKey, id: MessageId) -> Result<bool> {
    Ok(list(conn, key)?.iter().any(|h| h.contains(id)))
}
