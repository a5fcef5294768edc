//! Message rows plus their `randoms` and `messages_seq` side tables.
//!
//! The `data` column holds the codec envelope of the whole [`Message`] minus
//! its reply preview, which lives in `replydata`. Mutable state (read bits,
//! send state, date, id) is kept in columns; on read the columns win over
//! whatever the envelope carried when it was written.

use std::collections::HashMap;

use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};

use murmur_types::codec;
use murmur_types::records::{read_flags, Message, SendState};
use murmur_types::{DialogId, MessageId, Timestamp};

use crate::sql::{execute_chunked, query_chunked};
use crate::{Result, StorageError};

const COLUMNS: &str = "mid, uid, read_state, send_state, date, data, out, ttl, replydata, imp";

/// Raw message row before the envelope is decoded.
#[derive(Debug)]
pub struct StoredMessage {
    pub mid: MessageId,
    pub uid: DialogId,
    pub read_state: i32,
    pub send_state: i32,
    pub date: Timestamp,
    pub data: Vec<u8>,
    pub out: bool,
    pub ttl: i32,
    pub replydata: Option<Vec<u8>>,
    pub imp: bool,
}

impl StoredMessage {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(StoredMessage {
            mid: row.get(0)?,
            uid: row.get(1)?,
            read_state: row.get(2)?,
            send_state: row.get(3)?,
            date: row.get(4)?,
            data: row.get(5)?,
            out: row.get(6)?,
            ttl: row.get(7)?,
            replydata: row.get(8)?,
            imp: row.get(9)?,
        })
    }

    /// Decode the envelope and overlay the column values.
    pub fn into_message(self) -> Result<Message> {
        let mut message: Message = codec::decode(&self.data)?;
        message.id = self.mid;
        message.dialog_id = self.uid;
        message.read_state = self.read_state;
        message.send_state = SendState::from_i32(self.send_state);
        message.date = self.date;
        message.out = self.out;
        message.ttl = self.ttl;
        message.important = self.imp;
        message.reply_preview = self.replydata;
        Ok(message)
    }
}

/// Decode rows, skipping (and logging) any whose envelope is malformed.
pub fn decode_all(rows: Vec<StoredMessage>) -> Vec<Message> {
    rows.into_iter()
        .filter_map(|row| {
            let mid = row.mid;
            match row.into_message() {
                Ok(message) => Some(message),
                Err(e) => {
                    tracing::warn!(mid, "Skipping undecodable message row: {e}");
                    None
                }
            }
        })
        .collect()
}

/// Envelope written to `data` (and reused by the media index).
pub fn envelope(message: &Message) -> Result<Vec<u8>> {
    let mut body = message.clone();
    body.reply_preview = None;
    Ok(codec::encode(&body)?)
}

/// Insert one message row, or overwrite the stored one.
///
/// Read bits are only ever added: a re-delivered copy without them keeps
/// the bits already set locally.
pub fn upsert(conn: &Connection, message: &Message) -> Result<()> {
    let data = envelope(message)?;
    let media = message.media.as_ref().map_or(-1, |m| m.kind.as_i32());
    conn.execute(
        "INSERT INTO messages
            (mid, uid, read_state, send_state, date, data, out, ttl, media, replydata, imp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(mid) DO UPDATE SET
            uid = excluded.uid,
            read_state = messages.read_state | excluded.read_state,
            send_state = excluded.send_state,
            date = excluded.date,
            data = excluded.data,
            out = excluded.out,
            ttl = excluded.ttl,
            media = excluded.media,
            replydata = excluded.replydata,
            imp = excluded.imp",
        params![
            message.id,
            message.dialog_id,
            message.read_state,
            message.send_state.as_i32(),
            message.date,
            data,
            message.out,
            message.ttl,
            media,
            message.reply_preview,
            message.important,
        ],
    )?;
    Ok(())
}

/// Get a message by composite id.
pub fn get(conn: &Connection, mid: MessageId) -> Result<Message> {
    let row = conn
        .query_row(
            &format!("SELECT {COLUMNS} FROM messages WHERE mid = ?1"),
            [mid],
            StoredMessage::from_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StorageError::NotFound(format!("message {mid}")),
            other => StorageError::Sqlite(other),
        })?;
    row.into_message()
}

/// Fetch the rows for a set of ids, in no particular order.
pub fn get_many(conn: &Connection, ids: &[MessageId]) -> Result<Vec<StoredMessage>> {
    query_chunked(
        conn,
        &format!("SELECT {COLUMNS} FROM messages WHERE mid IN ({{ids}})"),
        &[],
        ids,
        StoredMessage::from_row,
    )
}

pub fn exists(conn: &Connection, mid: MessageId) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM messages WHERE mid = ?1", [mid], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

/// The columns that feed dialog aggregates, read without touching the
/// envelope so malformed rows are still accounted for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowState {
    pub mid: MessageId,
    pub dialog_id: DialogId,
    pub date: Timestamp,
    pub read_state: i32,
    pub out: bool,
    pub important: bool,
}

impl RowState {
    /// Counts towards the dialog's unread counter.
    pub fn counts_unread(&self) -> bool {
        !self.out && self.read_state & read_flags::READ == 0
    }
}

impl From<&Message> for RowState {
    fn from(message: &Message) -> Self {
        RowState {
            mid: message.id,
            dialog_id: message.dialog_id,
            date: message.date,
            read_state: message.read_state,
            out: message.out,
            important: message.important,
        }
    }
}

/// Aggregate columns of the stored rows among `ids`, keyed by id.
pub fn row_states(conn: &Connection, ids: &[MessageId]) -> Result<HashMap<MessageId, RowState>> {
    let rows = query_chunked(
        conn,
        "SELECT mid, uid, date, read_state, out, imp FROM messages WHERE mid IN ({ids})",
        &[],
        ids,
        |row| {
            Ok(RowState {
                mid: row.get(0)?,
                dialog_id: row.get(1)?,
                date: row.get(2)?,
                read_state: row.get(3)?,
                out: row.get(4)?,
                important: row.get(5)?,
            })
        },
    )?;
    Ok(rows.into_iter().map(|row| (row.mid, row)).collect())
}

/// Delete message rows and their `randoms` / `messages_seq` entries.
pub fn delete(conn: &Connection, ids: &[MessageId]) -> Result<usize> {
    let deleted = execute_chunked(conn, "DELETE FROM messages WHERE mid IN ({ids})", &[], ids)?;
    execute_chunked(conn, "DELETE FROM randoms WHERE mid IN ({ids})", &[], ids)?;
    execute_chunked(conn, "DELETE FROM messages_seq WHERE mid IN ({ids})", &[], ids)?;
    Ok(deleted)
}

/// Every message id of a dialog.
pub fn ids_for_dialog(conn: &Connection, dialog_id: DialogId) -> Result<Vec<MessageId>> {
    let mut stmt = conn.prepare("SELECT mid FROM messages WHERE uid = ?1")?;
    let ids = stmt
        .query_map([dialog_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

// ============================================================
// Range queries
// ============================================================

/// Bounds of one page query. Bounds are inclusive; `None` means unbounded.
#[derive(Clone, Copy, Debug)]
pub struct Range {
    pub dialog_id: DialogId,
    /// Lowest confirmed id to return.
    pub min_id: Option<MessageId>,
    /// Highest confirmed id to return.
    pub max_id: Option<MessageId>,
    /// Date bounds, applied to every row including pending ones.
    pub min_date: Option<Timestamp>,
    pub max_date: Option<Timestamp>,
    /// Also return locally pending (negative id) messages.
    pub include_pending: bool,
    pub important_only: bool,
    pub descending: bool,
    pub limit: usize,
}

impl Range {
    pub fn new(dialog_id: DialogId, limit: usize) -> Self {
        Range {
            dialog_id,
            min_id: None,
            max_id: None,
            min_date: None,
            max_date: None,
            include_pending: false,
            important_only: false,
            descending: true,
            limit,
        }
    }
}

/// Page of messages ordered by `(date, mid)`.
pub fn range(conn: &Connection, range: &Range) -> Result<Vec<Message>> {
    if range.limit == 0 {
        return Ok(Vec::new());
    }
    let mut values: Vec<Value> = vec![Value::Integer(range.dialog_id)];
    let mut confirmed = String::from("mid > 0");
    if let Some(min) = range.min_id {
        values.push(Value::Integer(min));
        confirmed.push_str(&format!(" AND mid >= ?{}", values.len()));
    }
    if let Some(max) = range.max_id {
        values.push(Value::Integer(max));
        confirmed.push_str(&format!(" AND mid <= ?{}", values.len()));
    }
    let ids = if range.include_pending {
        format!("(({confirmed}) OR mid < 0)")
    } else {
        format!("({confirmed})")
    };
    let mut dates = String::new();
    if let Some(min) = range.min_date {
        values.push(Value::Integer(min));
        dates.push_str(&format!(" AND date >= ?{}", values.len()));
    }
    if let Some(max) = range.max_date {
        values.push(Value::Integer(max));
        dates.push_str(&format!(" AND date <= ?{}", values.len()));
    }
    let important = if range.important_only { " AND imp = 1" } else { "" };
    let order = if range.descending { "DESC" } else { "ASC" };
    values.push(Value::Integer(range.limit as i64));

    let sql = format!(
        "SELECT {COLUMNS} FROM messages
         WHERE uid = ?1 AND {ids}{dates}{important}
         ORDER BY date {order}, mid {order}
         LIMIT ?{}",
        values.len()
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), StoredMessage::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(decode_all(rows))
}

/// Newest message of a dialog as `(mid, date)`, by `(date, mid)`.
pub fn newest(
    conn: &Connection,
    dialog_id: DialogId,
    important_only: bool,
) -> Result<Option<(MessageId, Timestamp)>> {
    let important = if important_only { " AND imp = 1" } else { "" };
    let row = conn
        .query_row(
            &format!(
                "SELECT mid, date FROM messages WHERE uid = ?1{important}
                 ORDER BY date DESC, mid DESC LIMIT 1"
            ),
            [dialog_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(row)
}

/// Incoming unread messages of a dialog as `(all, important)`.
pub fn count_unread(conn: &Connection, dialog_id: DialogId) -> Result<(i32, i32)> {
    let counts = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(imp), 0) FROM messages
         WHERE uid = ?1 AND out = 0 AND (read_state & ?2) = 0",
        params![dialog_id, read_flags::READ],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(counts)
}

/// Oldest incoming unread confirmed message, as `(mid, date)`.
pub fn first_unread(
    conn: &Connection,
    dialog_id: DialogId,
    important_only: bool,
) -> Result<Option<(MessageId, Timestamp)>> {
    let important = if important_only { " AND imp = 1" } else { "" };
    let row = conn
        .query_row(
            &format!(
                "SELECT mid, date FROM messages
                 WHERE uid = ?1 AND mid > 0 AND out = 0 AND (read_state & ?2) = 0{important}
                 ORDER BY mid ASC LIMIT 1"
            ),
            params![dialog_id, read_flags::READ],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(row)
}

// ============================================================
// State updates
// ============================================================

/// Set the read bit on incoming (`out == false`) or outgoing confirmed
/// messages up to `max_id`. Returns newly read `(all, important)` counts.
pub fn mark_read_up_to(
    conn: &Connection,
    dialog_id: DialogId,
    max_id: MessageId,
    out: bool,
) -> Result<(i32, i32)> {
    let counts = conn.query_row(
        "SELECT COUNT(*), COALESCE(SUM(imp), 0) FROM messages
         WHERE uid = ?1 AND mid > 0 AND mid <= ?2 AND out = ?3 AND (read_state & ?4) = 0",
        params![dialog_id, max_id, out, read_flags::READ],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    conn.execute(
        "UPDATE messages SET read_state = read_state | ?4
         WHERE uid = ?1 AND mid > 0 AND mid <= ?2 AND out = ?3 AND (read_state & ?4) = 0",
        params![dialog_id, max_id, out, read_flags::READ],
    )?;
    Ok(counts)
}

/// Set the read bit on outgoing messages of a secret dialog sent at or before
/// `max_date`. Returns the ids newly marked.
pub fn mark_read_by_date(
    conn: &Connection,
    dialog_id: DialogId,
    max_date: Timestamp,
) -> Result<Vec<MessageId>> {
    let mut stmt = conn.prepare(
        "SELECT mid FROM messages
         WHERE uid = ?1 AND date <= ?2 AND out = 1 AND (read_state & ?3) = 0",
    )?;
    let ids = stmt
        .query_map(params![dialog_id, max_date, read_flags::READ], |row| row.get(0))?
        .collect::<std::result::Result<Vec<MessageId>, _>>()?;
    execute_chunked(
        conn,
        "UPDATE messages SET read_state = read_state | ?1 WHERE mid IN ({ids})",
        &[&read_flags::READ],
        &ids,
    )?;
    Ok(ids)
}

/// Set the content-read bit.
pub fn mark_content_read(conn: &Connection, ids: &[MessageId]) -> Result<usize> {
    execute_chunked(
        conn,
        "UPDATE messages SET read_state = read_state | ?1 WHERE mid IN ({ids})",
        &[&read_flags::CONTENT_READ],
        ids,
    )
}

pub fn set_send_state(conn: &Connection, mid: MessageId, state: SendState) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE messages SET send_state = ?2 WHERE mid = ?1",
        params![mid, state.as_i32()],
    )?)
}

/// Turn every `Sending` message into `Failed`. Returns the ids touched.
pub fn fail_sending(conn: &Connection) -> Result<Vec<MessageId>> {
    let mut stmt = conn.prepare("SELECT mid FROM messages WHERE send_state = ?1")?;
    let ids = stmt
        .query_map([SendState::Sending.as_i32()], |row| row.get(0))?
        .collect::<std::result::Result<Vec<MessageId>, _>>()?;
    conn.execute(
        "UPDATE messages SET send_state = ?2 WHERE send_state = ?1",
        params![SendState::Sending.as_i32(), SendState::Failed.as_i32()],
    )?;
    Ok(ids)
}

/// Confirm a message in place: send state becomes `Confirmed`, date is replaced.
pub fn confirm(conn: &Connection, mid: MessageId, date: Timestamp) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE messages SET send_state = ?2, date = ?3 WHERE mid = ?1",
        params![mid, SendState::Confirmed.as_i32(), date],
    )?)
}

/// Move a message row to a new id and confirm it. A zero `date` keeps the old one.
pub fn change_id(
    conn: &Connection,
    old_id: MessageId,
    new_id: MessageId,
    date: Timestamp,
) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE messages
         SET mid = ?2, send_state = ?3, date = CASE WHEN ?4 != 0 THEN ?4 ELSE date END
         WHERE mid = ?1",
        params![old_id, new_id, SendState::Confirmed.as_i32(), date],
    )?)
}

/// Messages of a dialog with a pending self-destruct timer, as `(mid, ttl)`.
pub fn with_ttl(
    conn: &Connection,
    dialog_id: DialogId,
    max_date: Timestamp,
) -> Result<Vec<(MessageId, i32)>> {
    let mut stmt = conn.prepare(
        "SELECT mid, ttl FROM messages WHERE uid = ?1 AND date <= ?2 AND ttl > 0",
    )?;
    let rows = stmt
        .query_map(params![dialog_id, max_date], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn clear_ttl(conn: &Connection, ids: &[MessageId]) -> Result<usize> {
    execute_chunked(conn, "UPDATE messages SET ttl = 0 WHERE mid IN ({ids})", &[], ids)
}

/// Newest unread incoming messages across dialogs that are not muted.
pub fn unread_preview(conn: &Connection, limit: usize) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM messages m
         JOIN dialogs d ON d.did = m.uid
         LEFT JOIN dialog_settings s ON s.did = m.uid
         WHERE d.unread_count > 0 AND m.out = 0 AND (m.read_state & ?1) = 0
           AND (COALESCE(s.flags, 0) & 1) = 0
         ORDER BY m.date DESC, m.mid DESC
         LIMIT ?2",
        COLUMNS
            .split(", ")
            .map(|c| format!("m.{c}"))
            .collect::<Vec<_>>()
            .join(", ")
    ))?;
    let rows = stmt
        .query_map(params![read_flags::READ, limit as i64], StoredMessage::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(decode_all(rows))
}

// ============================================================
// randoms / messages_seq
// ============================================================

pub fn put_random(conn: &Connection, random_id: i64, mid: MessageId) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO randoms (random_id, mid) VALUES (?1, ?2)",
        params![random_id, mid],
    )?;
    Ok(())
}

/// Message id recorded for a client random id.
pub fn mid_for_random(conn: &Connection, random_id: i64) -> Result<Option<MessageId>> {
    let mid = conn
        .query_row(
            "SELECT mid FROM randoms WHERE random_id = ?1 ORDER BY mid DESC LIMIT 1",
            [random_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(mid)
}

pub fn rekey_randoms(conn: &Connection, old_id: MessageId, new_id: MessageId) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE OR REPLACE randoms SET mid = ?2 WHERE mid = ?1",
        params![old_id, new_id],
    )?)
}

/// Record secret-chat sequence numbers for a message.
pub fn put_seq(conn: &Connection, mid: MessageId, seq_in: i32, seq_out: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO messages_seq (mid, seq_in, seq_out) VALUES (?1, ?2, ?3)",
        params![mid, seq_in, seq_out],
    )?;
    Ok(())
}

pub fn get_seq(conn: &Connection, mid: MessageId) -> Result<Option<(i32, i32)>> {
    let seq = conn
        .query_row(
            "SELECT seq_in, seq_out FROM messages_seq WHERE mid = ?1",
            [mid],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(seq)
}

pub fn rekey_seq(conn: &Connection, old_id: MessageId, new_id: MessageId) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE OR REPLACE messages_seq SET mid = ?2 WHERE mid = ?1",
        params![old_id, new_id],
    )?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use murmur_types::records::{MediaKind, MediaReference};

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    pub(crate) fn message(id: MessageId, dialog_id: DialogId, date: Timestamp) -> Message {
        Message {
            id,
            dialog_id,
            random_id: None,
            from_id: 7,
            date,
            out: false,
            read_state: 0,
            send_state: SendState::Confirmed,
            ttl: 0,
            important: false,
            media: None,
            keyboard: None,
            reply_to: None,
            reply_preview: None,
            payload: vec![0xAA, id as u8],
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let conn = test_db();
        let mut msg = message(10, 5, 1000);
        msg.reply_preview = Some(vec![1, 2, 3]);
        msg.media = Some(MediaReference {
            kind: MediaKind::Audio,
            file_id: 4,
            location: 1,
            file_name: None,
            size: 9,
        });
        upsert(&conn, &msg).expect("upsert");

        let loaded = get(&conn, 10).expect("get");
        assert_eq!(loaded, msg);
        let media: i32 = conn
            .query_row("SELECT media FROM messages WHERE mid = 10", [], |row| row.get(0))
            .expect("media column");
        assert_eq!(media, MediaKind::Audio.as_i32());
        assert!(exists(&conn, 10).expect("exists"));
        assert!(matches!(get(&conn, 11), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_columns_win_over_envelope() {
        let conn = test_db();
        upsert(&conn, &message(10, 5, 1000)).expect("upsert");
        mark_read_up_to(&conn, 5, 10, false).expect("read");
        set_send_state(&conn, 10, SendState::Failed).expect("state");

        let loaded = get(&conn, 10).expect("get");
        assert_eq!(loaded.read_state, read_flags::READ);
        assert_eq!(loaded.send_state, SendState::Failed);
    }

    #[test]
    fn test_range_bounds_and_order() {
        let conn = test_db();
        for (id, date) in [(1, 100), (2, 100), (3, 300), (4, 200), (-1, 500)] {
            upsert(&conn, &message(id, 5, date)).expect("upsert");
        }

        let mut page = Range::new(5, 10);
        page.max_id = Some(3);
        let ids: Vec<_> = range(&conn, &page).expect("range").iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);

        page.include_pending = true;
        page.min_id = Some(2);
        let ids: Vec<_> = range(&conn, &page).expect("range").iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![-1, 3, 2]);

        let mut forward = Range::new(5, 2);
        forward.descending = false;
        let ids: Vec<_> = range(&conn, &forward).expect("range").iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_unread_counts_and_mark_read() {
        let conn = test_db();
        for id in 1..=4 {
            let mut msg = message(id, 5, id * 10);
            msg.important = id % 2 == 0;
            upsert(&conn, &msg).expect("upsert");
        }
        let mut outgoing = message(5, 5, 50);
        outgoing.out = true;
        upsert(&conn, &outgoing).expect("upsert");

        assert_eq!(count_unread(&conn, 5).expect("count"), (4, 2));
        assert_eq!(first_unread(&conn, 5, false).expect("first"), Some((1, 10)));

        assert_eq!(mark_read_up_to(&conn, 5, 2, false).expect("read"), (2, 1));
        assert_eq!(mark_read_up_to(&conn, 5, 2, false).expect("read again"), (0, 0));
        assert_eq!(count_unread(&conn, 5).expect("count"), (2, 1));
        assert_eq!(first_unread(&conn, 5, true).expect("first"), Some((4, 40)));
    }

    #[test]
    fn test_fail_sending() {
        let conn = test_db();
        let mut msg = message(-3, 5, 10);
        msg.send_state = SendState::Sending;
        upsert(&conn, &msg).expect("upsert");
        upsert(&conn, &message(4, 5, 10)).expect("upsert");

        assert_eq!(fail_sending(&conn).expect("fail"), vec![-3]);
        assert_eq!(get(&conn, -3).expect("get").send_state, SendState::Failed);
        assert_eq!(get(&conn, 4).expect("get").send_state, SendState::Confirmed);
    }

    #[test]
    fn test_randoms_and_delete() {
        let conn = test_db();
        upsert(&conn, &message(-2, 5, 10)).expect("upsert");
        put_random(&conn, 999, -2).expect("random");
        put_seq(&conn, -2, 1, 2).expect("seq");
        assert_eq!(mid_for_random(&conn, 999).expect("lookup"), Some(-2));

        rekey_randoms(&conn, -2, 40).expect("rekey");
        assert_eq!(mid_for_random(&conn, 999).expect("lookup"), Some(40));

        assert_eq!(delete(&conn, &[-2]).expect("delete"), 1);
        assert!(get_seq(&conn, -2).expect("seq").is_none());
        assert!(row_states(&conn, &[-2, 40]).expect("states").is_empty());
    }

    #[test]
    fn test_redelivery_keeps_local_read_bits() {
        let conn = test_db();
        upsert(&conn, &message(10, 5, 1000)).expect("upsert");
        mark_read_up_to(&conn, 5, 10, false).expect("read");
        mark_content_read(&conn, &[10]).expect("content read");

        let mut again = message(10, 5, 1000);
        again.payload = vec![0xBB];
        upsert(&conn, &again).expect("upsert again");

        let loaded = get(&conn, 10).expect("get");
        assert_eq!(loaded.read_state, read_flags::READ | read_flags::CONTENT_READ);
        assert_eq!(loaded.payload, vec![0xBB]);
    }

    #[test]
    fn test_row_states_read_malformed_rows() {
        let conn = test_db();
        conn.execute(
            "INSERT INTO messages (mid, uid, date, data, imp) VALUES (2, 5, 20, x'FF00', 1)",
            [],
        )
        .expect("raw insert");
        let states = row_states(&conn, &[2, 3]).expect("states");
        assert_eq!(states.len(), 1);
        let state = states[&2];
        assert_eq!((state.dialog_id, state.date, state.important), (5, 20, true));
        assert!(state.counts_unread());
    }

    #[test]
    fn test_malformed_envelope_is_skipped() {
        let conn = test_db();
        upsert(&conn, &message(1, 5, 10)).expect("upsert");
        conn.execute(
            "INSERT INTO messages (mid, uid, date, data) VALUES (2, 5, 20, x'FF00')",
            [],
        )
        .expect("raw insert");
        let page = range(&conn, &Range::new(5, 10)).expect("range");
        assert_eq!(page.len(), 1);
        assert!(matches!(get(&conn, 2), Err(StorageError::Codec(_))));
    }
}
