//! Dialog aggregates: unread counters and last-message pointers.
//!
//! Every function runs inside the caller's unit of work, reads the stored
//! aggregates and writes the adjusted values back. Pointers only move to a
//! strictly newer `(date, id)` on insert, and a dialog's `date` never
//! decreases.

use std::collections::{BTreeMap, HashMap, HashSet};

use rusqlite::{params, Connection};

use murmur_types::records::{Dialog, Message};
use murmur_types::{DialogId, MessageId, Timestamp};

use crate::queries::dialogs;
use crate::queries::messages::{self, RowState};
use crate::Result;

#[derive(Default)]
struct Pending {
    unread: i32,
    unread_important: i32,
    newest: Option<(Timestamp, MessageId)>,
    newest_important: Option<(Timestamp, MessageId)>,
}

fn newer(candidate: (Timestamp, MessageId), current: Option<(Timestamp, MessageId)>) -> bool {
    current.map_or(true, |current| candidate > current)
}

/// Result of folding a batch of inserted messages into the dialogs.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InsertSummary {
    /// Newly unread incoming messages per dialog.
    pub new_unread: BTreeMap<DialogId, i32>,
    /// Dialogs that had no row before the batch.
    pub created: Vec<DialogId>,
    /// Dialogs whose last-message pointer moved.
    pub repointed: Vec<DialogId>,
}

fn unread_weight(row: &RowState) -> (i32, i32) {
    if row.counts_unread() {
        (1, i32::from(row.important))
    } else {
        (0, 0)
    }
}

/// Fold freshly stored messages into their dialogs.
///
/// `previous` holds the rows as stored before the batch was written. A
/// re-delivered message only changes the counters by the difference
/// between its old and its merged state, and read bits already set
/// locally survive the overwrite.
pub fn after_insert(
    conn: &Connection,
    batch: &[Message],
    previous: &HashMap<MessageId, RowState>,
) -> Result<InsertSummary> {
    let mut per_dialog: BTreeMap<DialogId, Pending> = BTreeMap::new();
    let mut fresh_unread: BTreeMap<DialogId, i32> = BTreeMap::new();
    // Rows as written so far, so a duplicate inside the batch diffs against
    // its first copy.
    let mut written: HashMap<MessageId, RowState> = HashMap::new();
    for message in batch {
        let mut merged = RowState::from(message);
        let stored = written.get(&message.id).or_else(|| previous.get(&message.id));
        let (before, before_important) = match stored {
            Some(stored) => {
                merged.read_state |= stored.read_state;
                unread_weight(stored)
            }
            None => (0, 0),
        };
        let (after, after_important) = unread_weight(&merged);
        let pending = per_dialog.entry(message.dialog_id).or_default();
        pending.unread += after - before;
        pending.unread_important += after_important - before_important;
        if stored.is_none() && after > 0 {
            *fresh_unread.entry(message.dialog_id).or_default() += 1;
        }
        written.insert(message.id, merged);
        let key = (message.date, message.id);
        if newer(key, pending.newest) {
            pending.newest = Some(key);
        }
        if message.important && newer(key, pending.newest_important) {
            pending.newest_important = Some(key);
        }
    }

    let mut summary = InsertSummary::default();
    for (dialog_id, pending) in per_dialog {
        let existing = dialogs::find(conn, dialog_id)?;
        let created = existing.is_none();
        let mut dialog = existing.unwrap_or_else(|| Dialog {
            id: dialog_id,
            ..Dialog::default()
        });

        dialog.unread_count = (dialog.unread_count + pending.unread).max(0);
        dialog.unread_important = (dialog.unread_important + pending.unread_important).max(0);

        let current = (!created).then_some((dialog.date, dialog.last_message_id));
        let mut moved = false;
        if let Some((date, mid)) = pending.newest {
            if newer((date, mid), current) {
                dialog.date = dialog.date.max(date);
                dialog.last_message_id = mid;
                moved = true;
            }
        }
        if let Some((date, mid)) = pending.newest_important {
            let current = (dialog.last_important_id != 0)
                .then_some((dialog.date_important, dialog.last_important_id));
            if newer((date, mid), current) {
                dialog.date_important = dialog.date_important.max(date);
                dialog.last_important_id = mid;
            }
        }

        dialogs::upsert(conn, &dialog)?;
        if let Some(count) = fresh_unread.get(&dialog_id) {
            summary.new_unread.insert(dialog_id, *count);
        }
        if created {
            summary.created.push(dialog_id);
        }
        if moved {
            summary.repointed.push(dialog_id);
        }
    }
    Ok(summary)
}

/// Repair dialogs after `deleted` rows were removed.
///
/// Deleted unread messages are subtracted from the counters (floored at
/// zero) and a pointer at a deleted id falls back to the newest remaining
/// message, or zero when none is left. Returns the dialogs touched.
pub fn after_delete(conn: &Connection, deleted: &[RowState]) -> Result<Vec<DialogId>> {
    let ids: HashSet<MessageId> = deleted.iter().map(|row| row.mid).collect();
    let mut per_dialog: BTreeMap<DialogId, (i32, i32)> = BTreeMap::new();
    for row in deleted {
        let counts = per_dialog.entry(row.dialog_id).or_default();
        let (unread, important) = unread_weight(row);
        counts.0 += unread;
        counts.1 += important;
    }

    let mut touched = Vec::new();
    for (dialog_id, (unread, unread_important)) in per_dialog {
        let Some(mut dialog) = dialogs::find(conn, dialog_id)? else {
            continue;
        };
        dialog.unread_count = (dialog.unread_count - unread).max(0);
        dialog.unread_important = (dialog.unread_important - unread_important).max(0);

        if ids.contains(&dialog.last_message_id) {
            dialog.last_message_id = messages::newest(conn, dialog_id, false)?
                .map_or(0, |(mid, _)| mid);
        }
        if ids.contains(&dialog.last_important_id) {
            dialog.last_important_id = messages::newest(conn, dialog_id, true)?
                .map_or(0, |(mid, _)| mid);
        }
        dialogs::upsert(conn, &dialog)?;
        touched.push(dialog_id);
    }
    Ok(touched)
}

/// Subtract newly read messages from a dialog's counters, floored at zero.
pub fn after_read(
    conn: &Connection,
    dialog_id: DialogId,
    read: i32,
    read_important: i32,
) -> Result<()> {
    if read == 0 && read_important == 0 {
        return Ok(());
    }
    conn.execute(
        "UPDATE dialogs
         SET unread_count = MAX(0, unread_count - ?2),
             unread_count_i = MAX(0, unread_count_i - ?3)
         WHERE did = ?1",
        params![dialog_id, read, read_important],
    )?;
    Ok(())
}

/// Aggregates recomputed from the message rows alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Derived {
    pub unread_count: i32,
    pub unread_important: i32,
    pub last_message_id: MessageId,
    pub last_important_id: MessageId,
}

pub fn derive(conn: &Connection, dialog_id: DialogId) -> Result<Derived> {
    let (unread_count, unread_important) = messages::count_unread(conn, dialog_id)?;
    Ok(Derived {
        unread_count,
        unread_important,
        last_message_id: messages::newest(conn, dialog_id, false)?.map_or(0, |(mid, _)| mid),
        last_important_id: messages::newest(conn, dialog_id, true)?.map_or(0, |(mid, _)| mid),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::messages::tests::message;
    use murmur_types::records::read_flags;

    const DID: DialogId = 12;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    fn store(conn: &Connection, batch: &[Message]) -> InsertSummary {
        let ids: Vec<_> = batch.iter().map(|m| m.id).collect();
        let previous = messages::row_states(conn, &ids).expect("row states");
        for message in batch {
            messages::upsert(conn, message).expect("upsert");
        }
        after_insert(conn, batch, &previous).expect("after insert")
    }

    fn states(batch: &[Message]) -> Vec<RowState> {
        batch.iter().map(RowState::from).collect()
    }

    fn assert_derivable(conn: &Connection) {
        let dialog = dialogs::get(conn, DID).expect("dialog");
        let derived = derive(conn, DID).expect("derive");
        assert_eq!(
            (dialog.unread_count, dialog.unread_important, dialog.last_message_id),
            (derived.unread_count, derived.unread_important, derived.last_message_id)
        );
    }

    #[test]
    fn test_insert_creates_dialog_and_counts_unread() {
        let conn = test_db();
        let mut out = message(3, DID, 30);
        out.out = true;
        let summary = store(&conn, &[message(1, DID, 10), message(2, DID, 20), out]);

        assert_eq!(summary.created, vec![DID]);
        assert_eq!(summary.new_unread.get(&DID), Some(&2));
        let dialog = dialogs::get(&conn, DID).expect("dialog");
        assert_eq!((dialog.unread_count, dialog.last_message_id, dialog.date), (2, 3, 30));
        assert_eq!(derive(&conn, DID).expect("derive").unread_count, 2);
    }

    #[test]
    fn test_reinsert_does_not_double_count() {
        let conn = test_db();
        store(&conn, &[message(1, DID, 10)]);
        let summary = store(&conn, &[message(1, DID, 10)]);
        assert!(summary.new_unread.is_empty());
        assert_eq!(dialogs::get(&conn, DID).expect("dialog").unread_count, 1);
    }

    #[test]
    fn test_redelivered_read_copy_lowers_unread() {
        let conn = test_db();
        let mut important = message(1, DID, 10);
        important.important = true;
        store(&conn, &[important.clone()]);

        important.read_state = read_flags::READ;
        let summary = store(&conn, &[important]);
        assert!(summary.new_unread.is_empty());
        let dialog = dialogs::get(&conn, DID).expect("dialog");
        assert_eq!((dialog.unread_count, dialog.unread_important), (0, 0));
        assert_derivable(&conn);
    }

    #[test]
    fn test_redelivered_unread_copy_stays_read() {
        let conn = test_db();
        let mut read = message(1, DID, 10);
        read.read_state = read_flags::READ;
        store(&conn, &[read]);

        store(&conn, &[message(1, DID, 10)]);
        assert_eq!(dialogs::get(&conn, DID).expect("dialog").unread_count, 0);
        assert!(!messages::get(&conn, 1).expect("get").is_unread());
        assert_derivable(&conn);
    }

    #[test]
    fn test_duplicate_inside_batch_counts_once() {
        let conn = test_db();
        let summary = store(&conn, &[message(1, DID, 10), message(1, DID, 10)]);
        assert_eq!(summary.new_unread.get(&DID), Some(&1));
        assert_derivable(&conn);
    }

    #[test]
    fn test_delete_of_undecodable_row_repairs_dialog() {
        let conn = test_db();
        store(&conn, &[message(1, DID, 10), message(2, DID, 20)]);
        conn.execute("UPDATE messages SET data = x'FF00' WHERE mid = 2", [])
            .expect("corrupt envelope");

        let rows: Vec<RowState> = messages::row_states(&conn, &[2])
            .expect("row states")
            .into_values()
            .collect();
        messages::delete(&conn, &[2]).expect("delete");
        after_delete(&conn, &rows).expect("after delete");

        let dialog = dialogs::get(&conn, DID).expect("dialog");
        assert_eq!((dialog.last_message_id, dialog.unread_count), (1, 1));
        assert_derivable(&conn);
    }

    #[test]
    fn test_pointer_never_regresses_on_insert() {
        let conn = test_db();
        store(&conn, &[message(10, DID, 100)]);
        let summary = store(&conn, &[message(5, DID, 50)]);
        assert!(summary.repointed.is_empty());
        let dialog = dialogs::get(&conn, DID).expect("dialog");
        assert_eq!((dialog.last_message_id, dialog.date), (10, 100));

        // Same date, higher id wins the tie.
        store(&conn, &[message(11, DID, 100)]);
        assert_eq!(dialogs::get(&conn, DID).expect("dialog").last_message_id, 11);
    }

    #[test]
    fn test_important_stream_tracked_separately() {
        let conn = test_db();
        let mut important = message(4, DID, 40);
        important.important = true;
        store(&conn, &[message(1, DID, 10), important, message(6, DID, 60)]);

        let dialog = dialogs::get(&conn, DID).expect("dialog");
        assert_eq!((dialog.last_message_id, dialog.last_important_id), (6, 4));
        assert_eq!((dialog.unread_count, dialog.unread_important), (3, 1));
    }

    #[test]
    fn test_delete_repoints_and_keeps_date() {
        let conn = test_db();
        let batch = [message(1, DID, 10), message(2, DID, 20)];
        store(&conn, &batch);

        messages::delete(&conn, &[2]).expect("delete");
        after_delete(&conn, &states(&batch[1..])).expect("after delete");
        let dialog = dialogs::get(&conn, DID).expect("dialog");
        assert_eq!((dialog.last_message_id, dialog.unread_count, dialog.date), (1, 1, 20));

        messages::delete(&conn, &[1]).expect("delete");
        after_delete(&conn, &states(&batch[..1])).expect("after delete");
        let dialog = dialogs::get(&conn, DID).expect("dialog");
        assert_eq!((dialog.last_message_id, dialog.unread_count, dialog.date), (0, 0, 20));
    }

    #[test]
    fn test_read_floors_at_zero() {
        let conn = test_db();
        store(&conn, &[message(1, DID, 10)]);
        after_read(&conn, DID, 5, 5).expect("read");
        let dialog = dialogs::get(&conn, DID).expect("dialog");
        assert_eq!((dialog.unread_count, dialog.unread_important), (0, 0));
    }
}
