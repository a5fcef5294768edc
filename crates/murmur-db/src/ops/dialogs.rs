//! Dialog list operations.

use rusqlite::Connection;
use serde_json::json;

use murmur_types::events::EventType;
use murmur_types::ids::PeerKind;
use murmur_types::records::{Chat, Dialog, Message, User};
use murmur_types::DialogId;

use crate::holes::{self, HoleKey};
use crate::ops::messages::secret_attachments;
use crate::ops::peers::{self, Peers};
use crate::queries::{
    chats, dialog_settings, dialogs, enc_chats, enc_tasks, keyboards, media, messages, users,
};
use crate::sql::unique_ids;
use crate::worker::Worker;
use crate::{in_transaction, Result};

/// Dialogs fetched from the network together with their last messages and
/// the peers they reference.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DialogsBatch {
    pub dialogs: Vec<Dialog>,
    pub messages: Vec<Message>,
    pub users: Vec<User>,
    pub chats: Vec<Chat>,
}

/// A page of the dialog list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DialogsPage {
    pub dialogs: Vec<Dialog>,
    /// Last message of each dialog, when cached.
    pub messages: Vec<Message>,
    pub peers: Peers,
}

/// Store a fetched dialog list.
///
/// Dialogs seen for the first time get their hole ledger seeded below the
/// last message. A stored pointer newer than the fetched one is kept.
pub fn put_dialogs(worker: &Worker, batch: &DialogsBatch) -> Result<()> {
    if batch.dialogs.is_empty() {
        return Ok(());
    }
    in_transaction(worker.conn(), |tx| {
        for fetched in &batch.dialogs {
            let existing = dialogs::find(tx, fetched.id)?;
            let mut dialog = fetched.clone();
            match &existing {
                None => {
                    holes::seed(tx, &HoleKey::messages(dialog.id), dialog.last_message_id)?;
                    holes::seed(tx, &HoleKey::all_media(dialog.id), dialog.last_message_id)?;
                    holes::seed(tx, &HoleKey::important(dialog.id), dialog.last_important_id)?;
                }
                Some(stored) => {
                    if (stored.date, stored.last_message_id) > (dialog.date, dialog.last_message_id) {
                        dialog.date = stored.date;
                        dialog.last_message_id = stored.last_message_id;
                    }
                    if (stored.date_important, stored.last_important_id)
                        > (dialog.date_important, dialog.last_important_id)
                    {
                        dialog.date_important = stored.date_important;
                        dialog.last_important_id = stored.last_important_id;
                    }
                    dialog.inbox_max = dialog.inbox_max.max(stored.inbox_max);
                    dialog.outbox_max = dialog.outbox_max.max(stored.outbox_max);
                    if dialog.pts == 0 {
                        dialog.pts = stored.pts;
                    }
                }
            }
            dialogs::upsert(tx, &dialog)?;
            dialog_settings::set(tx, dialog.id, dialog.flags)?;
        }
        for message in &batch.messages {
            messages::upsert(tx, message)?;
            media::put(tx, message)?;
        }
        for user in &batch.users {
            users::put(tx, user)?;
        }
        for chat in &batch.chats {
            chats::put(tx, chat)?;
        }
        Ok(())
    })?;

    let ids: Vec<DialogId> = batch.dialogs.iter().map(|d| d.id).collect();
    tracing::debug!(count = ids.len(), "Stored dialogs");
    worker.emit(EventType::DialogsNeedReload, json!({ "dialogs": ids }));
    Ok(())
}

/// Dialogs ordered by `date DESC` with their last messages and peers.
pub fn get_dialogs(conn: &Connection, offset: usize, count: usize) -> Result<DialogsPage> {
    let dialogs = dialogs::list(conn, offset, count)?;
    let last_ids = unique_ids(
        dialogs
            .iter()
            .map(|d| d.last_message_id)
            .filter(|mid| *mid != 0),
    );
    let messages = messages::decode_all(messages::get_many(conn, &last_ids)?);
    let dialog_ids: Vec<DialogId> = dialogs.iter().map(|d| d.id).collect();
    let peers = peers::referenced(conn, &dialog_ids, &messages)?;
    Ok(DialogsPage {
        dialogs,
        messages,
        peers,
    })
}

/// Delete a dialog's history, and unless `messages_only` the dialog itself.
///
/// With `messages_only` the dialog row stays, with its counters and
/// pointers cleared. Deleting a secret dialog also forgets its session.
pub fn delete_dialog(worker: &Worker, dialog_id: DialogId, messages_only: bool) -> Result<()> {
    let files = in_transaction(worker.conn(), |tx| {
        let ids = messages::ids_for_dialog(tx, dialog_id)?;
        let files = if PeerKind::decode(dialog_id).is_secret() {
            let rows = messages::decode_all(messages::get_many(tx, &ids)?);
            secret_attachments(worker, &rows)
        } else {
            Vec::new()
        };

        messages::delete(tx, &ids)?;
        enc_tasks::delete(tx, &ids)?;
        media::delete_dialog(tx, dialog_id)?;
        media::clear_counts(tx, &[dialog_id])?;
        keyboards::delete_dialog(tx, dialog_id)?;
        holes::clear(tx, dialog_id)?;

        if messages_only {
            if let Some(mut dialog) = dialogs::find(tx, dialog_id)? {
                dialog.unread_count = 0;
                dialog.unread_important = 0;
                dialog.last_message_id = 0;
                dialog.last_important_id = 0;
                dialogs::upsert(tx, &dialog)?;
            }
        } else {
            dialogs::delete(tx, dialog_id)?;
            dialog_settings::delete(tx, dialog_id)?;
            if let PeerKind::Secret(session_id) = PeerKind::decode(dialog_id) {
                enc_chats::delete(tx, session_id)?;
            }
        }
        Ok(files)
    })?;

    if !files.is_empty() {
        worker.files.delete_files(files);
    }
    tracing::info!(dialog_id, messages_only, "Deleted dialog");
    worker.emit(
        EventType::DialogsNeedReload,
        json!({ "dialogs": [dialog_id], "deleted": !messages_only }),
    );
    Ok(())
}

pub fn set_dialog_flags(worker: &Worker, dialog_id: DialogId, flags: i64) -> Result<()> {
    dialog_settings::set(worker.conn(), dialog_id, flags)?;
    worker.emit(EventType::DialogsNeedReload, json!({ "dialogs": [dialog_id] }));
    Ok(())
}

pub fn get_channel_pts(conn: &Connection, dialog_id: DialogId) -> Result<i32> {
    dialogs::get_pts(conn, dialog_id)
}

/// Returns whether the dialog was known.
pub fn save_channel_pts(conn: &Connection, dialog_id: DialogId, pts: i32) -> Result<bool> {
    Ok(dialogs::set_pts(conn, dialog_id, pts)? > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::events::EventBus;
    use crate::files::NoopFileManager;
    use crate::ops::messages::{get_messages, put_messages, PageRequest};
    use crate::queries::messages::tests::message;
    use crate::queries::users::tests::user;
    use crate::worker::Location;
    use murmur_types::records::dialog_flags;
    use std::sync::Arc;

    fn worker() -> Worker {
        let (worker, _) = Worker::open(
            Location::Memory,
            &StoreConfig::default(),
            EventBus::new(64),
            Arc::new(NoopFileManager),
        )
        .expect("open worker");
        worker
    }

    fn fetched(id: DialogId, last: i64, date: i64) -> Dialog {
        Dialog {
            id,
            date,
            last_message_id: last,
            unread_count: 2,
            ..Dialog::default()
        }
    }

    #[test]
    fn test_put_dialogs_seeds_holes_and_flags() {
        let worker = worker();
        let mut dialog = fetched(5, 40, 400);
        dialog.flags = dialog_flags::MUTED;
        let batch = DialogsBatch {
            dialogs: vec![dialog],
            messages: vec![message(40, 5, 400)],
            users: vec![user(5, "Peer")],
            chats: vec![],
        };
        put_dialogs(&worker, &batch).expect("put dialogs");

        let holes = holes::list(worker.conn(), &HoleKey::messages(5)).expect("holes");
        assert_eq!(holes.iter().map(|h| (h.start, h.end)).collect::<Vec<_>>(), vec![(0, 40)]);
        assert!(dialogs::get(worker.conn(), 5).expect("dialog").is_muted());

        let page = get_dialogs(worker.conn(), 0, 10).expect("page");
        assert_eq!(page.dialogs.len(), 1);
        assert_eq!(page.messages.iter().map(|m| m.id).collect::<Vec<_>>(), vec![40]);
        assert_eq!(page.peers.users.len(), 1);

        // Only the seeded last message is visible; older history is a hole.
        let history = get_messages(worker.conn(), &PageRequest::backward(5, 20)).expect("history");
        assert_eq!(history.messages.len(), 1);
        assert!(!history.is_end);
    }

    #[test]
    fn test_put_dialogs_keeps_newer_pointer() {
        let worker = worker();
        put_messages(&worker, &[message(50, 5, 500)], 0).expect("put");
        put_dialogs(
            &worker,
            &DialogsBatch {
                dialogs: vec![fetched(5, 40, 400)],
                ..DialogsBatch::default()
            },
        )
        .expect("put dialogs");

        let dialog = dialogs::get(worker.conn(), 5).expect("dialog");
        assert_eq!((dialog.last_message_id, dialog.date), (50, 500));
    }

    #[test]
    fn test_delete_dialog_messages_only() {
        let worker = worker();
        put_messages(&worker, &[message(1, 5, 10), message(2, 5, 20)], 0).expect("put");
        holes::seed(worker.conn(), &HoleKey::messages(5), 2).expect("seed");

        delete_dialog(&worker, 5, true).expect("delete");
        let dialog = dialogs::get(worker.conn(), 5).expect("dialog kept");
        assert_eq!((dialog.last_message_id, dialog.unread_count, dialog.date), (0, 0, 20));
        assert!(messages::ids_for_dialog(worker.conn(), 5).expect("ids").is_empty());
        assert!(holes::list(worker.conn(), &HoleKey::messages(5)).expect("holes").is_empty());

        delete_dialog(&worker, 5, false).expect("delete");
        assert!(dialogs::find(worker.conn(), 5).expect("find").is_none());
    }

    #[test]
    fn test_channel_pts() {
        let worker = worker();
        assert_eq!(get_channel_pts(worker.conn(), -7).expect("pts"), 0);
        assert!(!save_channel_pts(worker.conn(), -7, 3).expect("unknown"));
        put_dialogs(
            &worker,
            &DialogsBatch {
                dialogs: vec![fetched(-7, 0, 0)],
                ..DialogsBatch::default()
            },
        )
        .expect("put");
        assert!(save_channel_pts(worker.conn(), -7, 3).expect("save"));
        assert_eq!(get_channel_pts(worker.conn(), -7).expect("pts"), 3);
    }
}
