//! Users, chats, contacts and the block list.

use std::collections::BTreeSet;

use rusqlite::Connection;
use serde_json::json;

use murmur_types::events::EventType;
use murmur_types::ids::PeerKind;
use murmur_types::records::{Chat, Contact, EncryptedChat, Message, User};
use murmur_types::DialogId;

use crate::queries::{blocked, chats, contacts, enc_chats, users};
use crate::worker::Worker;
use crate::{in_transaction, Result};

/// Peers referenced by a page of dialogs or messages.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Peers {
    pub users: Vec<User>,
    pub chats: Vec<Chat>,
    pub encrypted: Vec<EncryptedChat>,
}

/// Load every user, chat and secret session that `dialog_ids` point at or
/// that authored one of `messages`.
pub fn referenced(conn: &Connection, dialog_ids: &[DialogId], messages: &[Message]) -> Result<Peers> {
    let mut user_ids = BTreeSet::new();
    let mut chat_ids = BTreeSet::new();
    let mut secret_ids = BTreeSet::new();

    let all_dialogs = dialog_ids.iter().copied().chain(messages.iter().map(|m| m.dialog_id));
    for dialog_id in all_dialogs {
        match PeerKind::decode(dialog_id) {
            PeerKind::User(id) => {
                user_ids.insert(i64::from(id));
            }
            PeerKind::Chat(id) => {
                chat_ids.insert(i64::from(id));
            }
            PeerKind::Secret(id) => {
                secret_ids.insert(i64::from(id));
            }
            PeerKind::Broadcast(_) => {}
        }
    }
    for message in messages {
        if message.from_id > 0 {
            user_ids.insert(i64::from(message.from_id));
        }
    }

    let encrypted = enc_chats::get_many(conn, &secret_ids.into_iter().collect::<Vec<_>>())?;
    for chat in &encrypted {
        user_ids.insert(i64::from(chat.user_id));
    }

    Ok(Peers {
        users: users::get_many(conn, &user_ids.into_iter().collect::<Vec<_>>())?,
        chats: chats::get_many(conn, &chat_ids.into_iter().collect::<Vec<_>>())?,
        encrypted,
    })
}

pub fn put_users(conn: &Connection, batch: &[User]) -> Result<()> {
    in_transaction(conn, |tx| {
        for user in batch {
            users::put(tx, user)?;
        }
        Ok(())
    })
}

/// Apply presence updates. Returns how many users were known.
pub fn update_statuses(conn: &Connection, statuses: &[(i32, i32)]) -> Result<usize> {
    in_transaction(conn, |tx| {
        let mut updated = 0;
        for (user_id, status) in statuses {
            if users::set_status(tx, *user_id, *status)? {
                updated += 1;
            }
        }
        Ok(updated)
    })
}

pub fn put_chats(worker: &Worker, batch: &[Chat]) -> Result<()> {
    in_transaction(worker.conn(), |tx| {
        for chat in batch {
            chats::put(tx, chat)?;
        }
        Ok(())
    })?;
    let ids: Vec<i32> = batch.iter().map(|c| c.id).collect();
    worker.emit(EventType::ChatInfoChanged, json!({ "chats": ids }));
    Ok(())
}

pub fn put_contacts(conn: &Connection, batch: &[Contact], replace_all: bool) -> Result<()> {
    in_transaction(conn, |tx| contacts::put(tx, batch, replace_all))
}

pub fn put_blocked(conn: &Connection, user_ids: &[i32], replace_all: bool) -> Result<()> {
    in_transaction(conn, |tx| blocked::put(tx, user_ids, replace_all))
}

/// Load the block list and announce it.
pub fn load_blocked(worker: &Worker) -> Result<Vec<i32>> {
    let ids = blocked::list(worker.conn())?;
    worker.emit(EventType::BlockedUsersLoaded, json!({ "users": ids }));
    Ok(ids)
}
