//! Secret sessions and their self-destruct timers.

use rusqlite::Connection;

use murmur_types::ids::secret_dialog;
use murmur_types::records::EncryptedChat;
use murmur_types::{MessageId, Timestamp};

use crate::queries::{enc_chats, enc_tasks, messages};
use crate::{in_transaction, now_secs, Result};

/// Start the self-destruct timer of every message of `session_id` dated at
/// or before `max_date` that still carries a ttl.
///
/// Each message is due at `min(read_time, now) + ttl`; its ttl is cleared so
/// it is never scheduled twice. Returns the number of tasks created.
pub fn create_tasks(
    conn: &Connection,
    session_id: i32,
    max_date: Timestamp,
    read_time: Timestamp,
) -> Result<usize> {
    let start = read_time.min(now_secs());
    in_transaction(conn, |tx| {
        let pending = messages::with_ttl(tx, secret_dialog(session_id), max_date)?;
        for (mid, ttl) in &pending {
            enc_tasks::schedule(tx, *mid, start + i64::from(*ttl))?;
        }
        let ids: Vec<MessageId> = pending.iter().map(|(mid, _)| *mid).collect();
        messages::clear_ttl(tx, &ids)?;
        Ok(ids.len())
    })
}

/// Forget the previously handed out batch and return the next one: the
/// earliest due date and every message scheduled for it.
pub fn take_due(
    conn: &Connection,
    previous: &[MessageId],
) -> Result<Option<(Timestamp, Vec<MessageId>)>> {
    in_transaction(conn, |tx| {
        if !previous.is_empty() {
            enc_tasks::delete(tx, previous)?;
        }
        enc_tasks::next_batch(tx)
    })
}

pub fn put_encrypted_chat(conn: &Connection, chat: &EncryptedChat) -> Result<()> {
    enc_chats::put(conn, chat)
}

/// Which mutable parts of a secret session to persist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatUpdate {
    Ttl,
    Layer,
    Key,
}

/// Persist one part of a session. Returns whether the session was known.
pub fn update_encrypted_chat(
    conn: &Connection,
    chat: &EncryptedChat,
    update: ChatUpdate,
) -> Result<bool> {
    let updated = match update {
        ChatUpdate::Ttl => enc_chats::set_ttl(conn, chat.id, chat.ttl)?,
        ChatUpdate::Layer => {
            enc_chats::set_layer(conn, chat.id, chat.layer, chat.seq_in, chat.seq_out)?
        }
        ChatUpdate::Key => enc_chats::set_key(conn, chat)?,
    };
    Ok(updated > 0)
}
