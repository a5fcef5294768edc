//! End-to-end encrypted sessions.
//!
//! Key material lives in dedicated columns so it can be rotated without
//! rewriting the envelope; the envelope in `data` is written with the key
//! fields cleared.

use rusqlite::{params, Connection, OptionalExtension};

use murmur_types::codec;
use murmur_types::records::EncryptedChat;

use crate::sql::query_chunked;
use crate::Result;

/// Visual key fingerprint: the first 16 bytes of `blake3(auth_key)`.
pub fn key_hash(auth_key: &[u8]) -> Vec<u8> {
    blake3::hash(auth_key).as_bytes()[..16].to_vec()
}

fn stripped(chat: &EncryptedChat) -> EncryptedChat {
    EncryptedChat {
        g_a_or_b: None,
        auth_key: None,
        future_auth_key: None,
        key_hash: None,
        ..chat.clone()
    }
}

const SELECT: &str = "SELECT uid, data, g, authkey, ttl, layer, seq_in, seq_out, use_count,
        exchange_id, key_date, fprint, fauthkey, khash, user, name
     FROM enc_chats";

struct Row {
    uid: i64,
    data: Vec<u8>,
    g: Option<Vec<u8>>,
    authkey: Option<Vec<u8>>,
    ttl: i32,
    layer: i32,
    seq_in: i32,
    seq_out: i32,
    use_count: i32,
    exchange_id: i64,
    key_date: i64,
    fprint: i64,
    fauthkey: Option<Vec<u8>>,
    khash: Option<Vec<u8>>,
    user: i32,
    name: String,
}

fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    Ok(Row {
        uid: row.get(0)?,
        data: row.get(1)?,
        g: row.get(2)?,
        authkey: row.get(3)?,
        ttl: row.get(4)?,
        layer: row.get(5)?,
        seq_in: row.get(6)?,
        seq_out: row.get(7)?,
        use_count: row.get(8)?,
        exchange_id: row.get(9)?,
        key_date: row.get(10)?,
        fprint: row.get(11)?,
        fauthkey: row.get(12)?,
        khash: row.get(13)?,
        user: row.get(14)?,
        name: row.get(15)?,
    })
}

impl Row {
    fn into_chat(self) -> Result<EncryptedChat> {
        let mut chat: EncryptedChat = codec::decode(&self.data)?;
        chat.user_id = self.user;
        chat.title = self.name;
        chat.g_a_or_b = self.g;
        chat.auth_key = self.authkey;
        chat.ttl = self.ttl;
        chat.layer = self.layer;
        chat.seq_in = self.seq_in;
        chat.seq_out = self.seq_out;
        chat.key_use_count = self.use_count;
        chat.exchange_id = self.exchange_id;
        chat.key_create_date = self.key_date;
        chat.future_key_fingerprint = self.fprint;
        chat.future_auth_key = self.fauthkey;
        chat.key_hash = self.khash;
        Ok(chat)
    }
}

/// Insert or replace a session, deriving `key_hash` from the auth key.
pub fn put(conn: &Connection, chat: &EncryptedChat) -> Result<()> {
    let khash = chat.auth_key.as_deref().map(key_hash);
    conn.execute(
        "INSERT OR REPLACE INTO enc_chats
            (uid, user, name, data, g, authkey, ttl, layer, seq_in, seq_out,
             use_count, exchange_id, key_date, fprint, fauthkey, khash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            chat.id,
            chat.user_id,
            chat.title,
            codec::encode(&stripped(chat))?,
            chat.g_a_or_b,
            chat.auth_key,
            chat.ttl,
            chat.layer,
            chat.seq_in,
            chat.seq_out,
            chat.key_use_count,
            chat.exchange_id,
            chat.key_create_date,
            chat.future_key_fingerprint,
            chat.future_auth_key,
            khash,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: i32) -> Result<Option<EncryptedChat>> {
    let row = conn
        .query_row(&format!("{SELECT} WHERE uid = ?1"), [id], from_row)
        .optional()?;
    row.map(Row::into_chat).transpose()
}

pub fn get_many(conn: &Connection, ids: &[i64]) -> Result<Vec<EncryptedChat>> {
    let rows = query_chunked(
        conn,
        &format!("{SELECT} WHERE uid IN ({{ids}})"),
        &[],
        ids,
        from_row,
    )?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let uid = row.uid;
            match row.into_chat() {
                Ok(chat) => Some(chat),
                Err(e) => {
                    tracing::warn!(uid, "Skipping undecodable encrypted chat row: {e}");
                    None
                }
            }
        })
        .collect())
}

pub fn set_ttl(conn: &Connection, id: i32, ttl: i32) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE enc_chats SET ttl = ?2 WHERE uid = ?1",
        params![id, ttl],
    )?)
}

/// Update the negotiated layer and both sequence counters.
pub fn set_layer(
    conn: &Connection,
    id: i32,
    layer: i32,
    seq_in: i32,
    seq_out: i32,
) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE enc_chats SET layer = ?2, seq_in = ?3, seq_out = ?4 WHERE uid = ?1",
        params![id, layer, seq_in, seq_out],
    )?)
}

/// Replace the key material after a re-key exchange.
pub fn set_key(conn: &Connection, chat: &EncryptedChat) -> Result<usize> {
    let khash = chat.auth_key.as_deref().map(key_hash);
    Ok(conn.execute(
        "UPDATE enc_chats
         SET authkey = ?2, khash = ?3, use_count = ?4, exchange_id = ?5, key_date = ?6,
             fprint = ?7, fauthkey = ?8, g = ?9
         WHERE uid = ?1",
        params![
            chat.id,
            chat.auth_key,
            khash,
            chat.key_use_count,
            chat.exchange_id,
            chat.key_create_date,
            chat.future_key_fingerprint,
            chat.future_auth_key,
            chat.g_a_or_b,
        ],
    )?)
}

pub fn delete(conn: &Connection, id: i32) -> Result<usize> {
    Ok(conn.execute("DELETE FROM enc_chats WHERE uid = ?1", [id])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: i32) -> EncryptedChat {
        EncryptedChat {
            id,
            user_id: 42,
            title: "Secret".into(),
            payload: vec![9],
            auth_key: Some(vec![7u8; 256]),
            layer: 17,
            ..EncryptedChat::default()
        }
    }

    #[test]
    fn test_key_hash_prefix() {
        let hash = key_hash(b"material");
        assert_eq!(hash.len(), 16);
        assert_eq!(hash, blake3::hash(b"material").as_bytes()[..16].to_vec());
    }

    #[test]
    fn test_put_get_with_key_material() {
        let conn = crate::open_memory().expect("open test db");
        put(&conn, &session(3)).expect("put");

        let loaded = get(&conn, 3).expect("get").expect("present");
        assert_eq!(loaded.auth_key, Some(vec![7u8; 256]));
        assert_eq!(loaded.key_hash, Some(key_hash(&[7u8; 256])));
        assert_eq!(loaded.layer, 17);

        let data: Vec<u8> = conn
            .query_row("SELECT data FROM enc_chats WHERE uid = 3", [], |row| row.get(0))
            .expect("data");
        let envelope: EncryptedChat = codec::decode(&data).expect("decode");
        assert!(envelope.auth_key.is_none());
    }

    #[test]
    fn test_updates() {
        let conn = crate::open_memory().expect("open test db");
        put(&conn, &session(3)).expect("put");
        set_ttl(&conn, 3, 30).expect("ttl");
        set_layer(&conn, 3, 46, 4, 5).expect("layer");

        let mut rekeyed = session(3);
        rekeyed.auth_key = Some(vec![1u8; 256]);
        rekeyed.exchange_id = 88;
        set_key(&conn, &rekeyed).expect("key");

        let loaded = get(&conn, 3).expect("get").expect("present");
        assert_eq!((loaded.ttl, loaded.layer, loaded.seq_in, loaded.seq_out), (30, 46, 4, 5));
        assert_eq!(loaded.exchange_id, 88);
        assert_eq!(loaded.key_hash, Some(key_hash(&[1u8; 256])));

        assert_eq!(get_many(&conn, &[3, 4]).expect("many").len(), 1);
        delete(&conn, 3).expect("delete");
        assert!(get(&conn, 3).expect("get").is_none());
    }
}
