//! Sync cursors persisted in the single-row `params` table.
//!
//! The cursors are owned by the worker through [`SessionState`]; nothing else
//! holds a copy. They reset only through an explicit teardown/reopen.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Last-sync cursors for the update stream and secret-chat handshake.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub seq: i32,
    pub pts: i32,
    pub date: i32,
    pub qts: i32,
    /// Last secret-chat protocol version.
    pub last_secret_version: i32,
    /// Diffie-Hellman generator for secret chats.
    pub secret_g: i32,
    /// Diffie-Hellman prime for secret chats.
    pub secret_p: Option<Vec<u8>>,
    #[serde(skip)]
    saved: Option<Cursors>,
}

/// The four update-stream cursors as last written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Cursors {
    seq: i32,
    pts: i32,
    date: i32,
    qts: i32,
}

impl SessionState {
    /// Load the cursors, recreating the row with defaults if it is missing
    /// or unreadable.
    pub fn load(conn: &Connection) -> Result<Self> {
        let row = conn
            .query_row(
                "SELECT seq, pts, date, qts, lsv, sg, pbytes FROM params WHERE id = 1",
                [],
                |row| {
                    Ok(SessionState {
                        seq: row.get(0)?,
                        pts: row.get(1)?,
                        date: row.get(2)?,
                        qts: row.get(3)?,
                        last_secret_version: row.get(4)?,
                        secret_g: row.get(5)?,
                        secret_p: row.get(6)?,
                        saved: None,
                    })
                },
            )
            .optional();

        let mut state = match row {
            Ok(Some(state)) => state,
            Ok(None) => {
                tracing::warn!("Session params row missing, recreating defaults");
                reset_row(conn)?;
                SessionState::default()
            }
            Err(e) => {
                tracing::warn!("Session params unreadable ({e}), recreating defaults");
                reset_row(conn)?;
                SessionState::default()
            }
        };
        state.saved = Some(state.cursors());
        Ok(state)
    }

    fn cursors(&self) -> Cursors {
        Cursors {
            seq: self.seq,
            pts: self.pts,
            date: self.date,
            qts: self.qts,
        }
    }

    /// Persist new update-stream cursors. Skips the write when unchanged.
    ///
    /// Returns whether anything was written.
    pub fn save_diff(
        &mut self,
        conn: &Connection,
        seq: i32,
        pts: i32,
        date: i32,
        qts: i32,
    ) -> Result<bool> {
        let next = Cursors { seq, pts, date, qts };
        if self.saved == Some(next) {
            return Ok(false);
        }
        conn.execute(
            "UPDATE params SET seq = ?1, pts = ?2, date = ?3, qts = ?4 WHERE id = 1",
            params![seq, pts, date, qts],
        )?;
        self.seq = seq;
        self.pts = pts;
        self.date = date;
        self.qts = qts;
        self.saved = Some(next);
        Ok(true)
    }

    /// Persist secret-chat handshake parameters.
    pub fn save_secret(
        &mut self,
        conn: &Connection,
        last_secret_version: i32,
        secret_g: i32,
        secret_p: Option<Vec<u8>>,
    ) -> Result<()> {
        conn.execute(
            "UPDATE params SET lsv = ?1, sg = ?2, pbytes = ?3 WHERE id = 1",
            params![last_secret_version, secret_g, secret_p],
        )?;
        self.last_secret_version = last_secret_version;
        self.secret_g = secret_g;
        self.secret_p = secret_p;
        Ok(())
    }

    /// Forget every cursor (in memory only).
    pub fn reset(&mut self) {
        *self = SessionState::default();
    }
}

/// Insert the params row if it does not exist yet.
pub fn ensure_row(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO params (id, seq, pts, date, qts, lsv, sg, pbytes)
         VALUES (1, 0, 0, 0, 0, 0, 0, NULL)",
        [],
    )?;
    Ok(())
}

fn reset_row(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM params", [])?;
    ensure_row(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::open_memory().expect("open test db")
    }

    #[test]
    fn test_load_defaults() {
        let conn = test_db();
        let state = SessionState::load(&conn).expect("load");
        assert_eq!(state.seq, 0);
        assert_eq!(state.secret_p, None);
    }

    #[test]
    fn test_save_diff_skips_unchanged() {
        let conn = test_db();
        let mut state = SessionState::load(&conn).expect("load");
        assert!(state.save_diff(&conn, 5, 10, 1000, 2).expect("save"));
        assert!(!state.save_diff(&conn, 5, 10, 1000, 2).expect("save again"));

        let reloaded = SessionState::load(&conn).expect("reload");
        assert_eq!((reloaded.seq, reloaded.pts, reloaded.date, reloaded.qts), (5, 10, 1000, 2));
    }

    #[test]
    fn test_save_secret() {
        let conn = test_db();
        let mut state = SessionState::load(&conn).expect("load");
        state
            .save_secret(&conn, 3, 7, Some(vec![0xAB; 4]))
            .expect("save secret");
        let reloaded = SessionState::load(&conn).expect("reload");
        assert_eq!(reloaded.last_secret_version, 3);
        assert_eq!(reloaded.secret_p, Some(vec![0xAB; 4]));
    }

    #[test]
    fn test_missing_row_is_recreated() {
        let conn = test_db();
        conn.execute("DELETE FROM params", []).expect("delete");
        let state = SessionState::load(&conn).expect("load");
        assert_eq!(state, SessionState::load(&conn).expect("reload"));
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM params", [], |row| row.get(0))
            .expect("count");
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_corrupt_row_is_recreated() {
        let conn = test_db();
        conn.execute("UPDATE params SET seq = 'not a number' WHERE id = 1", [])
            .expect("corrupt");
        let state = SessionState::load(&conn).expect("load recovers");
        assert_eq!(state.seq, 0);
    }

    #[test]
    fn test_reset_clears_memory() {
        let conn = test_db();
        let mut state = SessionState::load(&conn).expect("load");
        state.save_diff(&conn, 1, 2, 3, 4).expect("save");
        state.reset();
        assert_eq!(state.pts, 0);
        assert!(state.save_diff(&conn, 1, 2, 3, 4).expect("save after reset"));
    }
}
