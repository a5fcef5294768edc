//! SQL schema definitions.
//!
//! [`SCHEMA_V1`] is the first layout; later versions are reached through
//! the `MIGRATION_V*` steps. [`SCHEMA_CURRENT`] creates the latest layout in
//! one shot and must stay column-for-column identical to V1 plus every step
//! (column order included, since `ALTER TABLE ADD COLUMN` appends).

/// Base schema, version 1.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Messages
-- ============================================================

CREATE TABLE IF NOT EXISTS messages (
    mid INTEGER PRIMARY KEY,
    uid INTEGER NOT NULL,
    read_state INTEGER NOT NULL DEFAULT 0,
    send_state INTEGER NOT NULL DEFAULT 0,
    date INTEGER NOT NULL,
    data BLOB NOT NULL,
    out INTEGER NOT NULL DEFAULT 0,
    ttl INTEGER NOT NULL DEFAULT 0,
    media INTEGER NOT NULL DEFAULT -1
);

CREATE INDEX IF NOT EXISTS idx_messages_uid_mid_read_out ON messages(uid, mid, read_state, out);
CREATE INDEX IF NOT EXISTS idx_messages_uid_date_mid ON messages(uid, date, mid);
CREATE INDEX IF NOT EXISTS idx_messages_send_state ON messages(mid, send_state, date);

CREATE TABLE IF NOT EXISTS randoms (
    random_id INTEGER NOT NULL,
    mid INTEGER NOT NULL,
    PRIMARY KEY (random_id, mid)
);

CREATE INDEX IF NOT EXISTS idx_randoms_mid ON randoms(mid);

CREATE TABLE IF NOT EXISTS messages_seq (
    mid INTEGER PRIMARY KEY,
    seq_in INTEGER NOT NULL,
    seq_out INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS media_index (
    mid INTEGER PRIMARY KEY,
    uid INTEGER NOT NULL,
    date INTEGER NOT NULL,
    type INTEGER NOT NULL,
    data BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_media_index_uid_mid_type_date ON media_index(uid, mid, type, date);

-- ============================================================
-- Dialogs
-- ============================================================

CREATE TABLE IF NOT EXISTS dialogs (
    did INTEGER PRIMARY KEY,
    date INTEGER NOT NULL,
    unread_count INTEGER NOT NULL DEFAULT 0,
    last_mid INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_dialogs_date ON dialogs(date);

-- ============================================================
-- Peers
-- ============================================================

CREATE TABLE IF NOT EXISTS users (
    uid INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    status INTEGER NOT NULL DEFAULT 0,
    data BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS chats (
    uid INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    data BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS enc_chats (
    uid INTEGER PRIMARY KEY,
    user INTEGER NOT NULL,
    name TEXT NOT NULL,
    data BLOB NOT NULL,
    g BLOB,
    authkey BLOB,
    ttl INTEGER NOT NULL DEFAULT 0,
    layer INTEGER NOT NULL DEFAULT 0,
    seq_in INTEGER NOT NULL DEFAULT 0,
    seq_out INTEGER NOT NULL DEFAULT 0,
    use_count INTEGER NOT NULL DEFAULT 0,
    exchange_id INTEGER NOT NULL DEFAULT 0,
    key_date INTEGER NOT NULL DEFAULT 0,
    fprint INTEGER NOT NULL DEFAULT 0,
    fauthkey BLOB,
    khash BLOB
);

CREATE TABLE IF NOT EXISTS contacts (
    uid INTEGER PRIMARY KEY,
    mutual INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS blocked_users (
    uid INTEGER PRIMARY KEY
);

-- ============================================================
-- Files
-- ============================================================

CREATE TABLE IF NOT EXISTS download_queue (
    uid INTEGER NOT NULL,
    type INTEGER NOT NULL,
    date INTEGER NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (uid, type)
);

CREATE INDEX IF NOT EXISTS idx_download_queue_type_date ON download_queue(type, date);

CREATE TABLE IF NOT EXISTS sent_files (
    uid TEXT NOT NULL,
    type INTEGER NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (uid, type)
);

-- ============================================================
-- Session state and legacy preferences
-- ============================================================

CREATE TABLE IF NOT EXISTS params (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    seq INTEGER NOT NULL DEFAULT 0,
    pts INTEGER NOT NULL DEFAULT 0,
    date INTEGER NOT NULL DEFAULT 0,
    qts INTEGER NOT NULL DEFAULT 0,
    lsv INTEGER NOT NULL DEFAULT 0,
    sg INTEGER NOT NULL DEFAULT 0,
    pbytes BLOB
);

CREATE TABLE IF NOT EXISTS legacy_prefs (
    key TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
"#;

/// v2: per-dialog notification flags.
pub const MIGRATION_V2: &str = r#"
CREATE TABLE IF NOT EXISTS dialog_settings (
    did INTEGER PRIMARY KEY,
    flags INTEGER NOT NULL DEFAULT 0
);
"#;

/// v3: self-destruct tasks for encrypted sessions.
pub const MIGRATION_V3: &str = r#"
CREATE TABLE IF NOT EXISTS enc_tasks (
    mid INTEGER PRIMARY KEY,
    date INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_enc_tasks_date ON enc_tasks(date);
"#;

/// v4: cached reply previews.
pub const MIGRATION_V4: &str = r#"
ALTER TABLE messages ADD COLUMN replydata BLOB;
"#;

/// v5: read-receipt maxima per dialog.
pub const MIGRATION_V5: &str = r#"
ALTER TABLE dialogs ADD COLUMN inbox_max INTEGER NOT NULL DEFAULT 0;
ALTER TABLE dialogs ADD COLUMN outbox_max INTEGER NOT NULL DEFAULT 0;
"#;

/// v6: bot reply keyboards.
pub const MIGRATION_V6: &str = r#"
CREATE TABLE IF NOT EXISTS bot_keyboard (
    uid INTEGER PRIMARY KEY,
    mid INTEGER NOT NULL,
    info BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_bot_keyboard_mid ON bot_keyboard(mid);
"#;

/// v7: channel streams and the message hole ledgers.
pub const MIGRATION_V7: &str = r#"
ALTER TABLE messages ADD COLUMN imp INTEGER NOT NULL DEFAULT 0;
ALTER TABLE dialogs ADD COLUMN last_mid_i INTEGER NOT NULL DEFAULT 0;
ALTER TABLE dialogs ADD COLUMN unread_count_i INTEGER NOT NULL DEFAULT 0;
ALTER TABLE dialogs ADD COLUMN pts INTEGER NOT NULL DEFAULT 0;
ALTER TABLE dialogs ADD COLUMN date_i INTEGER NOT NULL DEFAULT 0;

CREATE INDEX IF NOT EXISTS idx_messages_uid_mid_imp ON messages(uid, mid, imp);

CREATE TABLE IF NOT EXISTS messages_holes (
    uid INTEGER NOT NULL,
    start_id INTEGER NOT NULL,
    end_id INTEGER NOT NULL,
    PRIMARY KEY (uid, start_id)
);

CREATE INDEX IF NOT EXISTS idx_messages_holes_uid_end ON messages_holes(uid, end_id);

CREATE TABLE IF NOT EXISTS messages_imp_holes (
    uid INTEGER NOT NULL,
    start_id INTEGER NOT NULL,
    end_id INTEGER NOT NULL,
    PRIMARY KEY (uid, start_id)
);

CREATE INDEX IF NOT EXISTS idx_messages_imp_holes_uid_end ON messages_imp_holes(uid, end_id);
"#;

/// v8: per-media-kind hole ledger and cached media counts.
pub const MIGRATION_V8: &str = r#"
CREATE TABLE IF NOT EXISTS media_holes (
    uid INTEGER NOT NULL,
    type INTEGER NOT NULL,
    start_id INTEGER NOT NULL,
    end_id INTEGER NOT NULL,
    PRIMARY KEY (uid, type, start_id)
);

CREATE INDEX IF NOT EXISTS idx_media_holes_uid_type_end ON media_holes(uid, type, end_id);

CREATE TABLE IF NOT EXISTS media_counts (
    uid INTEGER NOT NULL,
    type INTEGER NOT NULL,
    count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (uid, type)
);
"#;

/// Complete current schema, applied to fresh databases.
pub const SCHEMA_CURRENT: &str = r#"
-- ============================================================
-- Messages
-- ============================================================

CREATE TABLE IF NOT EXISTS messages (
    mid INTEGER PRIMARY KEY,
    uid INTEGER NOT NULL,
    read_state INTEGER NOT NULL DEFAULT 0,
    send_state INTEGER NOT NULL DEFAULT 0,
    date INTEGER NOT NULL,
    data BLOB NOT NULL,
    out INTEGER NOT NULL DEFAULT 0,
    ttl INTEGER NOT NULL DEFAULT 0,
    media INTEGER NOT NULL DEFAULT -1,
    replydata BLOB,
    imp INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_messages_uid_mid_read_out ON messages(uid, mid, read_state, out);
CREATE INDEX IF NOT EXISTS idx_messages_uid_date_mid ON messages(uid, date, mid);
CREATE INDEX IF NOT EXISTS idx_messages_send_state ON messages(mid, send_state, date);
CREATE INDEX IF NOT EXISTS idx_messages_uid_mid_imp ON messages(uid, mid, imp);

CREATE TABLE IF NOT EXISTS randoms (
    random_id INTEGER NOT NULL,
    mid INTEGER NOT NULL,
    PRIMARY KEY (random_id, mid)
);

CREATE INDEX IF NOT EXISTS idx_randoms_mid ON randoms(mid);

CREATE TABLE IF NOT EXISTS messages_seq (
    mid INTEGER PRIMARY KEY,
    seq_in INTEGER NOT NULL,
    seq_out INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS media_index (
    mid INTEGER PRIMARY KEY,
    uid INTEGER NOT NULL,
    date INTEGER NOT NULL,
    type INTEGER NOT NULL,
    data BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_media_index_uid_mid_type_date ON media_index(uid, mid, type, date);

CREATE TABLE IF NOT EXISTS media_counts (
    uid INTEGER NOT NULL,
    type INTEGER NOT NULL,
    count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (uid, type)
);

CREATE TABLE IF NOT EXISTS bot_keyboard (
    uid INTEGER PRIMARY KEY,
    mid INTEGER NOT NULL,
    info BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_bot_keyboard_mid ON bot_keyboard(mid);

CREATE TABLE IF NOT EXISTS enc_tasks (
    mid INTEGER PRIMARY KEY,
    date INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_enc_tasks_date ON enc_tasks(date);

-- ============================================================
-- Hole ledgers
-- ============================================================

CREATE TABLE IF NOT EXISTS messages_holes (
    uid INTEGER NOT NULL,
    start_id INTEGER NOT NULL,
    end_id INTEGER NOT NULL,
    PRIMARY KEY (uid, start_id)
);

CREATE INDEX IF NOT EXISTS idx_messages_holes_uid_end ON messages_holes(uid, end_id);

CREATE TABLE IF NOT EXISTS messages_imp_holes (
    uid INTEGER NOT NULL,
    start_id INTEGER NOT NULL,
    end_id INTEGER NOT NULL,
    PRIMARY KEY (uid, start_id)
);

CREATE INDEX IF NOT EXISTS idx_messages_imp_holes_uid_end ON messages_imp_holes(uid, end_id);

CREATE TABLE IF NOT EXISTS media_holes (
    uid INTEGER NOT NULL,
    type INTEGER NOT NULL,
    start_id INTEGER NOT NULL,
    end_id INTEGER NOT NULL,
    PRIMARY KEY (uid, type, start_id)
);

CREATE INDEX IF NOT EXISTS idx_media_holes_uid_type_end ON media_holes(uid, type, end_id);

-- ============================================================
-- Dialogs
-- ============================================================

CREATE TABLE IF NOT EXISTS dialogs (
    did INTEGER PRIMARY KEY,
    date INTEGER NOT NULL,
    unread_count INTEGER NOT NULL DEFAULT 0,
    last_mid INTEGER NOT NULL DEFAULT 0,
    inbox_max INTEGER NOT NULL DEFAULT 0,
    outbox_max INTEGER NOT NULL DEFAULT 0,
    last_mid_i INTEGER NOT NULL DEFAULT 0,
    unread_count_i INTEGER NOT NULL DEFAULT 0,
    pts INTEGER NOT NULL DEFAULT 0,
    date_i INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_dialogs_date ON dialogs(date);

CREATE TABLE IF NOT EXISTS dialog_settings (
    did INTEGER PRIMARY KEY,
    flags INTEGER NOT NULL DEFAULT 0
);

-- ============================================================
-- Peers
-- ============================================================

CREATE TABLE IF NOT EXISTS users (
    uid INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    status INTEGER NOT NULL DEFAULT 0,
    data BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS chats (
    uid INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    data BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS enc_chats (
    uid INTEGER PRIMARY KEY,
    user INTEGER NOT NULL,
    name TEXT NOT NULL,
    data BLOB NOT NULL,
    g BLOB,
    authkey BLOB,
    ttl INTEGER NOT NULL DEFAULT 0,
    layer INTEGER NOT NULL DEFAULT 0,
    seq_in INTEGER NOT NULL DEFAULT 0,
    seq_out INTEGER NOT NULL DEFAULT 0,
    use_count INTEGER NOT NULL DEFAULT 0,
    exchange_id INTEGER NOT NULL DEFAULT 0,
    key_date INTEGER NOT NULL DEFAULT 0,
    fprint INTEGER NOT NULL DEFAULT 0,
    fauthkey BLOB,
    khash BLOB
);

CREATE TABLE IF NOT EXISTS contacts (
    uid INTEGER PRIMARY KEY,
    mutual INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS blocked_users (
    uid INTEGER PRIMARY KEY
);

-- ============================================================
-- Files
-- ============================================================

CREATE TABLE IF NOT EXISTS download_queue (
    uid INTEGER NOT NULL,
    type INTEGER NOT NULL,
    date INTEGER NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (uid, type)
);

CREATE INDEX IF NOT EXISTS idx_download_queue_type_date ON download_queue(type, date);

CREATE TABLE IF NOT EXISTS sent_files (
    uid TEXT NOT NULL,
    type INTEGER NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (uid, type)
);

-- ============================================================
-- Session state and legacy preferences
-- ============================================================

CREATE TABLE IF NOT EXISTS params (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    seq INTEGER NOT NULL DEFAULT 0,
    pts INTEGER NOT NULL DEFAULT 0,
    date INTEGER NOT NULL DEFAULT 0,
    qts INTEGER NOT NULL DEFAULT 0,
    lsv INTEGER NOT NULL DEFAULT 0,
    sg INTEGER NOT NULL DEFAULT 0,
    pbytes BLOB
);

CREATE TABLE IF NOT EXISTS legacy_prefs (
    key TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
"#;

/// Every table the cache owns, in dependency-free order.
pub const TABLES: &[&str] = &[
    "messages",
    "randoms",
    "messages_seq",
    "media_index",
    "media_counts",
    "bot_keyboard",
    "enc_tasks",
    "messages_holes",
    "messages_imp_holes",
    "media_holes",
    "dialogs",
    "dialog_settings",
    "users",
    "chats",
    "enc_chats",
    "contacts",
    "blocked_users",
    "download_queue",
    "sent_files",
    "params",
    "legacy_prefs",
];
