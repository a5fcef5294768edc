//! Notifications emitted by the cache after significant mutations.
//!
//! Consumers (notification center, download scheduler, UI) subscribe on their
//! own context. Delivery is at-least-once and fire-and-forget.

use serde::{Deserialize, Serialize};

/// Envelope for all storage events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub timestamp: u64,
    pub payload: serde_json::Value,
}

/// All event types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // Message events
    NewUnreadMessages,
    MessagesDeleted,
    MessageIdChanged,
    MessagesRead,
    EncryptedMessagesRead,
    MediaCountChanged,
    BotKeyboardChanged,

    // Dialog and peer events
    DialogsNeedReload,
    ChatInfoChanged,
    BlockedUsersLoaded,

    // Background work
    DownloadQueueChanged,

    // Store lifecycle
    SchemaMigrated,
    StorageReset,
}

impl EventType {
    /// Stable name used in logs.
    pub fn name(self) -> &'static str {
        match self {
            EventType::NewUnreadMessages => "new_unread_messages",
            EventType::MessagesDeleted => "messages_deleted",
            EventType::MessageIdChanged => "message_id_changed",
            EventType::MessagesRead => "messages_read",
            EventType::EncryptedMessagesRead => "encrypted_messages_read",
            EventType::MediaCountChanged => "media_count_changed",
            EventType::BotKeyboardChanged => "bot_keyboard_changed",
            EventType::DialogsNeedReload => "dialogs_need_reload",
            EventType::ChatInfoChanged => "chat_info_changed",
            EventType::BlockedUsersLoaded => "blocked_users_loaded",
            EventType::DownloadQueueChanged => "download_queue_changed",
            EventType::SchemaMigrated => "schema_migrated",
            EventType::StorageReset => "storage_reset",
        }
    }
}
