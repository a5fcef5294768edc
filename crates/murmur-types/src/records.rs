//! Cached record types.
//!
//! Each record pairs the columns the cache indexes on with an opaque
//! `payload` supplied by the network layer. The cache never looks inside
//! payloads.

use serde::{Deserialize, Serialize};

use crate::codec::{Tagged, TypeTag};
use crate::{Bytes, ChannelId, DialogId, MessageId, Timestamp};

/// Delivery state of a message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendState {
    /// Acknowledged by the server.
    #[default]
    Confirmed,
    /// Handed to the transport, no acknowledgement yet.
    Sending,
    /// Transport gave up.
    Failed,
    /// Server assigned an id but the local copy has not been reconciled.
    ConfirmedLocallyUnconfirmed,
    /// Waiting for a previous send to finish.
    Queued,
}

impl SendState {
    pub fn as_i32(self) -> i32 {
        match self {
            SendState::Confirmed => 0,
            SendState::Sending => 1,
            SendState::Failed => 2,
            SendState::ConfirmedLocallyUnconfirmed => 3,
            SendState::Queued => 4,
        }
    }

    /// Unknown values decode as `Confirmed`.
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => SendState::Sending,
            2 => SendState::Failed,
            3 => SendState::ConfirmedLocallyUnconfirmed,
            4 => SendState::Queued,
            _ => SendState::Confirmed,
        }
    }
}

/// Read-state bit flags stored in `messages.read_state`.
pub mod read_flags {
    /// The message has been seen in the inbox/outbox.
    pub const READ: i32 = 1;
    /// The media content (voice note, video message) was opened.
    pub const CONTENT_READ: i32 = 2;
}

/// Typed media categories with their own pagination index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    PhotoVideo,
    File,
    Audio,
    Url,
    Music,
}

impl MediaKind {
    pub const ALL: [MediaKind; 5] = [
        MediaKind::PhotoVideo,
        MediaKind::File,
        MediaKind::Audio,
        MediaKind::Url,
        MediaKind::Music,
    ];

    pub fn as_i32(self) -> i32 {
        match self {
            MediaKind::PhotoVideo => 0,
            MediaKind::File => 1,
            MediaKind::Audio => 2,
            MediaKind::Url => 3,
            MediaKind::Music => 4,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(MediaKind::PhotoVideo),
            1 => Some(MediaKind::File),
            2 => Some(MediaKind::Audio),
            3 => Some(MediaKind::Url),
            4 => Some(MediaKind::Music),
            _ => None,
        }
    }

    /// Bit in an auto-download mask. Links are never downloaded.
    pub fn download_bit(self) -> u32 {
        match self {
            MediaKind::Url => 0,
            other => 1 << other.as_i32(),
        }
    }
}

/// Reference to a remote file attached to a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaReference {
    pub kind: MediaKind,
    /// Remote file id.
    pub file_id: i64,
    /// Datacenter / storage shard hint.
    pub location: i32,
    /// Original file name, when the sender supplied one.
    pub file_name: Option<String>,
    pub size: i64,
}

/// A message as cached locally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Composite id (see [`crate::ids`]). Negative for pending messages.
    pub id: MessageId,
    pub dialog_id: DialogId,
    /// Client-generated id used to match a send acknowledgement.
    pub random_id: Option<i64>,
    /// Author user id.
    pub from_id: i32,
    pub date: Timestamp,
    pub out: bool,
    /// Combination of [`read_flags`].
    pub read_state: i32,
    pub send_state: SendState,
    /// Self-destruct timer in seconds, zero when none.
    pub ttl: i32,
    /// Part of the "important" stream of a channel.
    pub important: bool,
    pub media: Option<MediaReference>,
    /// Reply keyboard attached by a bot.
    pub keyboard: Option<Bytes>,
    /// Id of the message this one replies to.
    pub reply_to: Option<MessageId>,
    /// Cached preview of the replied-to message.
    pub reply_preview: Option<Bytes>,
    /// Opaque network payload.
    pub payload: Bytes,
}

impl Message {
    pub fn is_unread(&self) -> bool {
        self.read_state & read_flags::READ == 0
    }

    pub fn channel_id(&self) -> ChannelId {
        crate::ids::channel_of(self.id)
    }
}

impl Tagged for Message {
    const TAG: TypeTag = TypeTag::Message;
}

/// Conversation summary.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialog {
    pub id: DialogId,
    pub date: Timestamp,
    pub unread_count: i32,
    pub last_message_id: MessageId,
    pub inbox_max: i32,
    pub outbox_max: i32,
    /// Last message of the important stream (channels only).
    pub last_important_id: MessageId,
    pub unread_important: i32,
    /// Channel delta-sequence cursor.
    pub pts: i32,
    pub date_important: Timestamp,
    /// Notification flags from `dialog_settings`.
    pub flags: i64,
}

impl Dialog {
    pub fn is_muted(&self) -> bool {
        self.flags & dialog_flags::MUTED != 0
    }
}

/// Bits stored in `dialog_settings.flags`.
pub mod dialog_flags {
    pub const MUTED: i64 = 1;
}

/// Special values of [`User::status`] for users hiding their exact presence.
pub mod user_status {
    pub const RECENTLY: i32 = -100;
    pub const LAST_WEEK: i32 = -101;
    pub const LAST_MONTH: i32 = -102;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i32,
    pub first_name: String,
    pub last_name: String,
    pub username: Option<String>,
    /// Last-seen unix time, or one of [`user_status`].
    pub status: i32,
    pub payload: Bytes,
}

impl User {
    /// Lower-cased search key, `"first last;;;username"`.
    pub fn search_name(&self) -> String {
        let mut name = format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string();
        if let Some(username) = self.username.as_deref().filter(|u| !u.is_empty()) {
            name.push_str(";;;");
            name.push_str(username);
        }
        name.to_lowercase()
    }
}

impl Tagged for User {
    const TAG: TypeTag = TypeTag::User;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i32,
    pub title: String,
    /// Broadcast channel rather than a plain group.
    pub is_channel: bool,
    pub payload: Bytes,
}

impl Tagged for Chat {
    const TAG: TypeTag = TypeTag::Chat;
}

/// End-to-end encrypted session, including raw key material.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedChat {
    pub id: i32,
    pub user_id: i32,
    pub title: String,
    pub payload: Bytes,
    /// Diffie-Hellman `g_a` or `g_b` while the handshake is in flight.
    pub g_a_or_b: Option<Bytes>,
    pub auth_key: Option<Bytes>,
    pub ttl: i32,
    pub layer: i32,
    pub seq_in: i32,
    pub seq_out: i32,
    pub key_use_count: i32,
    pub exchange_id: i64,
    pub key_create_date: Timestamp,
    pub future_key_fingerprint: i64,
    pub future_auth_key: Option<Bytes>,
    /// Visual fingerprint derived from `auth_key`; filled in by the cache.
    pub key_hash: Option<Bytes>,
}

impl Tagged for EncryptedChat {
    const TAG: TypeTag = TypeTag::EncryptedChat;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub user_id: i32,
    pub mutual: bool,
}

/// Reply keyboard associated with a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotKeyboard {
    pub dialog_id: DialogId,
    pub message_id: MessageId,
    pub payload: Bytes,
}

/// Pending auto-download entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadItem {
    /// Remote file id.
    pub id: i64,
    /// Download-mask bit of the media kind.
    pub kind: u32,
    pub date: Timestamp,
    pub payload: Bytes,
}

/// Previously uploaded file, reused instead of uploading again.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentFile {
    pub path: String,
    pub kind: i32,
    pub payload: Bytes,
}
