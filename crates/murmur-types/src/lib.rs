//! # murmur-types
//!
//! Shared domain types for the murmur message cache.
//!
//! - [`ids`]: the composite message id and conversation id encodings
//! - [`records`]: value types the cache stores and hands back to callers
//! - [`codec`]: the opaque byte envelope used for every payload column
//! - [`events`]: notifications emitted after storage mutations

pub mod codec;
pub mod events;
pub mod ids;
pub mod records;

/// Conversation identifier. Peer kind is packed into the low/high halves.
pub type DialogId = i64;
/// Composite message identifier: local id in the low 32 bits, channel in the high 32.
pub type MessageId = i64;
/// Broadcast-channel identifier. Zero means "not a channel".
pub type ChannelId = i32;
/// Unix epoch seconds.
pub type Timestamp = i64;
pub type Bytes = Vec<u8>;

/// Auto-download window: only media newer than this many seconds is queued.
pub const AUTO_DOWNLOAD_WINDOW_SECS: i64 = 86_400;

/// Maximum number of unread messages returned by an unread preview.
pub const UNREAD_PREVIEW_LIMIT: usize = 50;

/// Number of download-queue rows returned per kind.
pub const DOWNLOAD_QUEUE_BATCH: usize = 3;
