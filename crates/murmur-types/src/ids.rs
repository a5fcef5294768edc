//! Identifier scheme.
//!
//! Message ids stored in the cache are *composite*: a signed 32-bit local
//! sequence number in the low half, and the owning broadcast channel (if any)
//! as an unsigned 32-bit value in the high half. Every table that references a
//! message uses the composite form; mixing raw local ids with composite ids is
//! the bug this module exists to prevent.
//!
//! Conversation ids encode the peer kind in their 32-bit halves:
//!
//! | low half | high half | kind                      |
//! |----------|-----------|---------------------------|
//! | 0        | n != 0    | secret session `n`        |
//! | n != 0   | 1         | broadcast list `n`        |
//! | n > 0    | other     | direct peer (user) `n`    |
//! | n < 0    | other     | group or channel `-n`     |
//!
//! Locally pending messages carry negative local ids and are never composed
//! with a channel; they receive their composite id when rekeyed.

use serde::{Deserialize, Serialize};

use crate::{ChannelId, DialogId, MessageId};

const LOW_MASK: i64 = 0xFFFF_FFFF;

/// Fold a local id and a channel scope into one 64-bit key.
///
/// A zero scope leaves the (sign-extended) local id untouched. Channel ids
/// are positive; a negative scope does not survive [`decompose`], so ids
/// arriving from outside go through [`checked_compose`].
pub fn compose(local_id: i32, channel_id: ChannelId) -> MessageId {
    if channel_id == 0 {
        return i64::from(local_id);
    }
    i64::from(local_id as u32) | (i64::from(channel_id as u32) << 32)
}

/// [`compose`], or `None` for a negative channel scope.
pub fn checked_compose(local_id: i32, channel_id: ChannelId) -> Option<MessageId> {
    (channel_id >= 0).then(|| compose(local_id, channel_id))
}

/// Inverse of [`compose`]: recover `(local_id, channel_id)`.
pub fn decompose(id: MessageId) -> (i32, ChannelId) {
    let local = id as i32;
    let high = (id >> 32) as i32;
    if high > 0 {
        (local, high)
    } else {
        (local, 0)
    }
}

/// Local (per-channel) part of a composite id.
pub fn local_part(id: MessageId) -> i32 {
    decompose(id).0
}

/// Channel scope of a composite id, zero when none.
pub fn channel_of(id: MessageId) -> ChannelId {
    decompose(id).1
}

/// Whether the id denotes a locally pending (unconfirmed) message.
pub fn is_pending(id: MessageId) -> bool {
    id < 0
}

/// Decoded kind of a conversation id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PeerKind {
    /// One-to-one conversation with a user.
    User(i32),
    /// Multi-party chat or broadcast channel, by positive chat id.
    Chat(i32),
    /// Broadcast list.
    Broadcast(i32),
    /// End-to-end encrypted session.
    Secret(i32),
}

impl PeerKind {
    /// Decode a conversation id into its peer kind.
    pub fn decode(dialog_id: DialogId) -> Self {
        let lower = dialog_id as i32;
        let high = (dialog_id >> 32) as i32;
        if lower == 0 {
            PeerKind::Secret(high)
        } else if high == 1 {
            PeerKind::Broadcast(lower)
        } else if lower > 0 {
            PeerKind::User(lower)
        } else {
            PeerKind::Chat(lower.wrapping_neg())
        }
    }

    /// Encode the peer kind back into a conversation id.
    pub fn dialog_id(self) -> DialogId {
        match self {
            PeerKind::User(id) => i64::from(id),
            PeerKind::Chat(id) => -i64::from(id),
            PeerKind::Broadcast(id) => (1_i64 << 32) | (i64::from(id) & LOW_MASK),
            PeerKind::Secret(id) => i64::from(id) << 32,
        }
    }

    pub fn is_secret(self) -> bool {
        matches!(self, PeerKind::Secret(_))
    }
}

/// Conversation id of a broadcast channel.
pub fn channel_dialog(channel_id: ChannelId) -> DialogId {
    -i64::from(channel_id)
}

/// Conversation id of an encrypted session.
pub fn secret_dialog(session_id: i32) -> DialogId {
    PeerKind::Secret(session_id).dialog_id()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_without_channel_is_identity() {
        assert_eq!(compose(42, 0), 42);
        assert_eq!(compose(-7, 0), -7);
        assert_eq!(decompose(-7), (-7, 0));
    }

    #[test]
    fn test_compose_with_channel_uses_high_half() {
        let id = compose(5, 3);
        assert_eq!(id, (3_i64 << 32) | 5);
        assert_eq!(decompose(id), (5, 3));
        assert_eq!(channel_of(id), 3);
        assert_eq!(local_part(id), 5);
    }

    #[test]
    fn test_compose_truncates_local_to_32_bits() {
        let id = compose(-1, 9);
        assert_eq!(id & LOW_MASK, 0xFFFF_FFFF);
        assert_eq!(decompose(id), (-1, 9));
    }

    #[test]
    fn test_round_trip_edges() {
        for local in [i32::MIN, -1, 0, 1, i32::MAX] {
            for channel in [0, 1, 77, i32::MAX] {
                assert_eq!(decompose(compose(local, channel)), (local, channel));
            }
        }
    }

    #[test]
    fn test_channel_messages_are_never_pending() {
        for channel in [1, 0x4000_0000, i32::MAX] {
            for local in [0, 1, i32::MAX] {
                let id = checked_compose(local, channel).expect("positive scope");
                assert!(!is_pending(id));
                assert_eq!(decompose(id), (local, channel));
            }
        }
    }

    #[test]
    fn test_checked_compose_rejects_negative_scope() {
        assert_eq!(checked_compose(5, i32::MIN + 7), None);
        assert_eq!(checked_compose(5, -1), None);
        assert_eq!(checked_compose(5, 0), Some(5));
    }

    #[test]
    fn test_channel_ids_order_within_channel() {
        assert!(compose(10, 4) < compose(11, 4));
        assert!(compose(i32::MAX, 4) < compose(1, 5));
    }

    #[test]
    fn test_peer_kind_decode() {
        assert_eq!(PeerKind::decode(12), PeerKind::User(12));
        assert_eq!(PeerKind::decode(-12), PeerKind::Chat(12));
        assert_eq!(PeerKind::decode(5_i64 << 32), PeerKind::Secret(5));
        assert_eq!(PeerKind::decode((1_i64 << 32) | 8), PeerKind::Broadcast(8));
    }

    #[test]
    fn test_peer_kind_round_trip() {
        for kind in [
            PeerKind::User(1),
            PeerKind::Chat(99),
            PeerKind::Broadcast(3),
            PeerKind::Secret(17),
        ] {
            assert_eq!(PeerKind::decode(kind.dialog_id()), kind);
        }
    }

    #[test]
    fn test_channel_dialog() {
        assert_eq!(channel_dialog(55), -55);
        assert_eq!(PeerKind::decode(channel_dialog(55)), PeerKind::Chat(55));
        assert!(PeerKind::decode(secret_dialog(2)).is_secret());
    }
}
