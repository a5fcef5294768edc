//! Payload codec.
//!
//! Every BLOB column the cache writes is an envelope: one type-tag byte
//! followed by the CBOR body of the record ([`ciborium`]). Storage treats the
//! envelope as opaque; only [`encode`] and [`decode`] look inside it.

use serde::{de::DeserializeOwned, Serialize};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("CBOR serialization of {type_name} failed: {reason}")]
    Serialization { type_name: &'static str, reason: String },

    #[error("CBOR deserialization of {type_name} failed: {reason}")]
    Deserialization { type_name: &'static str, reason: String },

    #[error("type tag mismatch: expected {expected:?}, found {found}")]
    TagMismatch { expected: TypeTag, found: u8 },

    #[error("empty envelope")]
    Empty,
}

/// Record type carried in an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TypeTag {
    Message = 1,
    User = 2,
    Chat = 3,
    EncryptedChat = 4,
}

impl TypeTag {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(TypeTag::Message),
            2 => Some(TypeTag::User),
            3 => Some(TypeTag::Chat),
            4 => Some(TypeTag::EncryptedChat),
            _ => None,
        }
    }

    fn type_name(self) -> &'static str {
        match self {
            TypeTag::Message => "Message",
            TypeTag::User => "User",
            TypeTag::Chat => "Chat",
            TypeTag::EncryptedChat => "EncryptedChat",
        }
    }
}

/// A record type with a fixed envelope tag.
pub trait Tagged: Serialize + DeserializeOwned {
    const TAG: TypeTag;
}

/// Serialize a record into a tagged envelope.
pub fn encode<T: Tagged>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut buf = vec![T::TAG as u8];
    ciborium::into_writer(value, &mut buf).map_err(|e| CodecError::Serialization {
        type_name: T::TAG.type_name(),
        reason: e.to_string(),
    })?;
    Ok(buf)
}

/// Deserialize a tagged envelope, checking the tag first.
pub fn decode<T: Tagged>(data: &[u8]) -> Result<T, CodecError> {
    let (&tag, body) = data.split_first().ok_or(CodecError::Empty)?;
    if tag != T::TAG as u8 {
        return Err(CodecError::TagMismatch {
            expected: T::TAG,
            found: tag,
        });
    }
    ciborium::from_reader(body).map_err(|e| CodecError::Deserialization {
        type_name: T::TAG.type_name(),
        reason: e.to_string(),
    })
}

/// Read the type tag of an envelope without decoding the body.
pub fn peek_tag(data: &[u8]) -> Option<TypeTag> {
    data.first().copied().and_then(TypeTag::from_byte)
}
