use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Maximum length of a participant id in bytes.
pub const MAX_PARTICIPANT_ID_LEN: usize = 128;

/// 8-bit sender-key generation counter, carried in every wire frame header.
/// Wraps modulo 256; `n.wrapping_add(1)` is "later than" `n` within a
/// rotation window.
pub type KeyGeneration = u8;

/// The generation that follows `gen` in rotation order.
pub fn next_generation(gen: KeyGeneration) -> KeyGeneration {
    gen.wrapping_add(1)
}

/// Opaque participant identity, unique within a session.
///
/// Validated on construction: 1..=128 bytes of printable ASCII.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Result<Self, ProtocolError> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_PARTICIPANT_ID_LEN {
            return Err(ProtocolError::InvalidParticipantId { got: id.len() });
        }
        if !id.bytes().all(|b| (0x20..=0x7e).contains(&b)) {
            return Err(ProtocolError::NonPrintableParticipantId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ParticipantId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ParticipantId> for String {
    fn from(id: ParticipantId) -> Self {
        id.0
    }
}

/// Media track kind, as carried in `track-published` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

/// Roster entry as the server reports it in a `joined` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub id: ParticipantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}
