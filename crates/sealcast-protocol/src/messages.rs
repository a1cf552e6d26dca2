//! Signaling message schema.
//!
//! Messages travel as JSON over an external signaling channel. The field
//! names here are the wire contract shared with the conference server and
//! every peer; the core never interprets the WebRTC carrier payloads.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{KeyGeneration, ParticipantId, ParticipantInfo, TrackKind};

/// Length of sender-key material carried in `e2ee-key` messages, in bytes.
pub const KEY_MATERIAL_LEN: usize = 32;

/// Error codes emitted by the signaling server. The set is open; codes
/// this client does not know are carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ServerErrorCode {
    ParticipantNotFound,
    RosterFull,
    Other(String),
}

impl From<String> for ServerErrorCode {
    fn from(code: String) -> Self {
        match code.as_str() {
            "PARTICIPANT_NOT_FOUND" => Self::ParticipantNotFound,
            "ROSTER_FULL" => Self::RosterFull,
            _ => Self::Other(code),
        }
    }
}

impl From<ServerErrorCode> for String {
    fn from(code: ServerErrorCode) -> Self {
        match code {
            ServerErrorCode::ParticipantNotFound => "PARTICIPANT_NOT_FOUND".into(),
            ServerErrorCode::RosterFull => "ROSTER_FULL".into(),
            ServerErrorCode::Other(code) => code,
        }
    }
}

/// A signaling message, tagged on the wire by its `type` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SignalMessage {
    /// Client announces itself to the server.
    #[serde(rename = "join")]
    Join {
        from: ParticipantId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// Server's reply to `join`: the current roster.
    #[serde(rename = "joined")]
    Joined { participants: Vec<ParticipantInfo> },

    /// A new participant entered the session.
    #[serde(rename = "participant-joined")]
    ParticipantJoined {
        #[serde(rename = "participantId")]
        participant_id: ParticipantId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// A participant left the session.
    #[serde(rename = "participant-left")]
    ParticipantLeft {
        #[serde(rename = "participantId")]
        participant_id: ParticipantId,
    },

    /// Sender-key distribution. `to` absent means broadcast; the key is
    /// raw 32-byte material, base64-encoded.
    #[serde(rename = "e2ee-key")]
    E2eeKey {
        from: ParticipantId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<ParticipantId>,
        key: String,
        generation: KeyGeneration,
    },

    /// Ask a peer to re-send its current sender key.
    #[serde(rename = "e2ee-key-request")]
    E2eeKeyRequest { from: ParticipantId, to: ParticipantId },

    /// A peer published a media track.
    #[serde(rename = "track-published")]
    TrackPublished {
        from: ParticipantId,
        #[serde(rename = "trackId")]
        track_id: String,
        #[serde(rename = "trackType")]
        track_type: TrackKind,
    },

    // WebRTC carriers are forwarded verbatim; their bodies stay opaque.
    #[serde(rename = "offer")]
    Offer {
        #[serde(flatten)]
        body: serde_json::Value,
    },

    #[serde(rename = "answer")]
    Answer {
        #[serde(flatten)]
        body: serde_json::Value,
    },

    #[serde(rename = "ice-candidate")]
    IceCandidate {
        #[serde(flatten)]
        body: serde_json::Value,
    },

    /// Error reported by the signaling server.
    #[serde(rename = "error")]
    Error { code: ServerErrorCode },
}

/// Serialize a message to its JSON wire form.
pub fn encode_message(msg: &SignalMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(msg)?)
}

/// Parse a message from its JSON wire form.
pub fn decode_message(text: &str) -> Result<SignalMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Base64-encode 32-byte sender-key material for an `e2ee-key` message.
pub fn encode_key_material(material: &[u8; KEY_MATERIAL_LEN]) -> String {
    BASE64.encode(material)
}

/// Decode and length-check the `key` field of an `e2ee-key` message.
///
/// The caller owns the returned copy and must treat it as secret.
pub fn decode_key_material(key: &str) -> Result<[u8; KEY_MATERIAL_LEN], ProtocolError> {
    let bytes = BASE64.decode(key)?;
    if bytes.len() != KEY_MATERIAL_LEN {
        return Err(ProtocolError::BadKeyLength { got: bytes.len() });
    }
    let mut material = [0u8; KEY_MATERIAL_LEN];
    material.copy_from_slice(&bytes);
    Ok(material)
}
