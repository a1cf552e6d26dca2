//! Signaling schema and shared identity types for the sealcast E2EE core.
//!
//! The signaling transport itself is an external collaborator; this crate
//! only defines the JSON message shapes the core emits and consumes, plus
//! the participant/generation types every other crate shares.

pub mod error;
pub mod messages;
pub mod types;

pub use error::ProtocolError;
pub use messages::{
    decode_key_material, decode_message, encode_key_material, encode_message, ServerErrorCode,
    SignalMessage, KEY_MATERIAL_LEN,
};
pub use types::{next_generation, KeyGeneration, ParticipantId, ParticipantInfo, TrackKind};
