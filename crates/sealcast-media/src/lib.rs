//! Per-track media transform glue for the sealcast E2EE core.
//!
//! A pair of pipeline nodes sits between the codec layer and the network
//! on each media track: the send side seals encoder output into wire
//! frames with the current local sender key, the receive side opens them
//! with the originating sender's key and enforces replay protection.
//! Frames that fail decryption or the replay check are dropped silently;
//! counters record every outcome.

pub mod decrypt;
pub mod encrypt;
pub mod pump;
pub mod stats;

use bytes::Bytes;

use sealcast_protocol::ParticipantId;

pub use decrypt::{DecryptOutcome, DecryptTransform, DropReason};
pub use encrypt::EncryptTransform;
pub use pump::{run_decrypt_pump, run_encrypt_pump};
pub use stats::{DecryptStats, EncryptStats};

/// A frame leaving the local sender, ready for the network.
///
/// The sequence number is assigned per track and travels in the transport
/// header next to the payload, where the receive side reads it for replay
/// protection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub sequence: u32,
    pub payload: Bytes,
}

/// A frame arriving from the network, attributed to its sender by the
/// transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub sender: ParticipantId,
    pub sequence: u32,
    pub payload: Bytes,
}
