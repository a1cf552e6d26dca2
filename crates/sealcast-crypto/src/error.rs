use thiserror::Error;

use crate::frame::MIN_FRAME_LEN;

/// Errors from the per-frame codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// AEAD tag verification failed. The frame must be dropped.
    #[error("authentication tag mismatch")]
    AuthFailure,

    /// No key known for the generation byte in the frame header.
    #[error("no key for generation {generation}")]
    UnknownGeneration { generation: u8 },

    /// The buffer cannot hold a generation byte, IV, and tag.
    #[error("frame too short: expected at least {MIN_FRAME_LEN} bytes, got {got}")]
    FrameTooShort { got: usize },

    /// The AEAD backend rejected the key material.
    #[error("key material rejected by AEAD backend")]
    InvalidKey,

    /// The system RNG failed while drawing an IV. Fatal for the session.
    #[error("system RNG failed")]
    Rng,
}

/// Errors from sender-key management.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// A peer (or a reflected broadcast) tried to install the local
    /// participant's own key as a remote sender key.
    #[error("cannot import own key as a remote sender key")]
    OwnKeyAsRemote,

    /// Imported material was not exactly 32 bytes.
    #[error("key import failed: material must be 32 bytes, got {got}")]
    KeyImportFailed { got: usize },

    /// The system RNG failed while drawing key material. Fatal for the
    /// session.
    #[error("system RNG failed")]
    Rng,
}
