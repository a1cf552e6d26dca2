//! Cryptographic engine of the sealcast E2EE core.
//!
//! This crate provides:
//! - Per-frame AES-256-GCM encryption with the 29-byte wire header
//! - Sliding-window replay protection per remote sender
//! - Sender-key ownership: local generation/rotation, bounded remote
//!   histories, ratchet hints, lifecycle events
//!
//! Key material lives exclusively in [`SenderKeyManager`] and is zeroized
//! on destruction.

pub mod error;
pub mod events;
pub mod frame;
pub mod replay;
pub mod sender_keys;

pub use error::{FrameError, KeyError};
pub use events::KeyEvent;
pub use frame::{peek_generation, FrameCodec, ENCRYPTION_OVERHEAD, MIN_FRAME_LEN};
pub use replay::{
    InvalidWindowSize, ReplayManager, ReplayStats, ReplayWindow, Verdict, DEFAULT_WINDOW_BITS,
    MAX_WINDOW_BITS, MIN_WINDOW_BITS,
};
pub use sender_keys::{
    KeyManagerConfig, SenderKey, SenderKeyManager, SerializedSenderKey, KEY_LEN,
};
