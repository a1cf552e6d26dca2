//! Send-side transform: plaintext encoder output in, wire frames out.

use bytes::Bytes;

use sealcast_crypto::{FrameCodec, FrameError, SenderKeyManager};

use crate::stats::EncryptStats;
use crate::OutboundFrame;

/// Per-track send pipeline node.
///
/// Encrypts each encoded frame with the current local sender key. Until a
/// key is set, frames pass through unchanged so signaling can establish
/// the session first. A key installed by the control context takes effect
/// on the next frame.
pub struct EncryptTransform {
    keys: SenderKeyManager,
    codec: FrameCodec,
    next_sequence: u32,
    stats: EncryptStats,
}

impl EncryptTransform {
    pub fn new(keys: SenderKeyManager) -> Self {
        Self {
            keys,
            codec: FrameCodec::new(),
            next_sequence: 0,
            stats: EncryptStats::default(),
        }
    }

    /// Transform one encoded media frame. Fails only on RNG failure,
    /// which is fatal for the session.
    pub fn process(&mut self, payload: &[u8]) -> Result<OutboundFrame, FrameError> {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        let codec = &self.codec;
        let sealed = self
            .keys
            .with_encryption_key(|key| codec.encrypt(key.material(), key.generation(), payload));

        match sealed {
            Some(frame) => {
                let frame = frame?;
                self.keys.note_frame_sent();
                self.stats.frames_encrypted += 1;
                Ok(OutboundFrame {
                    sequence,
                    payload: Bytes::from(frame),
                })
            }
            None => {
                self.stats.pass_through += 1;
                Ok(OutboundFrame {
                    sequence,
                    payload: Bytes::copy_from_slice(payload),
                })
            }
        }
    }

    pub fn stats(&self) -> EncryptStats {
        self.stats
    }
}
