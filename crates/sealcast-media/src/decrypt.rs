//! Receive-side transform: wire frames in, plaintext for the decoder out.

use bytes::Bytes;

use sealcast_crypto::replay::InvalidWindowSize;
use sealcast_crypto::{FrameCodec, ReplayManager, SenderKeyManager, Verdict, MIN_FRAME_LEN};
use sealcast_protocol::ParticipantId;

use crate::stats::DecryptStats;

/// Why a frame was dropped instead of delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    AuthFailure,
    /// No key in history for the frame's generation byte. The caller may
    /// answer with an outbound `e2ee-key-request`.
    UnknownGeneration,
    Replay,
    TooOld,
}

/// Result of pushing one inbound frame through the transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptOutcome {
    /// Decrypted and accepted by the replay window.
    Decrypted(Bytes),
    /// Too short to be an encrypted frame; forwarded unchanged.
    PassThrough(Bytes),
    /// Dropped; the payload is gone and only the counter remains.
    Dropped(DropReason),
}

/// Per-track receive pipeline node.
///
/// Decrypts with the sender's key at the generation named in the frame
/// header, then runs the sliding-window replay check. The replay check
/// runs after authentication so forged sequence numbers cannot poison the
/// window. The generation byte picks the right key automatically after a
/// rotation, within the history bound.
pub struct DecryptTransform {
    keys: SenderKeyManager,
    codec: FrameCodec,
    replay: ReplayManager,
    stats: DecryptStats,
}

impl DecryptTransform {
    pub fn new(
        keys: SenderKeyManager,
        window_bits: usize,
        allow_wrap_around: bool,
    ) -> Result<Self, InvalidWindowSize> {
        Ok(Self {
            keys,
            codec: FrameCodec::new(),
            replay: ReplayManager::new(window_bits, allow_wrap_around)?,
            stats: DecryptStats::default(),
        })
    }

    /// Transform one inbound frame from `sender` with transport sequence
    /// number `sequence`.
    pub fn process(
        &mut self,
        sender: &ParticipantId,
        sequence: u32,
        payload: &[u8],
    ) -> DecryptOutcome {
        if payload.len() < MIN_FRAME_LEN {
            self.stats.pass_through += 1;
            return DecryptOutcome::PassThrough(Bytes::copy_from_slice(payload));
        }

        let generation = payload[0];
        let codec = &self.codec;
        let opened = self
            .keys
            .with_decryption_key(sender, generation, |key| {
                codec.decrypt(key.material(), payload)
            });

        let plaintext = match opened {
            None => {
                self.stats.unknown_generation += 1;
                tracing::debug!(%sender, generation, "dropping frame for unknown generation");
                return DecryptOutcome::Dropped(DropReason::UnknownGeneration);
            }
            Some(Err(_)) => {
                self.stats.auth_failures += 1;
                tracing::debug!(%sender, "dropping frame that failed authentication");
                return DecryptOutcome::Dropped(DropReason::AuthFailure);
            }
            Some(Ok(plaintext)) => plaintext,
        };

        match self.replay.check(sender, sequence) {
            Verdict::Accepted => {
                self.stats.frames_decrypted += 1;
                DecryptOutcome::Decrypted(Bytes::from(plaintext))
            }
            Verdict::Replay => {
                self.stats.replays_rejected += 1;
                tracing::debug!(%sender, sequence, "dropping replayed frame");
                DecryptOutcome::Dropped(DropReason::Replay)
            }
            Verdict::TooOld => {
                self.stats.too_old_rejected += 1;
                tracing::debug!(%sender, sequence, "dropping stale frame");
                DecryptOutcome::Dropped(DropReason::TooOld)
            }
        }
    }

    /// Drop per-sender replay state when a participant leaves.
    pub fn remove_sender(&mut self, sender: &ParticipantId) -> bool {
        self.replay.remove_sender(sender)
    }

    pub fn stats(&self) -> DecryptStats {
        self.stats
    }
}
