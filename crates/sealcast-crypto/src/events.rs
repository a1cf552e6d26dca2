//! Key lifecycle events.
//!
//! The owner of a [`SenderKeyManager`](crate::SenderKeyManager) installs a
//! channel sender once; events are pushed as they happen and a closed or
//! missing receiver is silently ignored, so a misbehaving listener can
//! never stall key management.

use tokio::sync::mpsc::UnboundedSender;

use sealcast_protocol::{KeyGeneration, ParticipantId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyEvent {
    /// First local key was generated.
    KeyGenerated {
        participant_id: ParticipantId,
        generation: KeyGeneration,
        timestamp_ms: u64,
    },
    /// Local key rotated to a new generation.
    KeyRotated {
        participant_id: ParticipantId,
        generation: KeyGeneration,
        timestamp_ms: u64,
    },
    /// First key imported for a remote participant.
    ParticipantAdded {
        participant_id: ParticipantId,
        generation: KeyGeneration,
        timestamp_ms: u64,
    },
    /// Subsequent key imported for an already-known participant.
    KeyReceived {
        participant_id: ParticipantId,
        generation: KeyGeneration,
        timestamp_ms: u64,
    },
    /// A participant and its key history were removed.
    ParticipantRemoved {
        participant_id: ParticipantId,
        timestamp_ms: u64,
    },
}

/// Push an event to an optional sink, discarding delivery failures.
pub(crate) fn emit(sink: &Option<UnboundedSender<KeyEvent>>, event: KeyEvent) {
    if let Some(tx) = sink {
        let _ = tx.send(event);
    }
}
