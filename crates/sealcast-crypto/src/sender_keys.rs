//! Sender-key ownership and bookkeeping.
//!
//! Every participant encrypts its outbound media with its own symmetric
//! key and distributes that key out-of-band. The manager owns the local
//! key (plus a short history for late receivers), a bounded per-peer
//! history of remote keys, and the ratchet hint. It is the only component
//! that stores raw secret bytes; the frame codec borrows material for the
//! duration of a single call via the `with_*` accessors.
//!
//! The manager is a cheap-to-clone handle: the control context rotates and
//! imports, per-track media contexts look keys up. Critical sections are
//! plain in-memory reads and writes, never I/O.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use ring::rand::{SecureRandom, SystemRandom};
use tokio::sync::mpsc::UnboundedSender;
use zeroize::Zeroizing;

use sealcast_protocol::{next_generation, KeyGeneration, ParticipantId};

use crate::error::KeyError;
use crate::events::{emit, KeyEvent};

/// Length of sender-key material in bytes.
pub const KEY_LEN: usize = 32;

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A symmetric sender key owned by one participant.
///
/// Material is zeroed when the key is dropped, whether by rotation
/// eviction, participant removal, or session shutdown.
#[derive(Clone)]
pub struct SenderKey {
    owner: ParticipantId,
    material: Zeroizing<[u8; KEY_LEN]>,
    generation: KeyGeneration,
    created_at_ms: u64,
}

impl SenderKey {
    /// Draw fresh random material from the system RNG.
    pub fn generate(owner: ParticipantId, generation: KeyGeneration) -> Result<Self, KeyError> {
        let rng = SystemRandom::new();
        let mut material = Zeroizing::new([0u8; KEY_LEN]);
        rng.fill(material.as_mut()).map_err(|_| KeyError::Rng)?;
        Ok(Self {
            owner,
            material,
            generation,
            created_at_ms: unix_millis(),
        })
    }

    /// Build a key from imported material, length-checked.
    pub fn from_material(
        owner: ParticipantId,
        material: &[u8],
        generation: KeyGeneration,
    ) -> Result<Self, KeyError> {
        if material.len() != KEY_LEN {
            return Err(KeyError::KeyImportFailed { got: material.len() });
        }
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        bytes.copy_from_slice(material);
        Ok(Self {
            owner,
            material: bytes,
            generation,
            created_at_ms: unix_millis(),
        })
    }

    pub fn owner(&self) -> &ParticipantId {
        &self.owner
    }

    pub fn generation(&self) -> KeyGeneration {
        self.generation
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    /// Borrow the raw material for a single AEAD call.
    pub fn material(&self) -> &[u8; KEY_LEN] {
        &self.material
    }
}

impl fmt::Debug for SenderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderKey")
            .field("owner", &self.owner)
            .field("generation", &self.generation)
            .field("created_at_ms", &self.created_at_ms)
            .field("material", &"[redacted]")
            .finish()
    }
}

/// One-shot export of the current local key for signaling.
///
/// The material is a copy; it zeroizes on drop, and the caller must not
/// hold it longer than the transmission takes.
#[derive(Clone)]
pub struct SerializedSenderKey {
    pub participant_id: ParticipantId,
    pub key_material: Zeroizing<[u8; KEY_LEN]>,
    pub generation: KeyGeneration,
    pub created_at_ms: u64,
}

impl fmt::Debug for SerializedSenderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializedSenderKey")
            .field("participant_id", &self.participant_id)
            .field("generation", &self.generation)
            .field("created_at_ms", &self.created_at_ms)
            .field("key_material", &"[redacted]")
            .finish()
    }
}

/// Bounds and ratchet policy for a [`SenderKeyManager`].
#[derive(Debug, Clone)]
pub struct KeyManagerConfig {
    /// Prior local generations kept for late-arriving receivers.
    pub local_history_max: usize,
    /// Generations retained per remote participant.
    pub remote_history_max: usize,
    /// Frames between rotation hints.
    pub ratchet_interval: u64,
    /// Whether rotation hints are produced at all.
    pub enable_ratcheting: bool,
}

impl Default for KeyManagerConfig {
    fn default() -> Self {
        Self {
            local_history_max: 5,
            remote_history_max: 5,
            ratchet_interval: 100,
            enable_ratcheting: true,
        }
    }
}

struct ManagerState {
    local_id: ParticipantId,
    config: KeyManagerConfig,
    current: Option<SenderKey>,
    local_history: VecDeque<SenderKey>,
    /// Remote histories, most recent generation last.
    remote: HashMap<ParticipantId, VecDeque<SenderKey>>,
    frames_since_rotation: u64,
    events: Option<UnboundedSender<KeyEvent>>,
}

/// Shared handle to the per-session key state.
#[derive(Clone)]
pub struct SenderKeyManager {
    inner: Arc<RwLock<ManagerState>>,
}

impl SenderKeyManager {
    pub fn new(local_id: ParticipantId, config: KeyManagerConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ManagerState {
                local_id,
                config,
                current: None,
                local_history: VecDeque::new(),
                remote: HashMap::new(),
                frames_since_rotation: 0,
                events: None,
            })),
        }
    }

    pub fn local_id(&self) -> ParticipantId {
        self.inner.read().unwrap().local_id.clone()
    }

    /// Install the event sink. Called once by the session owner; delivery
    /// failures are discarded.
    pub fn set_event_sink(&self, sink: UnboundedSender<KeyEvent>) {
        self.inner.write().unwrap().events = Some(sink);
    }

    pub fn has_local_key(&self) -> bool {
        self.inner.read().unwrap().current.is_some()
    }

    pub fn current_generation(&self) -> Option<KeyGeneration> {
        self.inner.read().unwrap().current.as_ref().map(|k| k.generation())
    }

    /// Generate the first local key if none exists yet. Returns the
    /// current generation either way.
    pub fn ensure_local_key(&self) -> Result<KeyGeneration, KeyError> {
        let mut state = self.inner.write().unwrap();
        if let Some(key) = &state.current {
            return Ok(key.generation());
        }
        let key = SenderKey::generate(state.local_id.clone(), 0)?;
        let event = KeyEvent::KeyGenerated {
            participant_id: state.local_id.clone(),
            generation: key.generation(),
            timestamp_ms: key.created_at_ms(),
        };
        state.current = Some(key);
        state.frames_since_rotation = 0;
        emit(&state.events, event);
        tracing::debug!(participant = %state.local_id, "generated initial sender key");
        Ok(0)
    }

    /// Rotate the local key. The new generation is `prev + 1 mod 256`; the
    /// outgoing key is retained for late receivers, oldest evicted past
    /// the history bound. Resets the ratchet frame counter.
    pub fn rotate_local(&self) -> Result<KeyGeneration, KeyError> {
        let mut state = self.inner.write().unwrap();
        let Some(prev) = state.current.take() else {
            drop(state);
            return self.ensure_local_key();
        };

        let generation = next_generation(prev.generation());
        let key = SenderKey::generate(state.local_id.clone(), generation)?;

        state.local_history.push_back(prev);
        let bound = state.config.local_history_max;
        while state.local_history.len() > bound {
            state.local_history.pop_front();
        }

        let event = KeyEvent::KeyRotated {
            participant_id: state.local_id.clone(),
            generation,
            timestamp_ms: key.created_at_ms(),
        };
        state.current = Some(key);
        state.frames_since_rotation = 0;
        emit(&state.events, event);
        tracing::debug!(
            participant = %state.local_id,
            generation,
            "rotated local sender key"
        );
        Ok(generation)
    }

    /// Export the current local key for distribution over signaling.
    pub fn export_local(&self) -> Option<SerializedSenderKey> {
        let state = self.inner.read().unwrap();
        state.current.as_ref().map(|key| SerializedSenderKey {
            participant_id: key.owner().clone(),
            key_material: key.material.clone(),
            generation: key.generation(),
            created_at_ms: key.created_at_ms(),
        })
    }

    /// Install a remote participant's key at the given generation.
    ///
    /// Rejects the local participant's own id. Re-importing an existing
    /// generation replaces its material; otherwise the key is appended and
    /// the oldest entry evicted past the history bound.
    pub fn import_remote(
        &self,
        from: &ParticipantId,
        material: &[u8],
        generation: KeyGeneration,
    ) -> Result<(), KeyError> {
        let mut state = self.inner.write().unwrap();
        if *from == state.local_id {
            return Err(KeyError::OwnKeyAsRemote);
        }
        let key = SenderKey::from_material(from.clone(), material, generation)?;
        let timestamp_ms = key.created_at_ms();

        let newly_added = !state.remote.contains_key(from);
        let bound = state.config.remote_history_max;
        let history = state.remote.entry(from.clone()).or_default();
        history.retain(|k| k.generation() != generation);
        history.push_back(key);
        while history.len() > bound {
            history.pop_front();
        }

        let event = if newly_added {
            KeyEvent::ParticipantAdded {
                participant_id: from.clone(),
                generation,
                timestamp_ms,
            }
        } else {
            KeyEvent::KeyReceived {
                participant_id: from.clone(),
                generation,
                timestamp_ms,
            }
        };
        emit(&state.events, event);
        tracing::debug!(participant = %from, generation, "imported remote sender key");
        Ok(())
    }

    /// Borrow the current local key for an encrypt call.
    pub fn with_encryption_key<R>(&self, f: impl FnOnce(&SenderKey) -> R) -> Option<R> {
        let state = self.inner.read().unwrap();
        state.current.as_ref().map(f)
    }

    /// Borrow the key for `(participant, generation)` for a decrypt call:
    /// the local current key when the id is our own, otherwise the match
    /// from that peer's history, most recent first.
    pub fn with_decryption_key<R>(
        &self,
        participant: &ParticipantId,
        generation: KeyGeneration,
        f: impl FnOnce(&SenderKey) -> R,
    ) -> Option<R> {
        let state = self.inner.read().unwrap();
        if *participant == state.local_id {
            return state
                .current
                .as_ref()
                .filter(|k| k.generation() == generation)
                .map(f);
        }
        state
            .remote
            .get(participant)?
            .iter()
            .rev()
            .find(|k| k.generation() == generation)
            .map(f)
    }

    /// Record one outbound encrypted frame for the ratchet hint.
    pub fn note_frame_sent(&self) {
        self.inner.write().unwrap().frames_since_rotation += 1;
    }

    /// Whether the coordinator ought to rotate now. Hint only; rotation
    /// happens when the caller invokes [`Self::rotate_local`].
    pub fn should_ratchet(&self) -> bool {
        let state = self.inner.read().unwrap();
        state.config.enable_ratcheting
            && state.frames_since_rotation >= state.config.ratchet_interval
    }

    /// Drop a departed participant's key history. The local id is never
    /// removable; returns whether anything was deleted.
    pub fn remove_participant(&self, participant: &ParticipantId) -> bool {
        let mut state = self.inner.write().unwrap();
        if *participant == state.local_id {
            tracing::debug!("ignoring request to remove the local participant's keys");
            return false;
        }
        let removed = state.remote.remove(participant).is_some();
        if removed {
            let event = KeyEvent::ParticipantRemoved {
                participant_id: participant.clone(),
                timestamp_ms: unix_millis(),
            };
            emit(&state.events, event);
        }
        removed
    }

    pub fn participant_count(&self) -> usize {
        self.inner.read().unwrap().remote.len()
    }

    pub fn known_participants(&self) -> Vec<ParticipantId> {
        self.inner.read().unwrap().remote.keys().cloned().collect()
    }

    #[cfg(test)]
    fn remote_history_len(&self, participant: &ParticipantId) -> usize {
        self.inner
            .read()
            .unwrap()
            .remote
            .get(participant)
            .map_or(0, |h| h.len())
    }

    /// Session shutdown: zeroize and drop all key material, close the
    /// event sink.
    pub fn clear(&self) {
        let mut state = self.inner.write().unwrap();
        state.current = None;
        state.local_history.clear();
        state.remote.clear();
        state.frames_since_rotation = 0;
        state.events = None;
    }
}
