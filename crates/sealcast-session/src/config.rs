use serde::Deserialize;

use sealcast_crypto::replay::{MAX_WINDOW_BITS, MIN_WINDOW_BITS};
use sealcast_crypto::KeyManagerConfig;
use sealcast_protocol::ParticipantId;

use crate::error::SessionError;
use crate::topology::TopologyKind;

/// Per-session configuration, typically deserialized from the embedding
/// application's JSON settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Identity used in all signaling messages. Fixed for the session.
    pub local_participant_id: ParticipantId,

    /// Prior local key generations retained for late-arriving receivers.
    #[serde(default = "default_history_max")]
    pub local_history_max: usize,

    /// Key generations retained per remote participant.
    #[serde(default = "default_history_max")]
    pub remote_history_max: usize,

    /// Roster cap; further joins fail.
    #[serde(default = "default_max_participants")]
    pub max_participants: usize,

    /// Replay window bits per sender. Power of two, 64..=4096.
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Tolerate 32-bit sequence wrap-around in the replay window.
    #[serde(default)]
    pub allow_wrap_around: bool,

    /// Encrypted frames between rotation hints.
    #[serde(default = "default_ratchet_interval")]
    pub ratchet_interval: u64,

    /// Whether rotation hints are produced at all.
    #[serde(default = "default_enable_ratcheting")]
    pub enable_ratcheting: bool,

    /// Quiescence period after a leave before the forward-secrecy
    /// rotation fires; further leaves reset it.
    #[serde(default = "default_rotation_debounce_ms")]
    pub rotation_debounce_ms: u64,

    /// How keys flow between participants.
    #[serde(default)]
    pub topology: TopologyKind,
}

fn default_history_max() -> usize {
    5
}

fn default_max_participants() -> usize {
    200
}

fn default_window_size() -> usize {
    1024
}

fn default_ratchet_interval() -> u64 {
    100
}

fn default_enable_ratcheting() -> bool {
    true
}

fn default_rotation_debounce_ms() -> u64 {
    5000
}

impl SessionConfig {
    /// All-defaults configuration for the given identity.
    pub fn new(local_participant_id: ParticipantId) -> Self {
        Self {
            local_participant_id,
            local_history_max: default_history_max(),
            remote_history_max: default_history_max(),
            max_participants: default_max_participants(),
            window_size: default_window_size(),
            allow_wrap_around: false,
            ratchet_interval: default_ratchet_interval(),
            enable_ratcheting: default_enable_ratcheting(),
            rotation_debounce_ms: default_rotation_debounce_ms(),
            topology: TopologyKind::default(),
        }
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        if !self.window_size.is_power_of_two()
            || !(MIN_WINDOW_BITS..=MAX_WINDOW_BITS).contains(&self.window_size)
        {
            return Err(SessionError::InvalidConfig {
                reason: format!(
                    "window_size must be a power of two in {MIN_WINDOW_BITS}..={MAX_WINDOW_BITS}, got {}",
                    self.window_size
                ),
            });
        }
        if self.max_participants == 0 {
            return Err(SessionError::InvalidConfig {
                reason: "max_participants must be at least 1".into(),
            });
        }
        if self.remote_history_max == 0 {
            return Err(SessionError::InvalidConfig {
                reason: "remote_history_max must be at least 1".into(),
            });
        }
        if self.ratchet_interval == 0 {
            return Err(SessionError::InvalidConfig {
                reason: "ratchet_interval must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// The slice of this configuration the key manager consumes.
    pub fn key_manager_config(&self) -> KeyManagerConfig {
        KeyManagerConfig {
            local_history_max: self.local_history_max,
            remote_history_max: self.remote_history_max,
            ratchet_interval: self.ratchet_interval,
            enable_ratcheting: self.enable_ratcheting,
        }
    }
}
