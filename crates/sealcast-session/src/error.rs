use thiserror::Error;

use sealcast_protocol::ParticipantId;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("roster is full ({max} participants)")]
    RosterFull { max: usize },

    #[error("participant not found: {id}")]
    ParticipantNotFound { id: ParticipantId },

    #[error("the local participant does not belong in the roster")]
    LocalParticipantInRoster,

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("topology would grant the server access to keys")]
    ServerKeyAccess,

    #[error(transparent)]
    Key(#[from] sealcast_crypto::KeyError),

    #[error(transparent)]
    Protocol(#[from] sealcast_protocol::ProtocolError),
}
