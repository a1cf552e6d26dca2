use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("participant id must be 1..=128 printable ASCII bytes, got {got} bytes")]
    InvalidParticipantId { got: usize },

    #[error("participant id contains non-printable bytes")]
    NonPrintableParticipantId,

    #[error("key material must be 32 bytes, got {got}")]
    BadKeyLength { got: usize },

    #[error("invalid base64 key material: {0}")]
    BadKeyEncoding(#[from] base64::DecodeError),

    #[error("malformed signaling message: {0}")]
    Json(#[from] serde_json::Error),
}
