use thiserror::Error;

/// Session-lifecycle errors. `Display` produces the exact stable strings
/// every client of this service keys its retry/error-display logic on.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum SessionError {
    #[error("missing session cookie")]
    MissingCookie,

    #[error("invalid session cookie")]
    InvalidCookie,

    #[error("request out of order")]
    OutOfOrder,

    #[error("session expired")]
    Expired,
}

#[derive(Debug, Error)]
pub enum IssuanceError {
    #[error("challenge response does not match nonce")]
    NonceMismatch,

    #[error(transparent)]
    Verify(#[from] devid_protocol::VerifyError),

    #[error(transparent)]
    Challenge(#[from] devid_protocol::ChallengeError),

    #[error(transparent)]
    Codec(#[from] devid_protocol::CodecError),

    #[error("certificate signing failed: {0}")]
    Signing(String),

    #[error("xname is not on the allowlist")]
    NotAllowed,
}
