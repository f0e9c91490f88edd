use thiserror::Error;

/// Errors from encoding/decoding the wire signing request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("signing request is truncated")]
    Truncated,

    #[error("signing request has unconsumed trailing bytes")]
    TrailingBytes,

    #[error("invalid TPM public area encoding: {0}")]
    InvalidPublicArea(String),

    #[error("invalid ASN.1 encoding: {0}")]
    Asn1(String),
}

/// The key-attribute and chain errors the verifier can report. Every
/// variant's `Display` is the exact stable string callers key their
/// behavior on; do not reword an existing variant without updating every
/// caller that matches on it.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("certify signature does not verify under the attestation key")]
    BadSelfSignature,

    #[error("endorsement certificate does not chain to a trusted manufacturer root")]
    UntrustedEndorsementChain,

    #[error("certify info does not name the DevID key")]
    ResidencyMismatch,

    #[error("endorsement key is not marked restricted+decrypt+fixedTPM+fixedParent")]
    BadEndorsementKeyAttributes,

    #[error("attestation key is not marked restricted+sign+fixedTPM+fixedParent")]
    BadAttestationKeyAttributes,

    #[error("DevID key is not marked sign+fixedTPM+fixedParent and unrestricted")]
    BadDevIdKeyAttributes,

    #[error("unsupported algorithm")]
    UnsupportedAlgorithm,
}

/// Errors from the challenge engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("unsupported algorithm")]
    UnsupportedAlgorithm,

    #[error("challenge response does not match nonce")]
    NonceMismatch,

    #[error("credential activation primitive failed: {0}")]
    Activation(String),
}
