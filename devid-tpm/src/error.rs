use thiserror::Error;

/// Errors surfaced by the TPM gateway. Library-internal; binaries wrap these
/// in `anyhow::Error` at the call boundary.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to open TPM device: {0}")]
    DeviceOpen(String),

    #[error("tpm command failed: {0}")]
    Tpm(#[from] tss_esapi::Error),

    #[error("nvram chunk out of range: offset {offset} len {len} capacity {capacity}")]
    NvramRange {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    #[error("key template does not describe an RSA key")]
    NotRsa,

    #[error("unexpected public area encoding: {0}")]
    Encoding(String),

    #[error("policy session closed before use")]
    PolicySessionClosed,

    #[error("tpm operation failed: {0}")]
    Operation(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
