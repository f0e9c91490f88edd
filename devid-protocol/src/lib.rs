pub mod attest;
pub mod challenge;
pub mod codec;
pub mod credential_activation;
pub mod error;
pub mod tpm_public;
pub mod verify;

pub use codec::SigningRequest;
pub use error::{ChallengeError, CodecError, VerifyError};
pub use tpm_public::TpmPublic;
