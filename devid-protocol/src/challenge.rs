//! `MakeCredential`: build a proof-of-residency challenge for the DevID key
//! named in a signing request, wrapped to the endorsement key so only the
//! TPM that holds it can recover the nonce.

use rand::RngCore;

use crate::codec::SigningRequest;
use crate::credential_activation;
use crate::error::ChallengeError;

pub struct Challenge {
    pub blob: Vec<u8>,
    pub secret: Vec<u8>,
    pub nonce: Vec<u8>,
}

/// `symBlockSize` is the EK's symmetric key size in bits, read from the
/// request rather than assumed, so a non-RSA or non-symmetric EK (which
/// this protocol does not support) is rejected up front instead of failing
/// deep inside the credential-activation math.
pub fn make_credential(req: &SigningRequest) -> Result<Challenge, ChallengeError> {
    let symmetric = req
        .ek_public
        .rsa
        .symmetric
        .as_ref()
        .ok_or(ChallengeError::UnsupportedAlgorithm)?;

    let ek_key = req
        .ek_public
        .key()
        .map_err(|_| ChallengeError::UnsupportedAlgorithm)?;
    // The credential is sealed to the attestation key's Name, not the DevID
    // key's: the client recovers the nonce by calling ActivateCredential
    // with the AK handle, and the TPM folds the AK's Name into the
    // credential's integrity HMAC. Sealing to the wrong key's Name makes a
    // real TPM reject the activation with an integrity failure.
    let ak_name = req
        .ak_public
        .name()
        .map_err(|_| ChallengeError::UnsupportedAlgorithm)?;

    let mut nonce = vec![0u8; 32]; // SHA-256 digest size
    rand::thread_rng().fill_bytes(&mut nonce);

    let (blob, secret) = credential_activation::generate(
        &ak_name,
        &ek_key,
        symmetric.key_bits as usize,
        &nonce,
    )?;

    // Each output carries an outer TPM2B size prefix; the wire format
    // transmits only the inner bytes.
    Ok(Challenge {
        blob: blob[2..].to_vec(),
        secret: secret[2..].to_vec(),
        nonce,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpm_public::{HashAlgorithm, ObjectAttributes, RsaParameters, SymmetricParams, TpmPublic};
    use rsa::RsaPrivateKey;

    fn ek_public(symmetric: Option<SymmetricParams>) -> TpmPublic {
        let mut rng = rand::thread_rng();
        let priv_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let pub_key = priv_key.to_public_key();
        TpmPublic {
            name_alg: HashAlgorithm::Sha256,
            attributes: ObjectAttributes::FIXED_TPM
                | ObjectAttributes::FIXED_PARENT
                | ObjectAttributes::RESTRICTED
                | ObjectAttributes::DECRYPT,
            rsa: RsaParameters {
                modulus: pub_key.n().to_bytes_be(),
                exponent: 65537,
                symmetric,
            },
        }
    }

    fn devid_public() -> TpmPublic {
        let mut rng = rand::thread_rng();
        let priv_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let pub_key = priv_key.to_public_key();
        TpmPublic {
            name_alg: HashAlgorithm::Sha256,
            attributes: ObjectAttributes::FIXED_TPM
                | ObjectAttributes::FIXED_PARENT
                | ObjectAttributes::SIGN_ENCRYPT,
            rsa: RsaParameters {
                modulus: pub_key.n().to_bytes_be(),
                exponent: 65537,
                symmetric: None,
            },
        }
    }

    fn request_with(ek_public: TpmPublic) -> SigningRequest {
        SigningRequest {
            ek_certificate_der: vec![],
            ek_public,
            ak_public: devid_public(),
            devid_public: devid_public(),
            certify_info: vec![],
            certify_signature: vec![],
            platform_identity_der: vec![0x30, 0x00],
        }
    }

    #[test]
    fn make_credential_returns_32_byte_nonce() {
        let sym = SymmetricParams {
            algorithm_id: 0x0006,
            key_bits: 128,
            mode_id: 0x0043,
        };
        let req = request_with(ek_public(Some(sym)));
        let challenge = make_credential(&req).unwrap();
        assert_eq!(challenge.nonce.len(), 32);
        assert!(!challenge.blob.is_empty());
        assert!(!challenge.secret.is_empty());
    }

    #[test]
    fn make_credential_rejects_ek_without_symmetric_definition() {
        let req = request_with(ek_public(None));
        assert_eq!(
            make_credential(&req).unwrap_err(),
            ChallengeError::UnsupportedAlgorithm
        );
    }
}
