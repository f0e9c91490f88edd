//! The TCG "credential protection" primitive behind `MakeCredential`: wrap a
//! secret so that only the TPM holding the named key's private half, acting
//! through `ActivateCredential`, can recover it.
//!
//! No published crate implements this; it is reconstructed here directly
//! from the TCG algorithm (seed generation, `KDFa`-derived symmetric and
//! HMAC keys, AES-CFB encryption of the credential, RSA-OAEP wrapping of the
//! seed to the endorsement key, `label = "IDENTITY\0"`).

use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use hmac::digest::OutputSizeUser;
use hmac::{Hmac, Mac};
use rand::RngCore;
use rsa::{Oaep, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::ChallengeError;

type Aes128CfbEnc = cfb_mode::Encryptor<aes::Aes128>;
type HmacSha256 = Hmac<Sha256>;

const SEED_SIZE: usize = 32;

/// `KDFa` per the TCG key-derivation algorithm: counter-mode HMAC with the
/// counter, label, a zero byte, contexts, and the requested bit length all
/// folded into each block.
fn kdfa(key: &[u8], label: &str, context_u: &[u8], context_v: &[u8], bits: u32) -> Vec<u8> {
    let bytes_needed = ((bits + 7) / 8) as usize;
    let mut out = Vec::with_capacity(bytes_needed + HmacSha256::output_size());
    let mut counter: u32 = 1;
    while out.len() < bytes_needed {
        let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
        mac.update(&counter.to_be_bytes());
        mac.update(label.as_bytes());
        mac.update(&[0u8]);
        mac.update(context_u);
        mac.update(context_v);
        mac.update(&bits.to_be_bytes());
        out.extend_from_slice(&mac.finalize().into_bytes());
        counter += 1;
    }
    out.truncate(bytes_needed);
    out
}

fn tpm2b(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + bytes.len());
    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    out.extend_from_slice(bytes);
    out
}

/// Produces `(credentialBlob, encryptedSecret)`, each still wrapped in its
/// outer `TPM2B` size prefix. Callers that need the bare inner bytes (as
/// this protocol's wire format does) strip the first two bytes of each.
pub fn generate(
    name: &[u8],
    ek_public_key: &RsaPublicKey,
    sym_key_bits: usize,
    secret: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), ChallengeError> {
    let mut rng = rand::thread_rng();
    let mut seed = vec![0u8; SEED_SIZE];
    rng.fill_bytes(&mut seed);

    let sym_key = kdfa(&seed, "STORAGE", name, &[], sym_key_bits as u32);
    if sym_key.len() != 16 {
        return Err(ChallengeError::Activation(
            "only 128-bit symmetric keys are supported".into(),
        ));
    }

    let credential = tpm2b(secret);
    let iv = [0u8; 16];
    let mut enc_identity = credential;
    Aes128CfbEnc::new(sym_key.as_slice().into(), &iv.into()).encrypt(&mut enc_identity);

    let hmac_key = kdfa(&seed, "INTEGRITY", &[], &[], (<Sha256 as Digest>::output_size() * 8) as u32);
    let mut mac = HmacSha256::new_from_slice(&hmac_key)
        .map_err(|e| ChallengeError::Activation(e.to_string()))?;
    mac.update(&enc_identity);
    mac.update(name);
    let integrity = mac.finalize().into_bytes().to_vec();

    let mut id_object = Vec::new();
    id_object.extend_from_slice(&tpm2b(&integrity));
    id_object.extend_from_slice(&enc_identity);
    let blob = tpm2b(&id_object);

    let padding = Oaep::new_with_label::<Sha256, _>("IDENTITY\0");
    let encrypted_seed = ek_public_key
        .encrypt(&mut rng, padding, &seed)
        .map_err(|e| ChallengeError::Activation(e.to_string()))?;
    let wrapped_secret = tpm2b(&encrypted_seed);

    Ok((blob, wrapped_secret))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::RsaPrivateKey;

    #[test]
    fn generate_produces_nonempty_length_prefixed_outputs() {
        let mut rng = rand::thread_rng();
        let priv_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let pub_key = priv_key.to_public_key();

        let (blob, secret) = generate(b"test-name", &pub_key, 128, &[1; 32]).unwrap();
        let blob_inner_len = u16::from_be_bytes([blob[0], blob[1]]) as usize;
        assert_eq!(blob_inner_len, blob.len() - 2);

        let secret_inner_len = u16::from_be_bytes([secret[0], secret[1]]) as usize;
        assert_eq!(secret_inner_len, secret.len() - 2);
        assert_eq!(secret_inner_len, 256); // RSA-2048 OAEP ciphertext size
    }

    #[test]
    fn rejects_non_128_bit_symmetric_key() {
        let mut rng = rand::thread_rng();
        let priv_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let pub_key = priv_key.to_public_key();
        assert!(generate(b"name", &pub_key, 256, &[0; 32]).is_err());
    }
}
