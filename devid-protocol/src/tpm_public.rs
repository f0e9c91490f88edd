//! A minimal `TPM2B_PUBLIC`-shaped structure for RSA keys: just enough of
//! the TCG public-area encoding to compute a key's `Name`, read its
//! attribute flags, and recover an `rsa::RsaPublicKey` from it. This is the
//! structure every field of a signing request ultimately bottoms out in.

use rsa::{BigUint, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::CodecError;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObjectAttributes: u32 {
        const FIXED_TPM             = 1 << 1;
        const FIXED_PARENT          = 1 << 4;
        const SENSITIVE_DATA_ORIGIN = 1 << 5;
        const USER_WITH_AUTH        = 1 << 6;
        const ADMIN_WITH_POLICY     = 1 << 7;
        const RESTRICTED            = 1 << 16;
        const DECRYPT               = 1 << 17;
        const SIGN_ENCRYPT          = 1 << 18;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
}

impl HashAlgorithm {
    pub fn id(self) -> u16 {
        match self {
            HashAlgorithm::Sha256 => 0x000B,
        }
    }

    pub fn from_id(id: u16) -> Result<Self, CodecError> {
        match id {
            0x000B => Ok(HashAlgorithm::Sha256),
            other => Err(CodecError::InvalidPublicArea(format!(
                "unsupported name algorithm id {other:#06x}"
            ))),
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymmetricParams {
    pub algorithm_id: u16,
    pub key_bits: u16,
    pub mode_id: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaParameters {
    pub modulus: Vec<u8>,
    pub exponent: u32,
    /// Present only on storage/endorsement keys; `None` for signing-only
    /// keys such as the AK and DevID key.
    pub symmetric: Option<SymmetricParams>,
}

/// One TPM public area: the algorithm-independent header plus RSA
/// parameters. Only RSA is modeled; the challenge engine treats any other
/// algorithm as unsupported, matching the protocol's RSA-only scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmPublic {
    pub name_alg: HashAlgorithm,
    pub attributes: ObjectAttributes,
    pub rsa: RsaParameters,
}

const RSA_ALG_ID: u16 = 0x0001;
const NULL_SCHEME_ID: u16 = 0x0010;
const RSASSA_SCHEME_ID: u16 = 0x0014;
const SYM_AES_ID: u16 = 0x0006;
const SYM_NULL_ID: u16 = 0x0010;
const CFB_MODE_ID: u16 = 0x0043;

impl TpmPublic {
    /// `Name = nameAlg || H(publicArea)`, the identifier the TCG attestation
    /// structures use to refer to a key without embedding its full public
    /// area.
    pub fn name(&self) -> Result<Vec<u8>, CodecError> {
        let encoded = self.encode_public_area()?;
        let digest = self.name_alg.digest(&encoded);
        let mut name = Vec::with_capacity(2 + digest.len());
        name.extend_from_slice(&self.name_alg.id().to_be_bytes());
        name.extend_from_slice(&digest);
        Ok(name)
    }

    pub fn key(&self) -> Result<RsaPublicKey, CodecError> {
        let n = BigUint::from_bytes_be(&self.rsa.modulus);
        let e = BigUint::from(self.rsa.exponent);
        RsaPublicKey::new(n, e)
            .map_err(|err| CodecError::InvalidPublicArea(format!("bad RSA key: {err}")))
    }

    pub fn is_restricted(&self) -> bool {
        self.attributes.contains(ObjectAttributes::RESTRICTED)
    }

    pub fn is_decrypt(&self) -> bool {
        self.attributes.contains(ObjectAttributes::DECRYPT)
    }

    pub fn is_sign(&self) -> bool {
        self.attributes.contains(ObjectAttributes::SIGN_ENCRYPT)
    }

    pub fn is_fixed_tpm(&self) -> bool {
        self.attributes.contains(ObjectAttributes::FIXED_TPM)
    }

    pub fn is_fixed_parent(&self) -> bool {
        self.attributes.contains(ObjectAttributes::FIXED_PARENT)
    }

    /// Serializes just the `TPMT_PUBLIC` body (no outer `TPM2B` size
    /// prefix); callers that need the `TPM2B_PUBLIC` wrapper add the prefix
    /// themselves, matching how the rest of the codec length-prefixes
    /// fields uniformly instead of baking the prefix into every type.
    pub fn encode_public_area(&self) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        out.extend_from_slice(&RSA_ALG_ID.to_be_bytes());
        out.extend_from_slice(&self.name_alg.id().to_be_bytes());
        out.extend_from_slice(&self.attributes.bits().to_be_bytes());
        // authPolicy left empty; this system never relies on it.
        out.extend_from_slice(&0u16.to_be_bytes());

        match &self.rsa.symmetric {
            Some(sym) => {
                out.extend_from_slice(&sym.algorithm_id.to_be_bytes());
                out.extend_from_slice(&sym.key_bits.to_be_bytes());
                out.extend_from_slice(&sym.mode_id.to_be_bytes());
            }
            None => out.extend_from_slice(&SYM_NULL_ID.to_be_bytes()),
        }
        let scheme_id = if self.is_sign() {
            RSASSA_SCHEME_ID
        } else {
            NULL_SCHEME_ID
        };
        out.extend_from_slice(&scheme_id.to_be_bytes());
        if scheme_id == RSASSA_SCHEME_ID {
            out.extend_from_slice(&HashAlgorithm::Sha256.id().to_be_bytes());
        }
        let key_bits = (self.rsa.modulus.len() * 8) as u16;
        out.extend_from_slice(&key_bits.to_be_bytes());
        out.extend_from_slice(&self.rsa.exponent.to_be_bytes());
        out.extend_from_slice(&(self.rsa.modulus.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.rsa.modulus);
        Ok(out)
    }

    pub fn decode_public_area(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut cur = Cursor::new(bytes);
        let alg_id = cur.take_u16()?;
        if alg_id != RSA_ALG_ID {
            return Err(CodecError::InvalidPublicArea(format!(
                "unsupported public algorithm id {alg_id:#06x}"
            )));
        }
        let name_alg = HashAlgorithm::from_id(cur.take_u16()?)?;
        let attributes = ObjectAttributes::from_bits_truncate(cur.take_u32()?);
        let auth_policy_len = cur.take_u16()? as usize;
        cur.take_bytes(auth_policy_len)?;

        let sym_alg = cur.take_u16()?;
        let symmetric = if sym_alg == SYM_NULL_ID {
            None
        } else {
            let key_bits = cur.take_u16()?;
            let mode_id = cur.take_u16()?;
            Some(SymmetricParams {
                algorithm_id: sym_alg,
                key_bits,
                mode_id,
            })
        };

        let scheme_id = cur.take_u16()?;
        if scheme_id == RSASSA_SCHEME_ID {
            let _hash_alg = cur.take_u16()?;
        }
        let _key_bits = cur.take_u16()?;
        let exponent_raw = cur.take_u32()?;
        let exponent = if exponent_raw == 0 { 65537 } else { exponent_raw };
        let modulus_len = cur.take_u16()? as usize;
        let modulus = cur.take_bytes(modulus_len)?.to_vec();

        cur.finish()?;

        Ok(TpmPublic {
            name_alg,
            attributes,
            rsa: RsaParameters {
                modulus,
                exponent,
                symmetric,
            },
        })
    }
}

/// A small cursor over a byte slice that errors instead of panicking on a
/// short read, used by every fixed-layout decoder in this crate.
pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn take_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.pos + n > self.data.len() {
            return Err(CodecError::Truncated);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn take_u16(&mut self) -> Result<u16, CodecError> {
        let b = self.take_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn take_u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn take_len_prefixed(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.take_u16()? as usize;
        self.take_bytes(len)
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Errors if any bytes remain unconsumed.
    pub fn finish(&self) -> Result<(), CodecError> {
        if self.pos != self.data.len() {
            return Err(CodecError::TrailingBytes);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TpmPublic {
        TpmPublic {
            name_alg: HashAlgorithm::Sha256,
            attributes: ObjectAttributes::FIXED_TPM
                | ObjectAttributes::FIXED_PARENT
                | ObjectAttributes::SIGN_ENCRYPT,
            rsa: RsaParameters {
                modulus: vec![0xAB; 256],
                exponent: 65537,
                symmetric: None,
            },
        }
    }

    #[test]
    fn public_area_round_trips() {
        let original = sample();
        let encoded = original.encode_public_area().unwrap();
        let decoded = TpmPublic::decode_public_area(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn name_is_alg_id_then_digest_of_public_area() {
        let pub_area = sample();
        let name = pub_area.name().unwrap();
        assert_eq!(&name[0..2], &HashAlgorithm::Sha256.id().to_be_bytes());
        assert_eq!(name.len(), 2 + 32);
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let original = sample();
        let mut encoded = original.encode_public_area().unwrap();
        encoded.push(0xFF);
        assert_eq!(
            TpmPublic::decode_public_area(&encoded).unwrap_err(),
            CodecError::TrailingBytes
        );
    }

    #[test]
    fn decode_rejects_truncation() {
        let original = sample();
        let encoded = original.encode_public_area().unwrap();
        let truncated = &encoded[..encoded.len() - 10];
        assert_eq!(
            TpmPublic::decode_public_area(truncated).unwrap_err(),
            CodecError::Truncated
        );
    }

    #[test]
    fn symmetric_field_round_trips_for_storage_keys() {
        let mut original = sample();
        original.attributes = ObjectAttributes::FIXED_TPM
            | ObjectAttributes::FIXED_PARENT
            | ObjectAttributes::DECRYPT
            | ObjectAttributes::RESTRICTED;
        original.rsa.symmetric = Some(SymmetricParams {
            algorithm_id: SYM_AES_ID,
            key_bits: 128,
            mode_id: CFB_MODE_ID,
        });
        let encoded = original.encode_public_area().unwrap();
        let decoded = TpmPublic::decode_public_area(&encoded).unwrap();
        assert_eq!(original, decoded);
    }
}
