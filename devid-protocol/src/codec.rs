//! Binary encoding of a TCG-CSR-IDEVID signing request: seven
//! length-prefixed fields, each a `u16` big-endian length followed by that
//! many bytes, in a fixed order. `to_bytes`/`from_bytes` round-trip exactly;
//! `from_bytes` rejects any input with bytes left over after the last
//! field, since a stray trailer almost always means the caller is decoding
//! against the wrong schema version rather than tolerating forward
//! compatibility that does not exist here.

use picky_asn1_x509::Name;

use crate::error::CodecError;
use crate::tpm_public::{Cursor, TpmPublic};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningRequest {
    pub ek_certificate_der: Vec<u8>,
    pub ek_public: TpmPublic,
    pub ak_public: TpmPublic,
    pub devid_public: TpmPublic,
    pub certify_info: Vec<u8>,
    pub certify_signature: Vec<u8>,
    pub platform_identity_der: Vec<u8>,
}

impl SigningRequest {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let ek_public = self.ek_public.encode_public_area()?;
        let ak_public = self.ak_public.encode_public_area()?;
        let devid_public = self.devid_public.encode_public_area()?;

        let mut out = Vec::new();
        write_field(&mut out, &self.ek_certificate_der)?;
        write_field(&mut out, &ek_public)?;
        write_field(&mut out, &ak_public)?;
        write_field(&mut out, &devid_public)?;
        write_field(&mut out, &self.certify_info)?;
        write_field(&mut out, &self.certify_signature)?;
        write_field(&mut out, &self.platform_identity_der)?;
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut cur = Cursor::new(bytes);
        let ek_certificate_der = cur.take_len_prefixed()?.to_vec();
        let ek_public = TpmPublic::decode_public_area(cur.take_len_prefixed()?)?;
        let ak_public = TpmPublic::decode_public_area(cur.take_len_prefixed()?)?;
        let devid_public = TpmPublic::decode_public_area(cur.take_len_prefixed()?)?;
        let certify_info = cur.take_len_prefixed()?.to_vec();
        let certify_signature = cur.take_len_prefixed()?.to_vec();
        let platform_identity_der = cur.take_len_prefixed()?.to_vec();
        cur.finish()?;

        Ok(SigningRequest {
            ek_certificate_der,
            ek_public,
            ak_public,
            devid_public,
            certify_info,
            certify_signature,
            platform_identity_der,
        })
    }

    /// Parses the platform identity field into an ASN.1 RDN sequence. Kept
    /// separate from decoding so a request with an unparseable (but
    /// well-formed length-prefixed) identity field can still be rejected by
    /// the verifier with a specific error rather than failing the whole
    /// decode.
    pub fn platform_identity(&self) -> Result<Name, CodecError> {
        picky_asn1_der::from_bytes(&self.platform_identity_der)
            .map_err(|e| CodecError::Asn1(e.to_string()))
    }
}

fn write_field(out: &mut Vec<u8>, field: &[u8]) -> Result<(), CodecError> {
    let len: u16 = field
        .len()
        .try_into()
        .map_err(|_| CodecError::InvalidPublicArea("field exceeds 64KiB".into()))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(field);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpm_public::{HashAlgorithm, ObjectAttributes, RsaParameters};

    fn sample_public(attrs: ObjectAttributes) -> TpmPublic {
        TpmPublic {
            name_alg: HashAlgorithm::Sha256,
            attributes: attrs,
            rsa: RsaParameters {
                modulus: vec![0x42; 256],
                exponent: 65537,
                symmetric: None,
            },
        }
    }

    fn sample_request() -> SigningRequest {
        SigningRequest {
            ek_certificate_der: vec![0x30, 0x03, 0x02, 0x01, 0x00],
            ek_public: sample_public(
                ObjectAttributes::FIXED_TPM
                    | ObjectAttributes::FIXED_PARENT
                    | ObjectAttributes::RESTRICTED
                    | ObjectAttributes::DECRYPT,
            ),
            ak_public: sample_public(
                ObjectAttributes::FIXED_TPM
                    | ObjectAttributes::FIXED_PARENT
                    | ObjectAttributes::RESTRICTED
                    | ObjectAttributes::SIGN_ENCRYPT,
            ),
            devid_public: sample_public(
                ObjectAttributes::FIXED_TPM
                    | ObjectAttributes::FIXED_PARENT
                    | ObjectAttributes::SIGN_ENCRYPT,
            ),
            certify_info: vec![1, 2, 3, 4],
            certify_signature: vec![5, 6, 7, 8, 9],
            platform_identity_der: vec![0x30, 0x00],
        }
    }

    #[test]
    fn signing_request_round_trips() {
        let original = sample_request();
        let encoded = original.to_bytes().unwrap();
        let decoded = SigningRequest::from_bytes(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn from_bytes_rejects_trailing_bytes() {
        let original = sample_request();
        let mut encoded = original.to_bytes().unwrap();
        encoded.push(0);
        assert_eq!(
            SigningRequest::from_bytes(&encoded).unwrap_err(),
            CodecError::TrailingBytes
        );
    }

    #[test]
    fn from_bytes_rejects_truncated_input() {
        let original = sample_request();
        let encoded = original.to_bytes().unwrap();
        let truncated = &encoded[..encoded.len() - 3];
        assert!(matches!(
            SigningRequest::from_bytes(truncated).unwrap_err(),
            CodecError::Truncated
        ));
    }

    #[test]
    fn field_order_is_ek_cert_then_three_publics_then_certify_then_identity() {
        let original = sample_request();
        let encoded = original.to_bytes().unwrap();
        let mut cur = Cursor::new(&encoded);
        assert_eq!(
            cur.take_len_prefixed().unwrap(),
            original.ek_certificate_der.as_slice()
        );
    }
}
