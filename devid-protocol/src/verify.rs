//! The attestation verifier: four ordered checks, run in a fixed sequence
//! so the error a caller sees always names the first thing that actually
//! failed rather than some unrelated later stage.
//!
//! 1. The DevID key's signature over the raw request bytes verifies
//!    (proves whoever sent this request holds the DevID private key).
//! 2. The endorsement certificate chains to a trusted manufacturer root.
//! 3. The attestation key's signature over `CertifyInfo` verifies, and
//!    `CertifyInfo.name` names the DevID key (residency).
//! 4. Every key carries the attribute flags its role requires.

use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::sha2::Sha256;
use rsa::signature::Verifier;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::attest::parse_certify_info;
use crate::codec::SigningRequest;
use crate::error::VerifyError;
use crate::tpm_public::ObjectAttributes;

// DER content bytes (no tag/length) of the extension OIDs this check cares
// about.
const OID_SUBJECT_ALT_NAME: [u8; 3] = [0x55, 0x1D, 0x11]; // 2.5.29.17
const OID_BASIC_CONSTRAINTS: [u8; 3] = [0x55, 0x1D, 0x13]; // 2.5.29.19
const OID_KEY_USAGE: [u8; 3] = [0x55, 0x1D, 0x0F]; // 2.5.29.15
const OID_EXT_KEY_USAGE: [u8; 3] = [0x55, 0x1D, 0x25]; // 2.5.29.37

/// OID `2.5.29.17` (subjectAltName). Manufacturer EK certificates commonly
/// mark this extension critical while leaving it otherwise empty or
/// non-standard; RFC 5280 chain validation rejects unrecognized critical
/// extensions, so it is stripped from the unhandled-critical-extension set
/// before the chain walk, exactly as this check has always been special
/// cased.
fn is_subject_alt_name(oid_bytes: &[u8]) -> bool {
    oid_bytes == OID_SUBJECT_ALT_NAME
}

/// `raw_request` is the exact encoded bytes the caller signed (the wire
/// form of `req`); `sig` is the accompanying signature over those bytes
/// under the DevID key.
pub fn verify_request(
    req: &SigningRequest,
    raw_request: &[u8],
    sig: &[u8],
    manufacturer_roots: &[Vec<u8>],
) -> Result<(), VerifyError> {
    verify_self_signature(req, raw_request, sig)?;
    verify_endorsement_chain(req, manufacturer_roots)?;
    verify_residency(req)?;
    verify_key_attributes(req)?;
    Ok(())
}

/// Stage 1: `h = nameAlg(requestBytes)`, verified against the DevID public
/// key. Proves whoever sent this request holds the DevID private key,
/// before any of the more expensive TPM-structure checks run.
fn verify_self_signature(
    req: &SigningRequest,
    raw_request: &[u8],
    sig: &[u8],
) -> Result<(), VerifyError> {
    let devid_key = req
        .devid_public
        .key()
        .map_err(|_| VerifyError::BadSelfSignature)?;
    let verifying_key = VerifyingKey::<Sha256>::new(devid_key);
    let signature = Signature::try_from(sig).map_err(|_| VerifyError::BadSelfSignature)?;
    verifying_key
        .verify(raw_request, &signature)
        .map_err(|_| VerifyError::BadSelfSignature)
}

fn verify_endorsement_chain(
    req: &SigningRequest,
    manufacturer_roots: &[Vec<u8>],
) -> Result<(), VerifyError> {
    let (_, ek_cert) = X509Certificate::from_der(&req.ek_certificate_der)
        .map_err(|_| VerifyError::UntrustedEndorsementChain)?;

    let unhandled_critical: Vec<_> = ek_cert
        .extensions()
        .iter()
        .filter(|ext| ext.critical && !is_subject_alt_name(ext.oid.as_bytes()))
        .collect();
    // A critical extension this verifier doesn't understand (other than
    // SAN) means the certificate is asserting something it cannot confirm
    // is satisfied; treat that the same as a broken chain.
    if unhandled_critical
        .iter()
        .any(|ext| !is_known_extension(ext.oid.as_bytes()))
    {
        return Err(VerifyError::UntrustedEndorsementChain);
    }

    let roots: Vec<X509Certificate> = manufacturer_roots
        .iter()
        .filter_map(|der| X509Certificate::from_der(der).ok().map(|(_, c)| c))
        .collect();

    // Only a direct issuer relationship is supported: every manufacturer
    // root pool observed for this system signs EK certificates directly,
    // with no intermediate CA in between.
    let issuer = roots
        .iter()
        .find(|root| root.subject() == ek_cert.issuer())
        .ok_or(VerifyError::UntrustedEndorsementChain)?;

    ek_cert
        .verify_signature(Some(issuer.public_key()))
        .map_err(|_| VerifyError::UntrustedEndorsementChain)
}

fn is_known_extension(oid_bytes: &[u8]) -> bool {
    // basicConstraints, keyUsage, extKeyUsage -- the handful of extensions a
    // manufacturer EK certificate legitimately marks critical besides SAN.
    oid_bytes == OID_BASIC_CONSTRAINTS
        || oid_bytes == OID_KEY_USAGE
        || oid_bytes == OID_EXT_KEY_USAGE
}

/// Stage 3: the AK's signature over `certifyData` verifies, and the
/// `CertifyInfo.name` it attests to names the DevID key. The AK's own
/// residency is established transitively by the `ActivateCredential`
/// round-trip, not checked here.
fn verify_residency(req: &SigningRequest) -> Result<(), VerifyError> {
    let ak_key = req
        .ak_public
        .key()
        .map_err(|_| VerifyError::ResidencyMismatch)?;
    let verifying_key = VerifyingKey::<Sha256>::new(ak_key);
    let signature = Signature::try_from(req.certify_signature.as_slice())
        .map_err(|_| VerifyError::ResidencyMismatch)?;
    verifying_key
        .verify(&req.certify_info, &signature)
        .map_err(|_| VerifyError::ResidencyMismatch)?;

    let certify_info =
        parse_certify_info(&req.certify_info).map_err(|_| VerifyError::ResidencyMismatch)?;
    let devid_name = req
        .devid_public
        .name()
        .map_err(|_| VerifyError::ResidencyMismatch)?;
    if certify_info.name != devid_name {
        return Err(VerifyError::ResidencyMismatch);
    }
    Ok(())
}

fn verify_key_attributes(req: &SigningRequest) -> Result<(), VerifyError> {
    let ek = &req.ek_public;
    if !(ek.is_fixed_tpm() && ek.is_fixed_parent() && ek.is_restricted() && ek.is_decrypt()) {
        return Err(VerifyError::BadEndorsementKeyAttributes);
    }

    let ak = &req.ak_public;
    if !(ak.is_fixed_tpm() && ak.is_fixed_parent() && ak.is_restricted() && ak.is_sign()) {
        return Err(VerifyError::BadAttestationKeyAttributes);
    }

    let devid = &req.devid_public;
    if !(devid.is_fixed_tpm()
        && devid.is_fixed_parent()
        && devid.is_sign()
        && !devid.attributes.contains(ObjectAttributes::RESTRICTED))
    {
        return Err(VerifyError::BadDevIdKeyAttributes);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpm_public::{HashAlgorithm, RsaParameters, TpmPublic};
    use rsa::pkcs1v15::SigningKey;
    use rsa::signature::{SignatureEncoding, Signer};
    use rsa::{RsaPrivateKey, RsaPublicKey};

    fn rsa_keypair() -> (RsaPrivateKey, RsaPublicKey) {
        let mut rng = rand::thread_rng();
        let priv_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let pub_key = priv_key.to_public_key();
        (priv_key, pub_key)
    }

    fn public_from(key: &RsaPublicKey, attrs: ObjectAttributes) -> TpmPublic {
        TpmPublic {
            name_alg: HashAlgorithm::Sha256,
            attributes: attrs,
            rsa: RsaParameters {
                modulus: key.n().to_bytes_be(),
                exponent: 65537,
                symmetric: None,
            },
        }
    }

    fn build_certify_info(name: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&0xFF54_4347u32.to_be_bytes());
        out.extend_from_slice(&0x8017u16.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
        out.extend_from_slice(&[0u8; 17]);
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&(name.len() as u16).to_be_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&0u16.to_be_bytes());
        out
    }

    #[test]
    fn self_signature_fails_when_tampered() {
        let (devid_priv, devid_pub) = rsa_keypair();
        let devid_public = public_from(&devid_pub, ObjectAttributes::FIXED_TPM);

        let raw_request = b"signing-request-wire-bytes".to_vec();
        let signing_key = SigningKey::<Sha256>::new(devid_priv);
        let signature = signing_key.sign(&raw_request);

        let req = SigningRequest {
            ek_certificate_der: vec![],
            ek_public: devid_public.clone(),
            ak_public: devid_public.clone(),
            devid_public,
            certify_info: vec![],
            certify_signature: vec![],
            platform_identity_der: vec![0x30, 0x00],
        };

        let mut tampered = raw_request.clone();
        *tampered.last_mut().unwrap() ^= 0xFF;

        assert_eq!(
            verify_self_signature(&req, &tampered, &signature.to_vec()).unwrap_err(),
            VerifyError::BadSelfSignature
        );
    }

    #[test]
    fn residency_mismatch_detected() {
        let (ak_priv, ak_pub) = rsa_keypair();
        let (_, devid_pub) = rsa_keypair();
        let ak_public = public_from(&ak_pub, ObjectAttributes::FIXED_TPM);
        let devid_public = public_from(&devid_pub, ObjectAttributes::FIXED_TPM);
        let wrong_name = vec![0u8; 34];
        let certify_info = build_certify_info(&wrong_name);

        let signing_key = SigningKey::<Sha256>::new(ak_priv);
        let certify_signature = signing_key.sign(&certify_info).to_vec();

        let req = SigningRequest {
            ek_certificate_der: vec![],
            ek_public: ak_public.clone(),
            ak_public,
            devid_public,
            certify_info,
            certify_signature,
            platform_identity_der: vec![0x30, 0x00],
        };

        // The AK's signature over `certify_info` verifies; the name inside
        // it just doesn't match the DevID key, which is the case this test
        // exercises.
        assert_eq!(
            verify_residency(&req).unwrap_err(),
            VerifyError::ResidencyMismatch
        );
    }

    #[test]
    fn residency_rejects_bad_ak_signature() {
        let (_, ak_pub) = rsa_keypair();
        let (_, devid_pub) = rsa_keypair();
        let ak_public = public_from(&ak_pub, ObjectAttributes::FIXED_TPM);
        let devid_public = public_from(&devid_pub, ObjectAttributes::FIXED_TPM);
        let name = devid_public.name().unwrap();
        let certify_info = build_certify_info(&name);

        let req = SigningRequest {
            ek_certificate_der: vec![],
            ek_public: ak_public.clone(),
            ak_public,
            devid_public,
            certify_info,
            certify_signature: vec![0u8; 256],
            platform_identity_der: vec![0x30, 0x00],
        };

        assert_eq!(
            verify_residency(&req).unwrap_err(),
            VerifyError::ResidencyMismatch
        );
    }

    #[test]
    fn key_attribute_table_enforced() {
        let (_, key) = rsa_keypair();
        let devid_with_restricted = public_from(
            &key,
            ObjectAttributes::FIXED_TPM
                | ObjectAttributes::FIXED_PARENT
                | ObjectAttributes::SIGN_ENCRYPT
                | ObjectAttributes::RESTRICTED,
        );
        let good_ek = public_from(
            &key,
            ObjectAttributes::FIXED_TPM
                | ObjectAttributes::FIXED_PARENT
                | ObjectAttributes::RESTRICTED
                | ObjectAttributes::DECRYPT,
        );
        let good_ak = public_from(
            &key,
            ObjectAttributes::FIXED_TPM
                | ObjectAttributes::FIXED_PARENT
                | ObjectAttributes::RESTRICTED
                | ObjectAttributes::SIGN_ENCRYPT,
        );
        let req = SigningRequest {
            ek_certificate_der: vec![],
            ek_public: good_ek,
            ak_public: good_ak,
            devid_public: devid_with_restricted,
            certify_info: vec![],
            certify_signature: vec![],
            platform_identity_der: vec![0x30, 0x00],
        };
        assert_eq!(
            verify_key_attributes(&req).unwrap_err(),
            VerifyError::BadDevIdKeyAttributes
        );
    }
}
