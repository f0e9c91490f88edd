//! Issues the DevID X.509 certificate once a signing request has cleared
//! verification and challenge response. The subject is built from the
//! request's platform identity; an empty identity gets a critical
//! subject-alternative-name instead, matching how this system has always
//! decided whether the SAN needs to stand in for an absent subject.

use devid_protocol::codec::SigningRequest;
use num_bigint_dig::BigUint;
use picky_asn1_x509::{AttributeTypeAndValue, Name};
use rcgen::{
    CertificateParams, CustomExtension, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SerialNumber, SubjectPublicKeyInfo,
};
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use rustls_pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::error::IssuanceError;

/// TCG "TPM Key Certificate" extended key usage: 2.23.133.11.1.2.
const TCG_DEVID_EKU: &[u64] = &[2, 23, 133, 11, 1, 2];

pub fn issue_devid_certificate(
    req: &SigningRequest,
    provider_ca_der: &[u8],
    provider_key: &RsaPrivateKey,
) -> Result<Vec<u8>, IssuanceError> {
    let devid_encoded = req.devid_public.encode_public_area()?;
    let digest = Sha256::digest(&devid_encoded);
    let serial = BigUint::from_bytes_be(&digest);

    let platform_identity = req.platform_identity()?;
    let subject_is_empty = rdn_sequence_is_empty(&platform_identity);

    let mut params = CertificateParams::new(Vec::new())
        .map_err(|e| IssuanceError::Signing(e.to_string()))?;
    params.distinguished_name = build_distinguished_name(&platform_identity, subject_is_empty);
    params.serial_number = Some(SerialNumber::from_slice(&serial.to_bytes_be()));
    let not_before = OffsetDateTime::now_utc();
    params.not_before = not_before;
    params.not_after = not_before + Duration::days(365);
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::Other(TCG_DEVID_EKU.to_vec())];
    params.custom_extensions.push(devid_san_from_ek_certificate(
        subject_is_empty,
        &req.ek_certificate_der,
    )?);

    let devid_public_key = req
        .devid_public
        .key()
        .map_err(|e| IssuanceError::Signing(e.to_string()))?;
    // The DevID private key never leaves the TPM, so the subject here is a
    // public-key-only `KeyPair` — rcgen signs the TBS structure with the
    // issuer's key while certifying this public key, not the other way
    // around.
    let subject_key_pair = SubjectPublicKeyInfo::from_der(&rsa_public_key_to_der(&devid_public_key)?)
        .map_err(|e| IssuanceError::Signing(e.to_string()))?;

    let issuer_key_der = provider_key
        .to_pkcs8_der()
        .map_err(|e| IssuanceError::Signing(e.to_string()))?;
    let issuer_key_pair = KeyPair::from_pkcs8_der_and_sign_algo(
        &PrivatePkcs8KeyDer::from(issuer_key_der.as_bytes()),
        &rcgen::PKCS_RSA_SHA256,
    )
    .map_err(|e| IssuanceError::Signing(e.to_string()))?;
    let issuer_params = CertificateParams::from_ca_cert_der(&CertificateDer::from(provider_ca_der))
        .map_err(|e| IssuanceError::Signing(e.to_string()))?;
    let issuer = issuer_params
        .self_signed(&issuer_key_pair)
        .map_err(|e| IssuanceError::Signing(e.to_string()))?;

    let cert = params
        .signed_by(&subject_key_pair, &issuer, &issuer_key_pair)
        .map_err(|e| IssuanceError::Signing(e.to_string()))?;

    Ok(cert.der().to_vec())
}

fn rsa_public_key_to_der(key: &rsa::RsaPublicKey) -> Result<Vec<u8>, IssuanceError> {
    use rsa::pkcs8::EncodePublicKey;
    key.to_public_key_der()
        .map(|der| der.as_bytes().to_vec())
        .map_err(|e| IssuanceError::Signing(e.to_string()))
}

/// Treats an absent configured set of extra RDN attributes as a no-op: the
/// subject is exactly the platform identity the request carried, nothing
/// appended.
fn build_distinguished_name(name: &Name, subject_is_empty: bool) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    if subject_is_empty {
        return dn;
    }
    for rdn in name.0.iter() {
        for atv in rdn.0.iter() {
            if let Some((dn_type, value)) = attribute_to_dn(atv) {
                dn.push(dn_type, value);
            }
        }
    }
    dn
}

fn attribute_to_dn(atv: &AttributeTypeAndValue) -> Option<(DnType, String)> {
    use picky_asn1_x509::AttributeTypeAndValueParameters;

    let value = match &atv.value {
        AttributeTypeAndValueParameters::CommonName(s)
        | AttributeTypeAndValueParameters::OrganizationName(s)
        | AttributeTypeAndValueParameters::OrganizationalUnitName(s)
        | AttributeTypeAndValueParameters::CountryName(s) => s.to_utf8_lossy().into_owned(),
        _ => return None,
    };
    let oid: String = atv.ty.0.clone().into();
    // 2.5.4.3 = CN, 2.5.4.10 = O, 2.5.4.11 = OU, 2.5.4.6 = C
    match oid.as_str() {
        "2.5.4.3" => Some((DnType::CommonName, value)),
        "2.5.4.10" => Some((DnType::OrganizationName, value)),
        "2.5.4.11" => Some((DnType::OrganizationalUnitName, value)),
        "2.5.4.6" => Some((DnType::CountryName, value)),
        _ => None,
    }
}

fn rdn_sequence_is_empty(name: &Name) -> bool {
    name.0.is_empty()
}

/// Copies the manufacturer/model `DirectoryName` out of the endorsement
/// certificate's subject alternative name into a new SAN extension, marked
/// critical exactly when the DevID subject itself is empty (so the
/// certificate always carries at least one identifying name).
fn devid_san_from_ek_certificate(
    subject_is_empty: bool,
    ek_certificate_der: &[u8],
) -> Result<CustomExtension, IssuanceError> {
    let (_, ek_cert) = X509Certificate::from_der(ek_certificate_der)
        .map_err(|e| IssuanceError::Signing(e.to_string()))?;

    let san_der = ek_cert
        .extensions()
        .iter()
        .find(|ext| ext.oid.to_string() == "2.5.29.17")
        .map(|ext| ext.value.to_vec())
        .unwrap_or_default();

    let mut ext = CustomExtension::from_oid_content(&[2, 5, 29, 17], san_der);
    ext.set_criticality(subject_is_empty);
    Ok(ext)
}
