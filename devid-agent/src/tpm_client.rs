//! Builds the signing request and runs `ActivateCredential` on behalf of
//! the client side of the protocol. Thin wrapper around `devid_tpm`'s
//! gateway; the TCG wire format and verification logic it produces input
//! for live entirely in `devid_protocol`.

use anyhow::{Context, Result};
use devid_protocol::codec::SigningRequest;
use devid_tpm::{RequestResources, SigningHandles, TpmGateway};

pub struct DeviceSigningRequest {
    pub request: SigningRequest,
    pub handles: SigningHandles,
    pub resources: RequestResources,
}

pub fn create_raw_request(
    gateway: &mut TpmGateway,
    ek_certificate_der: Vec<u8>,
) -> Result<DeviceSigningRequest> {
    let (mut request, handles, resources) = gateway
        .create_signing_request(ek_certificate_der)
        .context("creating TPM signing request")?;
    // The platform identity RDN sequence is filled in by the caller once
    // the node's xname/type are known; an empty identity here is
    // intentional and matches the "subject may be empty" boundary case.
    request.platform_identity_der = vec![0x30, 0x00];
    Ok(DeviceSigningRequest {
        request,
        handles,
        resources,
    })
}

/// Signs the wire-encoded signing request with the DevID key. The server
/// verifies this against the DevID public key embedded in the same request
/// before trusting anything else in it.
pub fn sign_request(
    gateway: &mut TpmGateway,
    devid_handle: tss_esapi::handles::KeyHandle,
    encoded_request: &[u8],
) -> Result<Vec<u8>> {
    gateway
        .sign_with_devid(devid_handle, encoded_request)
        .context("signing request with DevID key")
}

pub fn generate_challenge_response(
    gateway: &mut TpmGateway,
    devid_handle: tss_esapi::handles::KeyHandle,
    ek_handle: tss_esapi::handles::KeyHandle,
    blob: Vec<u8>,
    secret: Vec<u8>,
) -> Result<Vec<u8>> {
    gateway
        .activate_credential(devid_handle, ek_handle, blob, secret)
        .context("activating credential")
}
