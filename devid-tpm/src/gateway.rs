//! The TPM gateway: the one place this system talks to a physical or
//! simulated TPM. Every other crate in this workspace that needs a TPM
//! operation goes through here rather than touching `tss_esapi::Context`
//! directly, the same separation the attestation-agent/provider split in
//! this codebase's ancestry already drew between "talks to the TPM" and
//! "everything else."

use std::str::FromStr;

use devid_protocol::codec::SigningRequest;
use sha2::Digest as _;
use tss_esapi::handles::KeyHandle;
use tss_esapi::interface_types::algorithm::{HashingAlgorithm, SignatureSchemeAlgorithm};
use tss_esapi::interface_types::resource_handles::Hierarchy;
use tss_esapi::structures::{Data, Digest, SignatureScheme};
use tss_esapi::tcti_ldr::TctiNameConf;
use tss_esapi::Context;

use crate::convert::public_to_wire;
use crate::error::{GatewayError, Result};
use crate::policy::PolicySession;
use crate::resources::RequestResources;
use crate::templates;

pub struct TpmGateway {
    ctx: Context,
}

/// The transient handles produced by [`TpmGateway::create_signing_request`],
/// broken out individually because the DevID and endorsement handles are
/// needed again once the server's challenge comes back, well after the
/// request that created them has been sent and `RequestResources` would
/// otherwise be the only remaining handle to them.
pub struct SigningHandles {
    pub ek_handle: KeyHandle,
    pub ak_handle: KeyHandle,
    pub devid_handle: KeyHandle,
}

impl TpmGateway {
    pub fn open(device: &str) -> Result<Self> {
        let tcti = TctiNameConf::from_str(&format!("device:{device}"))
            .map_err(|e| GatewayError::DeviceOpen(e.to_string()))?;
        let ctx = Context::new(tcti).map_err(|e| GatewayError::DeviceOpen(e.to_string()))?;
        Ok(Self { ctx })
    }

    /// Reads the manufacturer-provisioned endorsement certificate and
    /// endorsement key public area, creates a fresh attestation key and
    /// DevID key under a freshly created storage root key, has the
    /// attestation key certify the DevID key, and returns the assembled
    /// signing request together with the still-live transient handles the
    /// caller must flush once the request has been sent.
    pub fn create_signing_request(
        &mut self,
        ek_certificate_der: Vec<u8>,
    ) -> Result<(SigningRequest, SigningHandles, RequestResources)> {
        let mut resources = RequestResources::new();

        let srk_template = templates::srk_template()?;
        let srk_handle = self
            .ctx
            .execute_with_nullauth_session(|ctx| {
                ctx.create_primary(Hierarchy::Owner, srk_template, None, None, None, None)
            })?
            .key_handle;
        resources.track(srk_handle);

        let ek_template = templates::ek_rsa_template()?;
        let ek_handle = self
            .ctx
            .execute_with_nullauth_session(|ctx| {
                ctx.create_primary(Hierarchy::Endorsement, ek_template, None, None, None, None)
            })?
            .key_handle;
        resources.track(ek_handle);
        let (ek_public, _, _) = self
            .ctx
            .execute_with_nullauth_session(|ctx| ctx.read_public(ek_handle))?;

        let ak_template = templates::ak_rsa_template()?;
        let ak_create = self.ctx.execute_with_nullauth_session(|ctx| {
            ctx.create(srk_handle, ak_template, None, None, None, None)
        })?;
        let ak_handle = self.ctx.execute_with_nullauth_session(|ctx| {
            ctx.load(srk_handle, ak_create.out_private.clone(), ak_create.out_public.clone())
        })?;
        resources.track(ak_handle);
        let (ak_public, _, _) = self
            .ctx
            .execute_with_nullauth_session(|ctx| ctx.read_public(ak_handle))?;

        let devid_template = templates::devid_rsa_template()?;
        let devid_create = self.ctx.execute_with_nullauth_session(|ctx| {
            ctx.create(srk_handle, devid_template, None, None, None, None)
        })?;
        let devid_handle = self.ctx.execute_with_nullauth_session(|ctx| {
            ctx.load(
                srk_handle,
                devid_create.out_private.clone(),
                devid_create.out_public.clone(),
            )
        })?;
        resources.track(devid_handle);
        let (devid_public, _, _) = self
            .ctx
            .execute_with_nullauth_session(|ctx| ctx.read_public(devid_handle))?;

        let (attest, signature) = self.ctx.execute_with_nullauth_session(|ctx| {
            ctx.certify(
                devid_handle.into(),
                ak_handle,
                Data::default(),
                SignatureScheme::Null,
            )
        })?;

        let certify_info: Vec<u8> = attest.marshall()?;
        let certify_signature: Vec<u8> = signature.marshall()?;

        let request = SigningRequest {
            ek_certificate_der,
            ek_public: public_to_wire(&ek_public)?,
            ak_public: public_to_wire(&ak_public)?,
            devid_public: public_to_wire(&devid_public)?,
            certify_info,
            certify_signature,
            platform_identity_der: vec![0x30, 0x00], // empty RDNSequence; filled in by the caller
        };

        // The endorsement, attestation and DevID handles all need to outlive
        // this call (the AK is re-read when debugging a rejected request,
        // the EK and DevID handles are required again by `activate_credential`
        // once the server's challenge arrives), so they're released from the
        // guard here. The SRK handle has no further use and stays tracked,
        // so `resources` still flushes it once the caller is done.
        resources.release(ek_handle);
        resources.release(ak_handle);
        resources.release(devid_handle);

        let handles = SigningHandles {
            ek_handle,
            ak_handle,
            devid_handle,
        };

        Ok((request, handles, resources))
    }

    /// Recovers the nonce embedded in a `MakeCredential` challenge by
    /// running `ActivateCredential` under a policy session authorized
    /// against the endorsement hierarchy, exactly the sequence a client
    /// must run to prove it holds both the DevID key and the endorsement
    /// key's private half.
    pub fn activate_credential(
        &mut self,
        activate_handle: KeyHandle,
        ek_handle: KeyHandle,
        credential_blob: Vec<u8>,
        secret: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let policy_session = PolicySession::open(&mut self.ctx)?;
        let policy_handle = policy_session.handle()?;

        let result = self.ctx.execute_with_sessions(
            (
                Some(tss_esapi::interface_types::session_handles::AuthSession::Password),
                Some(policy_handle.into()),
                None,
            ),
            |ctx| {
                ctx.activate_credential(
                    activate_handle,
                    ek_handle,
                    credential_blob.try_into()?,
                    secret.try_into()?,
                )
            },
        );

        policy_session.close(&mut self.ctx)?;
        let digest = result?;
        Ok(digest.to_vec())
    }

    /// Signs the SHA-256 digest of `message` with the DevID key, producing
    /// the self-signature a server verifies against the DevID public key
    /// before trusting anything else in the request. The DevID key is
    /// unrestricted, so no hash-sequence validation ticket is needed.
    pub fn sign_with_devid(&mut self, devid_handle: KeyHandle, message: &[u8]) -> Result<Vec<u8>> {
        let message_digest = sha2::Sha256::digest(message);
        let scheme = SignatureScheme::create(SignatureSchemeAlgorithm::RsaSsa, HashingAlgorithm::Sha256)
            .map_err(|e| GatewayError::Operation(e.to_string()))?;
        let tpm_digest = Digest::try_from(message_digest.as_slice())
            .map_err(|e| GatewayError::Operation(e.to_string()))?;

        let signature = self
            .ctx
            .execute_with_nullauth_session(|ctx| ctx.sign(devid_handle, tpm_digest.clone(), scheme, None))?;

        Ok(signature.marshall()?)
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }
}
