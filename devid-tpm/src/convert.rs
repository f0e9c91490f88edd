//! Translates between `tss-esapi`'s `Public` structure and this system's
//! wire-level `TpmPublic`. Kept in one place so every caller that reads a
//! key off the device goes through the same mapping.

use devid_protocol::tpm_public::{
    HashAlgorithm, ObjectAttributes as WireAttributes, RsaParameters, SymmetricParams, TpmPublic,
};
use tss_esapi::interface_types::algorithm::HashingAlgorithm;
use tss_esapi::structures::{Public, PublicRsaParameters};

use crate::error::{GatewayError, Result};

pub fn public_to_wire(public: &Public) -> Result<TpmPublic> {
    match public {
        Public::Rsa {
            object_attributes,
            name_hashing_algorithm,
            parameters,
            unique,
            ..
        } => {
            let name_alg = match name_hashing_algorithm {
                HashingAlgorithm::Sha256 => HashAlgorithm::Sha256,
                other => {
                    return Err(GatewayError::Encoding(format!(
                        "unsupported name algorithm {other:?}"
                    )))
                }
            };

            let mut attrs = WireAttributes::empty();
            if object_attributes.fixed_tpm() {
                attrs |= WireAttributes::FIXED_TPM;
            }
            if object_attributes.fixed_parent() {
                attrs |= WireAttributes::FIXED_PARENT;
            }
            if object_attributes.sensitive_data_origin() {
                attrs |= WireAttributes::SENSITIVE_DATA_ORIGIN;
            }
            if object_attributes.user_with_auth() {
                attrs |= WireAttributes::USER_WITH_AUTH;
            }
            if object_attributes.admin_with_policy() {
                attrs |= WireAttributes::ADMIN_WITH_POLICY;
            }
            if object_attributes.restricted() {
                attrs |= WireAttributes::RESTRICTED;
            }
            if object_attributes.decrypt() {
                attrs |= WireAttributes::DECRYPT;
            }
            if object_attributes.sign_encrypt() {
                attrs |= WireAttributes::SIGN_ENCRYPT;
            }

            let rsa = rsa_parameters(parameters, unique.value())?;

            Ok(TpmPublic {
                name_alg,
                attributes: attrs,
                rsa,
            })
        }
        _ => Err(GatewayError::NotRsa),
    }
}

fn rsa_parameters(parameters: &PublicRsaParameters, modulus: &[u8]) -> Result<RsaParameters> {
    let exponent = {
        let e: u32 = parameters.exponent().value();
        if e == 0 {
            65537
        } else {
            e
        }
    };

    let symmetric = parameters.symmetric().and_then(|sym| {
        Some(SymmetricParams {
            algorithm_id: sym.algorithm_id(),
            key_bits: sym.key_bits_value()?,
            mode_id: sym.mode_id()?,
        })
    });

    Ok(RsaParameters {
        modulus: modulus.to_vec(),
        exponent,
        symmetric,
    })
}
