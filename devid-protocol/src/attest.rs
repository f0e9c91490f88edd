//! Minimal `TPMS_ATTEST` decoding, scoped to the one attestation kind this
//! protocol ever produces: `TPM_ST_ATTEST_CERTIFY`, the structure `Certify`
//! returns when one key vouches for another's residency.

use crate::error::CodecError;
use crate::tpm_public::Cursor;

const ATTEST_MAGIC: u32 = 0xFF54_4347;
const ST_ATTEST_CERTIFY: u16 = 0x8017;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertifyInfo {
    pub qualified_signer: Vec<u8>,
    pub extra_data: Vec<u8>,
    pub name: Vec<u8>,
    pub qualified_name: Vec<u8>,
}

pub fn parse_certify_info(bytes: &[u8]) -> Result<CertifyInfo, CodecError> {
    let mut cur = Cursor::new(bytes);
    let magic = cur.take_u32()?;
    if magic != ATTEST_MAGIC {
        return Err(CodecError::InvalidPublicArea(format!(
            "bad TPMS_ATTEST magic {magic:#010x}"
        )));
    }
    let attest_type = cur.take_u16()?;
    if attest_type != ST_ATTEST_CERTIFY {
        return Err(CodecError::InvalidPublicArea(format!(
            "expected TPM_ST_ATTEST_CERTIFY, got {attest_type:#06x}"
        )));
    }
    let qualified_signer = cur.take_len_prefixed()?.to_vec();
    let extra_data = cur.take_len_prefixed()?.to_vec();
    // clockInfo: clock(u64) resetCount(u32) restartCount(u32) safe(u8)
    cur.take_bytes(8 + 4 + 4 + 1)?;
    // firmwareVersion
    cur.take_bytes(8)?;
    let name = cur.take_len_prefixed()?.to_vec();
    let qualified_name = cur.take_len_prefixed()?.to_vec();
    cur.finish()?;

    Ok(CertifyInfo {
        qualified_signer,
        extra_data,
        name,
        qualified_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(name: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&ATTEST_MAGIC.to_be_bytes());
        out.extend_from_slice(&ST_ATTEST_CERTIFY.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes()); // qualifiedSigner
        out.extend_from_slice(&0u16.to_be_bytes()); // extraData
        out.extend_from_slice(&[0u8; 17]); // clockInfo
        out.extend_from_slice(&[0u8; 8]); // firmwareVersion
        out.extend_from_slice(&(name.len() as u16).to_be_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&0u16.to_be_bytes()); // qualifiedName
        out
    }

    #[test]
    fn parses_name_field() {
        let bytes = build(b"hello-name");
        let parsed = parse_certify_info(&bytes).unwrap();
        assert_eq!(parsed.name, b"hello-name");
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut bytes = build(b"x");
        bytes[0] = 0;
        assert!(parse_certify_info(&bytes).is_err());
    }
}
