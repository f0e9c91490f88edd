//! Chunked NVRAM access. The TPM bounds a single `NV_Write`/`NV_Read`
//! transfer well below the size of a certificate or key blob, so every
//! operation here walks the buffer in fixed-size chunks.
//!
//! The chunk upper bound at offset `o` is `min(o + CHUNK_SIZE, len)`. The
//! provisioning tool this gateway descends from computed that bound two
//! different ways in two different places — correctly in one, and as an
//! additive `max_len += o + CHUNK_SIZE` (growing without bound) in the
//! other. Both call sites here share the one function below.

use tss_esapi::attributes::NvIndexAttributesBuilder;
use tss_esapi::handles::NvIndexTpmHandle;
use tss_esapi::interface_types::resource_handles::{NvAuth, Provision};
use tss_esapi::structures::{MaxNvBuffer, NvPublic, NvPublicBuilder};
use tss_esapi::tss2_esys::TPM2_HANDLE;
use tss_esapi::Context;

use crate::error::Result;

pub const CHUNK_SIZE: usize = 1024;

/// The fixed NVRAM addresses this system reads and writes. `ek_index` is a
/// platform-fixed address; the rest are assigned by the provisioner's
/// configuration.
#[derive(Debug, Clone, Copy)]
pub struct NvramLayout {
    pub ek_cert_index: u32,
    pub devid_cert_index: u32,
    pub devid_pub_index: u32,
    pub devid_priv_index: u32,
}

impl Default for NvramLayout {
    fn default() -> Self {
        Self {
            ek_cert_index: 0x01C0_0002,
            devid_cert_index: 0x01C1_0100,
            devid_pub_index: 0x01C1_0101,
            devid_priv_index: 0x01C1_0102,
        }
    }
}

/// The next chunk's exclusive upper bound, given how much has already been
/// transferred and the total length of the buffer.
pub fn chunk_end(offset: usize, total_len: usize) -> usize {
    std::cmp::min(offset + CHUNK_SIZE, total_len)
}

fn nv_handle(index: u32) -> Result<NvIndexTpmHandle> {
    Ok(NvIndexTpmHandle::new(index as TPM2_HANDLE)?)
}

/// Defines an NV index sized to hold `size` bytes, owner-authorized,
/// cleared on a TPM reset.
pub fn define_space(ctx: &mut Context, index: u32, size: u16) -> Result<()> {
    let nv_index = nv_handle(index)?;

    let nv_attributes = NvIndexAttributesBuilder::new()
        .with_owner_write(true)
        .with_owner_read(true)
        .with_write_stclear(true)
        .with_read_stclear(true)
        .build()?;

    let nv_public = NvPublicBuilder::new()
        .with_nv_index(nv_index)
        .with_index_name_algorithm(tss_esapi::interface_types::algorithm::HashingAlgorithm::Sha256)
        .with_index_attributes(nv_attributes)
        .with_data_area_size(size as usize)
        .build()?;

    ctx.nv_define_space(Provision::Owner, None, nv_public)?;
    Ok(())
}

/// Writes `data` to the index named by `index`, starting at offset 0, in
/// chunks no larger than [`CHUNK_SIZE`].
pub fn write(ctx: &mut Context, index: u32, data: &[u8]) -> Result<()> {
    let nv_index = nv_handle(index)?;
    let nv_public: NvPublic = ctx.nv_read_public(nv_index)?.0;
    let _ = nv_public;

    let mut offset = 0usize;
    while offset < data.len() {
        let end = chunk_end(offset, data.len());
        let chunk = MaxNvBuffer::try_from(data[offset..end].to_vec())?;
        ctx.nv_write(NvAuth::Owner, nv_index, chunk, offset as u16)?;
        offset = end;
    }
    Ok(())
}

/// Reads the full contents of the index named by `index`, in chunks no
/// larger than [`CHUNK_SIZE`].
pub fn read(ctx: &mut Context, index: u32) -> Result<Vec<u8>> {
    let nv_index = nv_handle(index)?;
    let (nv_public, _name) = ctx.nv_read_public(nv_index)?;
    let total_len = nv_public.data_size();

    let mut data = Vec::with_capacity(total_len);
    let mut offset = 0usize;
    while offset < total_len {
        let end = chunk_end(offset, total_len);
        let want = (end - offset) as u16;
        let chunk = ctx.nv_read(NvAuth::Owner, nv_index, want, offset as u16)?;
        data.extend_from_slice(chunk.as_slice());
        offset = end;
    }
    Ok(data)
}

/// Removes the NV index and its backing storage.
pub fn undefine_space(ctx: &mut Context, index: u32) -> Result<()> {
    let nv_index = nv_handle(index)?;
    ctx.nv_undefine_space(Provision::Owner, nv_index)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_end_stays_within_bounds() {
        assert_eq!(chunk_end(0, 2048), 1024);
        assert_eq!(chunk_end(1024, 2048), 2048);
        assert_eq!(chunk_end(0, 500), 500);
        assert_eq!(chunk_end(900, 1000), 1000);
    }

    #[test]
    fn chunk_end_never_grows_unbounded_across_repeated_calls() {
        // The fix for the additive `max_len += offset + CHUNK_SIZE` bug:
        // walking the whole buffer must land exactly on `total_len`, never
        // past it.
        let total_len = 3500usize;
        let mut offset = 0usize;
        let mut steps = 0;
        while offset < total_len {
            let end = chunk_end(offset, total_len);
            assert!(end <= total_len);
            assert!(end > offset);
            offset = end;
            steps += 1;
            assert!(steps <= 10, "chunking did not converge");
        }
        assert_eq!(offset, total_len);
    }
}
