//! Writes the DevID certificate and key blobs from disk into the TPM's
//! NVRAM, at the addresses named in the blob config. Each NV index is
//! (re)defined to exactly the size of the file being stored before the
//! chunked write runs.

use std::fs;

use anyhow::{bail, Context, Result};
use devid_agent::blob_config::BlobConfig;
use devid_tpm::{nvram, TpmGateway};
use log::info;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 2 {
        bail!("{} [CONFIG FILE]", args[0]);
    }
    let config_path = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| "/etc/tpm-provisioner/blobs.conf".to_string());

    let config = BlobConfig::load(&config_path)
        .with_context(|| format!("loading blob config from {config_path}"))?;
    let mut gateway = TpmGateway::open(&config.tpm_device).context("opening TPM device")?;

    for (path, index) in config.entries() {
        let data = fs::read(path).with_context(|| format!("reading {path}"))?;
        info!("writing {path} ({} bytes) to NVRAM index {index:#x}", data.len());
        nvram::define_space(gateway.context_mut(), index, data.len() as u16)
            .with_context(|| format!("defining NVRAM index {index:#x}"))?;
        nvram::write(gateway.context_mut(), index, &data)
            .with_context(|| format!("writing NVRAM index {index:#x}"))?;
    }

    Ok(())
}
