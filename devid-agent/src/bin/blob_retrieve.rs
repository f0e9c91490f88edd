//! Reads the DevID certificate and key blobs out of the TPM's NVRAM and
//! writes them to the paths named in the blob config, restrictively
//! permissioned since the private key blob is TPM-wrapped but still
//! sensitive.

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
        let data = nvram::read(gateway.context_mut(), index)
            .with_context(|| format!("reading NVRAM index {index:#x}"))?;
        info!("retrieved {} bytes from NVRAM index {index:#x}, writing to {path}", data.len());
        write_restricted(path, &data).with_context(|| format!("writing {path}"))?;
    }

    Ok(())
}

#[cfg(unix)]
fn write_restricted(path: &str, data: &[u8]) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::write(path, data)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn write_restricted(path: &str, data: &[u8]) -> Result<()> {
    fs::write(path, data).map_err(Into::into)
}
