//! Undefines the NVRAM indices used to store the DevID certificate and key
//! blobs, freeing the space for reuse by a future provisioning run.

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

    for (_, index) in config.entries() {
        info!("clearing NVRAM index {index:#x}");
        nvram::undefine_space(gateway.context_mut(), index)
            .with_context(|| format!("undefining NVRAM index {index:#x}"))?;
    }

    Ok(())
}
