use std::path::Path;

use anyhow::{Context, Result};
use log::info;

mod config;
mod requests;
mod spire;
mod tpm_client;

use config::ClientConfig;
use devid_tpm::{nvram, TpmGateway};

fn write_output(dir: &str, name: &str, data: &[u8]) -> Result<()> {
    let path = Path::new(dir).join(name);
    std::fs::write(&path, data).with_context(|| format!("writing {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/tpm-provisioner/client.yaml".to_string());
    let config = ClientConfig::load(&config_path)
        .with_context(|| format!("loading configuration from {config_path}"))?;

    let xname = std::env::var("DEVID_XNAME").context("DEVID_XNAME is not set")?;
    let node_type = std::env::var("DEVID_NODE_TYPE").unwrap_or_else(|_| "compute".to_string());

    let mut gateway = TpmGateway::open(&config.tpm_device).context("opening TPM device")?;
    let layout = nvram::NvramLayout::default();
    let ek_certificate_der = nvram::read(gateway.context_mut(), layout.ek_cert_index)
        .context("reading endorsement certificate from NVRAM")?;

    let signing = tpm_client::create_raw_request(&mut gateway, ek_certificate_der)
        .context("building signing request")?;
    let encoded_request = signing
        .request
        .to_bytes()
        .context("encoding signing request")?;

    let self_signature = tpm_client::sign_request(&mut gateway, signing.handles.devid_handle, &encoded_request)
        .context("signing request with DevID key")?;

    let client = reqwest::Client::new();
    let session = requests::authorize(&client, &config.url, &xname, &node_type)
        .await
        .context("authorize step")?;

    let challenge = requests::request_challenge(
        &client,
        &config.url,
        &session,
        &encoded_request,
        &self_signature,
    )
    .await
    .context("challenge request step")?;

    info!("received challenge, activating credential on device");
    let recovered_nonce = tpm_client::generate_challenge_response(
        &mut gateway,
        signing.handles.devid_handle,
        signing.handles.ek_handle,
        challenge.blob,
        challenge.secret,
    )
    .context("activating credential")?;

    let dev_id_certificate = requests::submit_challenge(&client, &config.url, &session, &recovered_nonce)
        .await
        .context("challenge submission step")?;

    if let Some(socket_path) = &config.socket_path {
        match spire::fetch_jwt(socket_path).await {
            Ok(_jwt) => info!("fetched workload JWT-SVID"),
            Err(e) => log::warn!("failed to fetch workload JWT-SVID: {e}"),
        }
    }

    // The SRK handle is released immediately; the EK/AK/DevID handles were
    // pulled out of this guard earlier so `activate_credential` could use
    // them, and are flushed explicitly now that the whole exchange is done.
    signing.resources.flush_all(gateway.context_mut());
    for handle in [
        signing.handles.ek_handle,
        signing.handles.ak_handle,
        signing.handles.devid_handle,
    ] {
        if let Err(e) = gateway.context_mut().flush_context(handle.into()) {
            log::warn!("failed to flush transient handle: {e}");
        }
    }

    std::fs::create_dir_all(&config.output_dir).context("creating output directory")?;
    write_output(&config.output_dir, "devid.crt", &dev_id_certificate)?;

    info!("provisioning complete, DevID certificate written to {}", config.output_dir);
    Ok(())
}
