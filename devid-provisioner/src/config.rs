//! YAML-backed server configuration, loaded once at startup. A malformed or
//! missing config is a fatal error: there is no sensible default for a
//! manufacturer CA pool or a signing key.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use serde::Deserialize;

fn default_log_level() -> String {
    "info".to_string()
}

fn default_session_lifetime_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize)]
pub struct RawServerConfig {
    pub port: u16,
    pub manufacturer_ca_paths: Vec<String>,
    pub provider_ca_path: String,
    pub provider_key_path: String,
    pub allowlist_path: String,
    pub spire_tokens_url: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_session_lifetime_secs")]
    pub session_lifetime_secs: u64,
}

pub struct ServerConfig {
    pub port: u16,
    pub manufacturer_roots: Vec<Vec<u8>>,
    pub provider_ca_der: Vec<u8>,
    pub provider_key: RsaPrivateKey,
    pub allowlist_path: String,
    pub spire_tokens_url: Option<String>,
    pub log_level: String,
    pub session_lifetime_secs: u64,
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config file {}", path.as_ref().display()))?;
        let raw: RawServerConfig =
            serde_yaml::from_str(&raw).context("parsing config file as YAML")?;

        let manufacturer_roots = raw
            .manufacturer_ca_paths
            .iter()
            .map(|p| load_pem_or_der(p))
            .collect::<Result<Vec<_>>>()
            .context("loading manufacturer CA certificates")?;

        let provider_ca_der =
            load_pem_or_der(&raw.provider_ca_path).context("loading provider CA certificate")?;

        let key_pem = fs::read_to_string(&raw.provider_key_path)
            .with_context(|| format!("reading provider key file {}", raw.provider_key_path))?;
        let provider_key = RsaPrivateKey::from_pkcs8_pem(&key_pem)
            .context("parsing provider private key as PKCS#8 PEM")?;

        Ok(Self {
            port: raw.port,
            manufacturer_roots,
            provider_ca_der,
            provider_key,
            allowlist_path: raw.allowlist_path,
            spire_tokens_url: raw.spire_tokens_url,
            log_level: raw.log_level,
            session_lifetime_secs: raw.session_lifetime_secs,
        })
    }
}

fn load_pem_or_der(path: &str) -> Result<Vec<u8>> {
    let bytes = fs::read(path).with_context(|| format!("reading certificate file {path}"))?;
    if bytes.starts_with(b"-----BEGIN") {
        let pem = pem::parse(&bytes).context("parsing PEM certificate")?;
        Ok(pem.contents().to_vec())
    } else {
        Ok(bytes)
    }
}
