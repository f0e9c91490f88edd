//! Configuration for the `blob-store`/`blob-retrieve`/`blob-clear`
//! utilities: where on disk the DevID certificate and key blobs live, and
//! which NVRAM indices they're mirrored to.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

fn default_device() -> String {
    "/dev/tpmrm0".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlobConfig {
    pub dev_cert_path: String,
    pub dev_cert_addr: u32,
    pub dev_pub_blob_path: String,
    pub dev_pub_blob_addr: u32,
    pub dev_priv_blob_path: String,
    pub dev_priv_blob_addr: u32,
    #[serde(default = "default_device")]
    pub tpm_device: String,
}

impl BlobConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config file {}", path.as_ref().display()))?;
        serde_yaml::from_str(&raw).context("parsing config file as YAML")
    }

    /// The three (path, NVRAM index) pairs this tool moves data between, in
    /// the fixed order the original tooling stores and retrieves them.
    pub fn entries(&self) -> [(&str, u32); 3] {
        [
            (self.dev_cert_path.as_str(), self.dev_cert_addr),
            (self.dev_pub_blob_path.as_str(), self.dev_pub_blob_addr),
            (self.dev_priv_blob_path.as_str(), self.dev_priv_blob_addr),
        ]
    }
}
