use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

fn default_device() -> String {
    "/dev/tpmrm0".to_string()
}

#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    pub output_dir: String,
    pub url: String,
    #[serde(default)]
    pub socket_path: Option<String>,
    #[serde(default = "default_device")]
    pub tpm_device: String,
}

impl ClientConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config file {}", path.as_ref().display()))?;
        serde_yaml::from_str(&raw).context("parsing config file as YAML")
    }
}
