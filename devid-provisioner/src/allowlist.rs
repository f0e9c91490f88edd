//! The xname allowlist: a flat, file-backed list of regex patterns. A node
//! is authorized if its xname matches any pattern in the list (OR
//! semantics), matching the upstream allowlist's matching rule.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use regex::Regex;

pub struct Allowlist {
    path: PathBuf,
    state: RwLock<Vec<(String, Regex)>>,
}

impl Allowlist {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let patterns = match fs::read_to_string(&path) {
            Ok(contents) => contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e).context("reading allowlist file"),
        };

        let compiled = compile_all(&patterns)?;
        Ok(Self {
            path,
            state: RwLock::new(compiled),
        })
    }

    pub fn is_allowed(&self, xname: &str) -> bool {
        self.state
            .read()
            .expect("allowlist lock poisoned")
            .iter()
            .any(|(_, re)| re.is_match(xname))
    }

    pub fn list(&self) -> Vec<String> {
        self.state
            .read()
            .expect("allowlist lock poisoned")
            .iter()
            .map(|(pattern, _)| pattern.clone())
            .collect()
    }

    /// Adds a pattern, rejecting an exact duplicate of an existing one.
    pub fn add(&self, pattern: &str) -> Result<()> {
        let regex = Regex::new(pattern).context("pattern is not a valid regex")?;
        let mut state = self.state.write().expect("allowlist lock poisoned");
        if state.iter().any(|(p, _)| p == pattern) {
            anyhow::bail!("pattern already present in allowlist");
        }
        state.push((pattern.to_string(), regex));
        self.persist(&state)
    }

    pub fn remove(&self, pattern: &str) -> Result<()> {
        let mut state = self.state.write().expect("allowlist lock poisoned");
        let before = state.len();
        state.retain(|(p, _)| p != pattern);
        if state.len() == before {
            anyhow::bail!("pattern not present in allowlist");
        }
        self.persist(&state)
    }

    fn persist(&self, state: &[(String, Regex)]) -> Result<()> {
        let contents = state
            .iter()
            .map(|(pattern, _)| pattern.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        fs::write(&self.path, contents).context("writing allowlist file")
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<(String, Regex)>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p)
                .map(|re| (p.clone(), re))
                .with_context(|| format!("invalid allowlist pattern: {p}"))
        })
        .collect()
}
