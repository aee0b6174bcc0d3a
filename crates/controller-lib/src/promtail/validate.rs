//! Config validation through the promtail binary
//!
//! The generated YAML is written to a temporary file and handed to
//! `promtail -check-syntax`; a non-zero exit rejects the rewrite before it
//! reaches the secret store.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, trace};

/// Validates a serialized promtail configuration
#[async_trait]
pub trait ConfigValidator: Send + Sync {
    async fn validate(&self, config_yaml: &str) -> Result<()>;
}

/// Runs the promtail binary's own syntax checker
pub struct PromtailSyntaxChecker {
    binary: PathBuf,
}

impl PromtailSyntaxChecker {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl ConfigValidator for PromtailSyntaxChecker {
    async fn validate(&self, config_yaml: &str) -> Result<()> {
        let mut tmp = tempfile::Builder::new()
            .prefix("promtail-config-")
            .suffix(".yaml")
            .tempfile()
            .context("failed to create temp file for validation")?;
        tmp.write_all(config_yaml.as_bytes())
            .and_then(|()| tmp.flush())
            .context("failed to write config to temp file")?;

        debug!(
            binary = %self.binary.display(),
            config = %tmp.path().display(),
            "running promtail -check-syntax"
        );

        let output = Command::new(&self.binary)
            .arg("-check-syntax")
            .arg("--config.file")
            .arg(tmp.path())
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.binary.display()))?;

        if !output.status.success() {
            bail!(
                "promtail rejected the generated config ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        trace!(
            output = %String::from_utf8_lossy(&output.stdout).trim(),
            "promtail config validation succeeded"
        );
        Ok(())
    }
}
