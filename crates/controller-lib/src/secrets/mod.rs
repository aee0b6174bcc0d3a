//! Kubernetes secret persistence
//!
//! The promtail configuration lives in one key of one cluster secret. Reads
//! and writes go through the typed `Api<Secret>` with exponential-backoff
//! retry; a missing key after a successful read is terminal and not retried.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::path::Path;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, trace, warn};

const MAX_ATTEMPTS: u32 = 15;
const BASE_DELAY: Duration = Duration::from_secs(1);

/// Reads and writes one value addressed by `(namespace, name, key)`
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// The UTF-8 value at `secret.data[key]`
    async fn fetch(&self) -> Result<String>;

    /// Replace the value at `secret.data[key]`. With `dry_run` the API
    /// server validates and persists nothing.
    async fn update(&self, value_yaml: &str, dry_run: bool) -> Result<()>;
}

/// Create a Kubernetes client: from an explicit kubeconfig when one is
/// configured (dev mode), otherwise from the inferred in-cluster or default
/// configuration.
pub async fn kube_client(kubeconfig: Option<&Path>) -> Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            debug!(kubeconfig = %path.display(), "using explicit kubeconfig");
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("failed to read kubeconfig {}", path.display()))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .context("failed to load kubeconfig")?
        }
        None => Config::infer()
            .await
            .context("failed to infer kubernetes configuration")?,
    };
    Client::try_from(config).context("failed to create kubernetes client")
}

/// [`SecretStore`] backed by the cluster API
pub struct KubeSecretStore {
    api: Api<Secret>,
    name: String,
    key: String,
}

impl KubeSecretStore {
    pub fn new(client: Client, namespace: &str, name: &str, key: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.to_string(),
            key: key.to_string(),
        }
    }

    fn backoff(attempt: u32) -> Duration {
        BASE_DELAY * (1u32 << (attempt - 1))
    }
}

/// Extract the UTF-8 value of one key from a secret
fn value_from_secret(secret: &Secret, key: &str) -> Result<String> {
    let value = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .ok_or_else(|| anyhow!("key {key} not found in secret"))?;
    String::from_utf8(value.0.clone()).context("secret value is not valid UTF-8")
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn fetch(&self) -> Result<String> {
        let mut last_err = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = Self::backoff(attempt);
                debug!(
                    secret = %self.name,
                    attempt,
                    delay_secs = delay.as_secs(),
                    "retrying secret fetch after delay"
                );
                sleep(delay).await;
            }

            debug!(
                secret = %self.name,
                key = %self.key,
                attempt = attempt + 1,
                max_attempts = MAX_ATTEMPTS,
                "fetching secret value"
            );

            match self.api.get(&self.name).await {
                Ok(secret) => return value_from_secret(&secret, &self.key),
                Err(e) => {
                    debug!(secret = %self.name, error = %e, "error fetching secret, will retry");
                    last_err = Some(e);
                }
            }
        }

        Err(anyhow!(
            "failed to get secret after {MAX_ATTEMPTS} attempts: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        ))
    }

    async fn update(&self, value_yaml: &str, dry_run: bool) -> Result<()> {
        let params = PostParams {
            dry_run,
            field_manager: None,
        };
        let mut last_err = None;

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let delay = Self::backoff(attempt);
                debug!(attempt, delay_secs = delay.as_secs(), "retrying secret update after delay");
                sleep(delay).await;
            }

            trace!(
                secret = %self.name,
                key = %self.key,
                dry_run,
                attempt = attempt + 1,
                max_attempts = MAX_ATTEMPTS,
                "updating secret"
            );

            let mut secret = match self.api.get(&self.name).await {
                Ok(secret) => secret,
                Err(e) => {
                    warn!(secret = %self.name, error = %e, "error getting secret for update, will retry");
                    last_err = Some(e);
                    continue;
                }
            };

            secret
                .data
                .get_or_insert_with(Default::default)
                .insert(self.key.clone(), ByteString(value_yaml.as_bytes().to_vec()));

            match self.api.replace(&self.name, &params, &secret).await {
                Ok(_) => {
                    trace!(secret = %self.name, key = %self.key, dry_run, "secret updated");
                    return Ok(());
                }
                Err(e) => {
                    warn!(secret = %self.name, error = %e, "error updating secret, will retry");
                    last_err = Some(e);
                }
            }
        }

        Err(anyhow!(
            "failed to update secret after {MAX_ATTEMPTS} attempts: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        ))
    }
}
