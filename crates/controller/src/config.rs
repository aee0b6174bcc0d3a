//! Application configuration
//!
//! Loaded once at startup from a YAML file (path from `--config`, the
//! `CONFIG_FILE` environment variable, or the baked-in default) with an
//! environment-variable overlay. Missing required fields are fatal.

use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "/app/config/config.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub cluster: String,

    /// `prod` (in-cluster, JSON logs) or `dev` (explicit kubeconfig)
    #[serde(default = "default_mode")]
    pub mode: String,

    #[serde(default)]
    pub kube_config: Option<String>,

    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub promtail: Promtail,

    #[serde(default)]
    pub metrics: Metrics,

    #[serde(default)]
    pub scheduling: Scheduling,

    #[serde(default)]
    pub budget: Budget,

    #[serde(default)]
    pub log: Log,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Promtail {
    /// Local promtail binary used for `-check-syntax`
    pub local_bin: String,
    pub secret: Secret,
    pub sampling: Sampling,
}

impl Default for Promtail {
    fn default() -> Self {
        Self {
            local_bin: "/app/promtail".to_string(),
            secret: Secret::default(),
            sampling: Sampling::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Secret {
    pub name: String,
    pub namespace: String,
    pub key: String,
}

impl Default for Secret {
    fn default() -> Self {
        Self {
            name: "promtail".to_string(),
            namespace: "kube-logging".to_string(),
            key: "promtail.yaml".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Sampling {
    pub selector: SamplingSelector,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplingSelector {
    /// Template with a single `%s` placeholder for the workload name; used
    /// both to render selectors and to recognize them again.
    pub format: String,
}

impl Default for SamplingSelector {
    fn default() -> Self {
        Self {
            format: "{workload=\"%s\"} |= \"\"".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Metrics {
    pub mimir_endpoint: String,
    pub mimir_tenant: String,
    /// Optional metric-name overrides (`ingested_bytes`, `cpu_request`,
    /// `memory_request`)
    pub names: HashMap<String, String>,
    /// Per-attempt query timeout, humantime syntax
    pub query_timeout: String,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            mimir_endpoint: String::new(),
            mimir_tenant: String::new(),
            names: HashMap::new(),
            query_timeout: "30s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Scheduling {
    pub timezone: String,
    pub cron: Cron,
}

impl Default for Scheduling {
    fn default() -> Self {
        Self {
            timezone: "Asia/Kolkata".to_string(),
            cron: Cron::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Cron {
    pub budget_reset: String,
}

impl Default for Cron {
    fn default() -> Self {
        Self {
            budget_reset: "0 0 * * *".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Budget {
    pub config_path: String,
    pub org: String,
    pub env: String,
    /// Budget granted per standard node of requested CPU, in gigabytes
    pub multiplier: f64,
    /// Budget floor in gigabytes
    pub minimum: f64,
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            config_path: "/app/budget/budget.yaml".to_string(),
            org: String::new(),
            env: String::new(),
            multiplier: 1.0,
            minimum: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Log {
    pub level: String,
    pub format: String,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: String::new(),
        }
    }
}

fn default_mode() -> String {
    "prod".to_string()
}

impl Settings {
    /// Load configuration from the given path, `$CONFIG_FILE`, or the
    /// default location, with `CONTROLLER__*` environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let path = path
            .map(str::to_string)
            .or_else(|| std::env::var("CONFIG_FILE").ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());
        debug!(path = %path, "loading config");

        Self::from_source(config::File::with_name(&path))
    }

    fn from_source<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let raw = config::Config::builder()
            .add_source(source)
            .add_source(config::Environment::with_prefix("CONTROLLER").separator("__"))
            .build()
            .context("failed to load config")?;

        let mut settings: Settings = raw.try_deserialize().context("failed to parse config")?;
        settings.apply_mode();
        settings.validate()?;
        Ok(settings)
    }

    /// Production mode always runs in-cluster with JSON logs.
    fn apply_mode(&mut self) {
        if self.mode == "prod" {
            self.kube_config = None;
            self.log.format = "json".to_string();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster.is_empty() {
            bail!("cluster name is required");
        }
        match self.mode.as_str() {
            "prod" => {}
            // No kubeconfig default in dev, to prevent accidents
            "dev" if self.kube_config.is_none() => bail!("kube_config is required in dev mode"),
            "dev" => {}
            other => bail!("mode must be prod or dev, got {other:?}"),
        }
        if self.metrics.mimir_endpoint.is_empty() {
            bail!("metrics.mimir_endpoint is required");
        }
        if self.metrics.mimir_tenant.is_empty() {
            bail!("metrics.mimir_tenant is required");
        }
        if self.budget.org.is_empty() {
            bail!("budget.org is required");
        }
        if self.budget.env.is_empty() {
            bail!("budget.env is required");
        }
        if self.promtail.sampling.selector.format.matches("%s").count() != 1 {
            bail!(
                "promtail.sampling.selector.format must contain exactly one %s placeholder: {:?}",
                self.promtail.sampling.selector.format
            );
        }
        self.query_timeout()?;
        Tz::from_str(&self.scheduling.timezone)
            .map_err(|e| anyhow::anyhow!("invalid scheduling.timezone: {e}"))?;
        cron::Schedule::from_str(&normalize_cron(&self.scheduling.cron.budget_reset))
            .with_context(|| {
                format!(
                    "invalid scheduling.cron.budget_reset {:?}",
                    self.scheduling.cron.budget_reset
                )
            })?;
        Ok(())
    }

    pub fn query_timeout(&self) -> Result<Duration> {
        humantime::parse_duration(&self.metrics.query_timeout).with_context(|| {
            format!(
                "invalid metrics.query_timeout {:?}",
                self.metrics.query_timeout
            )
        })
    }
}

/// Mirror of the scheduler's five-field normalization, for early validation
fn normalize_cron(expression: &str) -> String {
    if expression.split_whitespace().count() == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    const MINIMAL: &str = r#"
cluster: cluster-001
metrics:
  mimir_endpoint: http://mimir:9009/prometheus
  mimir_tenant: x-org
budget:
  org: acme
  env: prod
"#;

    fn parse(raw: &str) -> Result<Settings> {
        Settings::from_source(config::File::from_str(raw, FileFormat::Yaml))
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let settings = parse(MINIMAL).unwrap();

        assert_eq!(settings.mode, "prod");
        assert_eq!(settings.promtail.local_bin, "/app/promtail");
        assert_eq!(settings.promtail.secret.name, "promtail");
        assert_eq!(settings.promtail.secret.namespace, "kube-logging");
        assert_eq!(settings.promtail.secret.key, "promtail.yaml");
        assert_eq!(
            settings.promtail.sampling.selector.format,
            "{workload=\"%s\"} |= \"\""
        );
        assert_eq!(settings.query_timeout().unwrap(), Duration::from_secs(30));
        assert_eq!(settings.scheduling.timezone, "Asia/Kolkata");
        assert_eq!(settings.scheduling.cron.budget_reset, "0 0 * * *");
        assert_eq!(settings.budget.config_path, "/app/budget/budget.yaml");
        assert_eq!(settings.budget.multiplier, 1.0);
        assert_eq!(settings.budget.minimum, 0.5);
        assert!(!settings.dry_run);
    }

    #[test]
    fn test_prod_mode_forces_json_logs_and_in_cluster_config() {
        let raw = format!("{MINIMAL}\nkube_config: /home/dev/.kube/config\nlog:\n  format: pretty");
        let settings = parse(&raw).unwrap();

        assert_eq!(settings.log.format, "json");
        assert!(settings.kube_config.is_none());
    }

    #[test]
    fn test_dev_mode_requires_kube_config() {
        let raw = format!("{MINIMAL}\nmode: dev");
        assert!(parse(&raw).is_err());

        let raw = format!("{MINIMAL}\nmode: dev\nkube_config: /home/dev/.kube/config");
        let settings = parse(&raw).unwrap();
        assert_eq!(settings.kube_config.as_deref(), Some("/home/dev/.kube/config"));
    }

    #[test]
    fn test_required_fields() {
        for missing in ["cluster", "mimir_endpoint", "mimir_tenant", "org", "env"] {
            let raw = MINIMAL.replace(missing, &format!("unused_{missing}"));
            assert!(parse(&raw).is_err(), "expected failure without {missing}");
        }
    }

    #[test]
    fn test_selector_format_must_have_one_placeholder() {
        let raw = format!(
            "{MINIMAL}\npromtail:\n  sampling:\n    selector:\n      format: 'no placeholder'"
        );
        assert!(parse(&raw).is_err());

        let raw = format!(
            "{MINIMAL}\npromtail:\n  sampling:\n    selector:\n      format: '{{a=\"%s\",b=\"%s\"}}'"
        );
        assert!(parse(&raw).is_err());
    }

    #[test]
    fn test_bad_schedule_settings_are_fatal() {
        let raw = format!("{MINIMAL}\nscheduling:\n  timezone: Mars/Olympus");
        assert!(parse(&raw).is_err());

        let raw = format!("{MINIMAL}\nscheduling:\n  cron:\n    budget_reset: 'not a cron'");
        assert!(parse(&raw).is_err());

        let raw = format!("{MINIMAL}\nmetrics:\n  query_timeout: soon");
        assert!(parse(&raw).is_err());
    }
}
