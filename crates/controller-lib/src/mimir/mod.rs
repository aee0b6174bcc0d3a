//! Mimir metrics queries
//!
//! Issues instant PromQL queries against a Mimir (Prometheus-compatible)
//! endpoint with header-based tenancy, a per-attempt timeout and exponential
//! backoff. Two query families feed the budget cycle: bytes ingested per
//! workload and average per-workload resource requests.

use crate::models::{WorkloadIngestedBytes, WorkloadResourceRequest};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace, warn};
use url::Url;

const LOG_BYTES_METRIC: &str = "promtail_custom_processed_log_bytes_total";
const CPU_REQUEST_METRIC: &str = "workload_cpu_request";
const MEMORY_REQUEST_METRIC: &str = "workload_memory_request";

const DEFAULT_TIME_RANGE: &str = "24h";

/// Tenancy header expected by Mimir
const TENANT_HEADER: &str = "x-scope-orgid";

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const BACKOFF_MULTIPLIER: f64 = 1.2;
const MAX_RETRY_ELAPSED: Duration = Duration::from_secs(60 * 60);

/// Interface for querying workload metrics
#[async_trait]
pub trait MetricsQuerier: Send + Sync {
    /// Bytes ingested per workload of a cluster over the time range
    async fn ingested_bytes(
        &self,
        cluster: &str,
        time_range: &str,
    ) -> Result<Vec<WorkloadIngestedBytes>>;

    /// Average CPU and memory requests per workload of a cluster over the
    /// time range
    async fn resource_requests(
        &self,
        cluster: &str,
        time_range: &str,
    ) -> Result<Vec<WorkloadResourceRequest>>;
}

/// Metric names used in the queries, overridable from configuration
#[derive(Debug, Clone)]
pub struct MetricNames {
    pub ingested_bytes: String,
    pub cpu_request: String,
    pub memory_request: String,
}

impl Default for MetricNames {
    fn default() -> Self {
        Self {
            ingested_bytes: LOG_BYTES_METRIC.to_string(),
            cpu_request: CPU_REQUEST_METRIC.to_string(),
            memory_request: MEMORY_REQUEST_METRIC.to_string(),
        }
    }
}

/// Mimir client implementing [`MetricsQuerier`]
pub struct MimirClient {
    http: reqwest::Client,
    query_url: String,
    query_timeout: Duration,
    metric_names: MetricNames,
}

impl MimirClient {
    /// Create a new client. The tenant is attached to every request as the
    /// `X-Scope-OrgID` header.
    pub fn new(endpoint: &str, tenant: &str, query_timeout: Duration) -> Result<Self> {
        if endpoint.is_empty() {
            bail!("mimir endpoint cannot be empty");
        }
        if tenant.is_empty() {
            bail!("mimir tenant cannot be empty");
        }
        Url::parse(endpoint).with_context(|| format!("invalid mimir endpoint {endpoint:?}"))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(TENANT_HEADER),
            HeaderValue::from_str(tenant).context("tenant is not a valid header value")?,
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            http,
            query_url: format!("{}/api/v1/query", endpoint.trim_end_matches('/')),
            query_timeout,
            metric_names: MetricNames::default(),
        })
    }

    pub fn with_metric_names(mut self, metric_names: MetricNames) -> Self {
        self.metric_names = metric_names;
        self
    }

    /// Run one instant query with retry.
    ///
    /// Each attempt is bounded by the query timeout; attempts back off
    /// exponentially until the retry budget is exhausted.
    async fn query(&self, query: &str) -> Result<QueryData> {
        trace!(query, "querying mimir");

        let started = Instant::now();
        let mut delay = INITIAL_BACKOFF;
        loop {
            match self.query_once(query).await {
                Ok(data) => {
                    trace!(elapsed_ms = started.elapsed().as_millis() as u64, "query completed");
                    return Ok(data);
                }
                Err(e) => {
                    if started.elapsed() + delay >= MAX_RETRY_ELAPSED {
                        return Err(e.context("failed to query mimir after retries"));
                    }
                    warn!(error = %e, retry_in_secs = delay.as_secs_f64(), "query failed, will retry");
                    sleep(delay).await;
                    delay = delay.mul_f64(BACKOFF_MULTIPLIER);
                }
            }
        }
    }

    async fn query_once(&self, query: &str) -> Result<QueryData> {
        debug!(timeout_secs = self.query_timeout.as_secs_f64(), "querying mimir with timeout");

        let response = self
            .http
            .get(&self.query_url)
            .query(&[("query", query)])
            .timeout(self.query_timeout)
            .send()
            .await
            .context("mimir request failed")?;

        let http_status = response.status();
        let body = response
            .text()
            .await
            .context("failed to read mimir response body")?;
        let parsed: ApiResponse = serde_json::from_str(&body)
            .with_context(|| format!("failed to decode mimir response (http {http_status})"))?;

        if parsed.status != "success" {
            bail!(
                "mimir query failed ({}): {}",
                parsed.error_type.unwrap_or_default(),
                parsed.error.unwrap_or_default()
            );
        }
        if !parsed.warnings.is_empty() {
            warn!(warnings = ?parsed.warnings, "warnings from mimir query");
        }

        parsed
            .data
            .context("mimir response is missing the data field")
    }
}

#[async_trait]
impl MetricsQuerier for MimirClient {
    async fn ingested_bytes(
        &self,
        cluster: &str,
        time_range: &str,
    ) -> Result<Vec<WorkloadIngestedBytes>> {
        let time_range = effective_time_range(cluster, time_range)?;
        let query = ingested_bytes_query(&self.metric_names.ingested_bytes, cluster, time_range);

        let data = self.query(&query).await?;
        let samples = vector_samples(data)?;

        samples
            .into_iter()
            .map(|sample| {
                Ok(WorkloadIngestedBytes {
                    cluster: sample.label("cluster"),
                    workload: sample.label("workload"),
                    value: sample.number()?,
                })
            })
            .collect()
    }

    async fn resource_requests(
        &self,
        cluster: &str,
        time_range: &str,
    ) -> Result<Vec<WorkloadResourceRequest>> {
        let time_range = effective_time_range(cluster, time_range)?;
        let cpu_query = avg_request_query(&self.metric_names.cpu_request, cluster, time_range);
        let memory_query =
            avg_request_query(&self.metric_names.memory_request, cluster, time_range);

        let (cpu_data, memory_data) = tokio::try_join!(
            self.query(&cpu_query),
            self.query(&memory_query)
        )?;

        join_resources(cluster, vector_samples(cpu_data)?, vector_samples(memory_data)?)
    }
}

fn effective_time_range<'a>(cluster: &str, time_range: &'a str) -> Result<&'a str> {
    if cluster.is_empty() {
        bail!("cluster cannot be empty");
    }
    if time_range.is_empty() {
        debug!(default = DEFAULT_TIME_RANGE, "time range is empty, using default");
        return Ok(DEFAULT_TIME_RANGE);
    }
    Ok(time_range)
}

fn ingested_bytes_query(metric: &str, cluster: &str, time_range: &str) -> String {
    format!("sum by (cluster, workload) (increase({metric}{{cluster=~'{cluster}'}}[{time_range}]))")
}

fn avg_request_query(metric: &str, cluster: &str, time_range: &str) -> String {
    format!(
        "sum by (cluster, workload) (avg_over_time({metric}{{cluster=~'{cluster}'}}[{time_range}]))"
    )
}

/// Join the CPU and memory vectors on workload. The CPU result decides which
/// workloads are present; memory-only workloads are dropped.
fn join_resources(
    cluster: &str,
    cpu: Vec<VectorSample>,
    memory: Vec<VectorSample>,
) -> Result<Vec<WorkloadResourceRequest>> {
    let mut memory_by_workload: HashMap<String, f64> = HashMap::new();
    for sample in memory {
        memory_by_workload.insert(sample.label("workload"), sample.number()?);
    }

    let mut resources = Vec::with_capacity(cpu.len());
    for sample in cpu {
        let workload = sample.label("workload");
        let memory = memory_by_workload.get(&workload).copied().unwrap_or(0.0);
        resources.push(WorkloadResourceRequest {
            cluster: cluster.to_string(),
            workload,
            cpu: sample.number()?,
            memory,
        });
    }
    resources.sort_by(|a, b| a.workload.cmp(&b.workload));
    Ok(resources)
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    metric: HashMap<String, String>,
    /// `[unix_timestamp, "value"]` as returned by the instant-query API
    value: (f64, String),
}

impl VectorSample {
    fn label(&self, name: &str) -> String {
        self.metric.get(name).cloned().unwrap_or_default()
    }

    fn number(&self) -> Result<f64> {
        self.value
            .1
            .parse()
            .with_context(|| format!("sample value {:?} is not a number", self.value.1))
    }
}

/// Require a vector result and decode its samples
fn vector_samples(data: QueryData) -> Result<Vec<VectorSample>> {
    if data.result_type != "vector" {
        bail!("expected vector result but got {}", data.result_type);
    }
    serde_json::from_value(data.result).context("failed to decode vector samples")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(result_type: &str, result: serde_json::Value) -> QueryData {
        QueryData {
            result_type: result_type.to_string(),
            result,
        }
    }

    #[test]
    fn test_query_rendering() {
        let names = MetricNames::default();
        assert_eq!(
            ingested_bytes_query(&names.ingested_bytes, "cluster-001", "24h"),
            "sum by (cluster, workload) (increase(promtail_custom_processed_log_bytes_total{cluster=~'cluster-001'}[24h]))"
        );
        assert_eq!(
            avg_request_query(&names.cpu_request, "cluster-001", "24h"),
            "sum by (cluster, workload) (avg_over_time(workload_cpu_request{cluster=~'cluster-001'}[24h]))"
        );
        assert_eq!(
            avg_request_query(&names.memory_request, "cluster-001", "6h"),
            "sum by (cluster, workload) (avg_over_time(workload_memory_request{cluster=~'cluster-001'}[6h]))"
        );
    }

    #[test]
    fn test_effective_time_range() {
        assert_eq!(effective_time_range("c", "").unwrap(), "24h");
        assert_eq!(effective_time_range("c", "12h").unwrap(), "12h");
        assert!(effective_time_range("", "24h").is_err());
    }

    #[test]
    fn test_vector_samples_decoding() {
        let samples = vector_samples(data(
            "vector",
            json!([
                {"metric": {"cluster": "cluster-001", "workload": "api-gateway"}, "value": [1718000000.0, "2000000000"]},
                {"metric": {"workload": "checkout"}, "value": [1718000000.0, "1.5"]}
            ]),
        ))
        .unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].label("cluster"), "cluster-001");
        assert_eq!(samples[0].number().unwrap(), 2.0e9);
        // Missing labels decode to empty strings
        assert_eq!(samples[1].label("cluster"), "");
        assert_eq!(samples[1].number().unwrap(), 1.5);
    }

    #[test]
    fn test_non_vector_result_is_an_error() {
        let result = vector_samples(data("matrix", json!([])));
        assert!(result.is_err());
    }

    #[test]
    fn test_error_responses() {
        let parsed: ApiResponse = serde_json::from_str(
            r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#,
        )
        .unwrap();
        assert_eq!(parsed.status, "error");
        assert_eq!(parsed.error_type.as_deref(), Some("bad_data"));

        let bad_value = VectorSample {
            metric: HashMap::new(),
            value: (0.0, "NaNope".to_string()),
        };
        assert!(bad_value.number().is_err());
    }

    #[test]
    fn test_join_resources_is_cpu_authoritative() {
        let cpu = vec![
            VectorSample {
                metric: HashMap::from([("workload".to_string(), "api-gateway".to_string())]),
                value: (0.0, "8".to_string()),
            },
            VectorSample {
                metric: HashMap::from([("workload".to_string(), "checkout".to_string())]),
                value: (0.0, "2".to_string()),
            },
        ];
        let memory = vec![
            VectorSample {
                metric: HashMap::from([("workload".to_string(), "api-gateway".to_string())]),
                value: (0.0, "1000000".to_string()),
            },
            VectorSample {
                metric: HashMap::from([("workload".to_string(), "memory-only".to_string())]),
                value: (0.0, "5".to_string()),
            },
        ];

        let resources = join_resources("cluster-001", cpu, memory).unwrap();

        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].workload, "api-gateway");
        assert_eq!(resources[0].cpu, 8.0);
        assert_eq!(resources[0].memory, 1_000_000.0);
        // Present in CPU only: memory defaults to zero
        assert_eq!(resources[1].workload, "checkout");
        assert_eq!(resources[1].memory, 0.0);
        // Present in memory only: dropped
        assert!(!resources.iter().any(|r| r.workload == "memory-only"));
    }

    #[test]
    fn test_client_rejects_empty_arguments() {
        assert!(MimirClient::new("", "tenant", Duration::from_secs(30)).is_err());
        assert!(MimirClient::new("http://mimir:9009", "", Duration::from_secs(30)).is_err());
        assert!(MimirClient::new("not a url", "tenant", Duration::from_secs(30)).is_err());
        assert!(MimirClient::new("http://mimir:9009", "tenant", Duration::from_secs(30)).is_ok());
    }
}
