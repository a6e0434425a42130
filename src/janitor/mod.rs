//! Retention enforcement against time-series stores
//!
//! A [`RetentionPolicy`] says "data older than `ttl` must not persist" for one
//! external system. [`build_janitor`] turns a validated policy into a
//! [`Janitor`], and [`run`] drives a set of janitors on a fixed interval.
//!
//! | Kind | Mechanism |
//! |------|-----------|
//! | `elasticsearch` | delete date-suffixed indices older than the TTL |
//! | `influxdb` | alter the database's default retention policy duration |

pub mod elasticsearch;
pub mod influxdb;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::secrets::{secret_strings, SecretSource};
use crate::{ticker, Error, Result};

pub use elasticsearch::{expired_indices, ElasticsearchJanitor, HttpIndexClient, IndexClient};
pub use influxdb::{retention_statement, InfluxDbJanitor};

/// Default time between janitor runs (1 hour)
pub const DEFAULT_JANITOR_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// External system a retention policy applies to
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JanitorKind {
    /// Date-suffixed Elasticsearch indices
    Elasticsearch,
    /// InfluxDB retention policy
    Influxdb,
}

impl std::fmt::Display for JanitorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Elasticsearch => write!(f, "elasticsearch"),
            Self::Influxdb => write!(f, "influxdb"),
        }
    }
}

/// Elasticsearch target
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchSpec {
    /// Base URL, e.g. `http://elasticsearch:9200`
    #[serde(default)]
    pub endpoint: String,
    /// Index name prefix; the rest of the name is a `YYYY.MM.DD` date
    #[serde(default)]
    pub log_index_prefix: String,
    /// Secret holding `ADMIN_USERNAME` / `ADMIN_PASSWORD`
    #[serde(default)]
    pub secret_name: String,
}

/// InfluxDB target
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InfluxDbSpec {
    /// Base URL, e.g. `http://influxdb:8086`
    #[serde(default)]
    pub endpoint: String,
    /// Database whose default retention policy is altered (defaults to `k8s`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Secret holding `INFLUX_ADMIN_USER` / `INFLUX_ADMIN_PASSWORD`
    #[serde(default)]
    pub secret_name: String,
}

/// One retention policy
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    /// Target system
    pub kind: JanitorKind,

    /// Maximum age of retained data
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub ttl: Duration,

    /// Elasticsearch settings, required when `kind` is `elasticsearch`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elasticsearch: Option<ElasticsearchSpec>,

    /// InfluxDB settings, required when `kind` is `influxdb`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub influxdb: Option<InfluxDbSpec>,
}

fn require_field(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation_for_field(field, "must not be empty"));
    }
    Ok(())
}

impl RetentionPolicy {
    /// Validate the policy before any janitor is built
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(Error::validation_for_field("ttl", "must be greater than zero"));
        }
        match self.kind {
            JanitorKind::Elasticsearch => {
                if self.influxdb.is_some() {
                    return Err(Error::validation_for_field(
                        "influxdb",
                        "not allowed for kind elasticsearch",
                    ));
                }
                let spec = self.elasticsearch.as_ref().ok_or_else(|| {
                    Error::validation_for_field("elasticsearch", "required for kind elasticsearch")
                })?;
                require_field("elasticsearch.endpoint", &spec.endpoint)?;
                require_field("elasticsearch.logIndexPrefix", &spec.log_index_prefix)?;
                require_field("elasticsearch.secretName", &spec.secret_name)?;
            }
            JanitorKind::Influxdb => {
                if self.elasticsearch.is_some() {
                    return Err(Error::validation_for_field(
                        "elasticsearch",
                        "not allowed for kind influxdb",
                    ));
                }
                let spec = self.influxdb.as_ref().ok_or_else(|| {
                    Error::validation_for_field("influxdb", "required for kind influxdb")
                })?;
                require_field("influxdb.endpoint", &spec.endpoint)?;
                require_field("influxdb.secretName", &spec.secret_name)?;
            }
        }
        Ok(())
    }
}

/// Enforces one retention policy
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Janitor: Send + Sync {
    /// System this janitor cleans
    fn kind(&self) -> JanitorKind;

    /// Remove or expire data older than the policy's TTL relative to `now`
    async fn cleanup(&self, now: DateTime<Utc>) -> Result<()>;
}

/// Build the janitor for a policy, reading credentials from its Secret
pub async fn build_janitor(
    policy: &RetentionPolicy,
    secrets: &dyn SecretSource,
    namespace: &str,
) -> Result<Box<dyn Janitor>> {
    policy.validate()?;
    match policy.kind {
        JanitorKind::Elasticsearch => {
            let spec = policy
                .elasticsearch
                .as_ref()
                .ok_or_else(|| Error::validation_for_field("elasticsearch", "missing"))?;
            let creds = secret_strings(secrets, namespace, &spec.secret_name).await?;
            let client = HttpIndexClient::new(&spec.endpoint)?.with_basic_auth(
                creds.get(elasticsearch::USERNAME_KEY).cloned(),
                creds.get(elasticsearch::PASSWORD_KEY).cloned(),
            );
            Ok(Box::new(ElasticsearchJanitor::new(
                Box::new(client),
                spec.log_index_prefix.clone(),
                policy.ttl,
            )))
        }
        JanitorKind::Influxdb => {
            let spec = policy
                .influxdb
                .as_ref()
                .ok_or_else(|| Error::validation_for_field("influxdb", "missing"))?;
            let creds = secret_strings(secrets, namespace, &spec.secret_name).await?;
            let janitor = InfluxDbJanitor::new(&spec.endpoint, spec.database.clone(), policy.ttl)?
                .with_basic_auth(
                    creds.get(influxdb::USERNAME_KEY).cloned(),
                    creds.get(influxdb::PASSWORD_KEY).cloned(),
                );
            Ok(Box::new(janitor))
        }
    }
}

/// A janitor run that failed
#[derive(Debug)]
pub struct JanitorFailure {
    /// Which janitor failed
    pub kind: JanitorKind,
    /// Why it failed
    pub error: Error,
}

/// Run every janitor immediately, then once per interval until shut down
///
/// Janitors run one after another within a tick. A failed janitor does not
/// prevent the others from running; each failure is sent on `failures`.
/// A zero interval is raised to [`crate::MIN_TICK_INTERVAL`].
pub async fn run(
    janitors: Vec<Arc<dyn Janitor>>,
    run_interval: Duration,
    failures: mpsc::Sender<JanitorFailure>,
    mut shutdown: oneshot::Receiver<()>,
) {
    info!(
        janitors = janitors.len(),
        interval_secs = run_interval.as_secs(),
        "Starting retention janitors"
    );
    let mut ticker = ticker(run_interval);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                debug!("Retention janitors stopped");
                break;
            }
            _ = ticker.tick() => {
                let now = Utc::now();
                for janitor in &janitors {
                    let kind = janitor.kind();
                    match janitor.cleanup(now).await {
                        Ok(()) => debug!(janitor = %kind, "Retention enforced"),
                        Err(error) => {
                            error!(janitor = %kind, error = %error, "Retention run failed");
                            // a dropped receiver only means nobody is listening for alerts
                            let _ = failures.send(JanitorFailure { kind, error }).await;
                        }
                    }
                }
            }
        }
    }
}
