//! InfluxDB retention
//!
//! InfluxDB expires data itself; the janitor only keeps the default retention
//! policy of the database in line with the configured TTL.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use super::{Janitor, JanitorKind};
use crate::http::{check_response, http_client, request_error};
use crate::{Error, Result};

const SYSTEM: &str = "influxdb";

/// Database altered when the policy names none
pub const DEFAULT_DATABASE: &str = "k8s";

/// Secret key holding the admin user
pub const USERNAME_KEY: &str = "INFLUX_ADMIN_USER";

/// Secret key holding the admin password
pub const PASSWORD_KEY: &str = "INFLUX_ADMIN_PASSWORD";

/// The InfluxQL statement enforcing `ttl` on `database`
pub fn retention_statement(database: &str, ttl: Duration) -> String {
    format!(
        "ALTER RETENTION POLICY default ON {database} DURATION {}s",
        ttl.as_secs()
    )
}

#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    error: Option<String>,
}

/// Alters the default retention policy of one database
pub struct InfluxDbJanitor {
    endpoint: String,
    database: String,
    ttl: Duration,
    username: Option<String>,
    password: Option<String>,
    client: reqwest::Client,
}

impl InfluxDbJanitor {
    /// Create a janitor for `database` (default `k8s`) at `endpoint`
    pub fn new(endpoint: &str, database: Option<String>, ttl: Duration) -> Result<Self> {
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            database: database
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            ttl,
            username: None,
            password: None,
            client: http_client(SYSTEM)?,
        })
    }

    /// Authenticate with HTTP basic auth when a username is present
    pub fn with_basic_auth(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username.filter(|u| !u.is_empty());
        self.password = password;
        self
    }
}

#[async_trait]
impl Janitor for InfluxDbJanitor {
    fn kind(&self) -> JanitorKind {
        JanitorKind::Influxdb
    }

    async fn cleanup(&self, _now: DateTime<Utc>) -> Result<()> {
        let statement = retention_statement(&self.database, self.ttl);
        let mut request = self
            .client
            .post(format!("{}/query", self.endpoint))
            .query(&[("q", statement.as_str())]);
        if let Some(user) = &self.username {
            request = request.basic_auth(user, self.password.as_ref());
        }

        let response = request.send().await.map_err(|e| request_error(SYSTEM, e))?;
        let body = check_response(SYSTEM, response)
            .await?
            .text()
            .await
            .map_err(|e| request_error(SYSTEM, e))?;

        // an empty body is a success on some server versions
        let parsed: QueryResponse = if body.trim().is_empty() {
            QueryResponse::default()
        } else {
            serde_json::from_str(&body)
                .map_err(|e| Error::upstream(SYSTEM, format!("unexpected query response: {e}")))?
        };
        if let Some(message) = parsed
            .error
            .or_else(|| parsed.results.into_iter().find_map(|r| r.error))
        {
            return Err(Error::upstream(SYSTEM, message));
        }

        info!(
            database = %self.database,
            duration_secs = self.ttl.as_secs(),
            "Retention policy enforced"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{basic_auth, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn statement_uses_whole_seconds() {
        assert_eq!(
            retention_statement("k8s", Duration::from_secs(90 * 24 * 3600)),
            "ALTER RETENTION POLICY default ON k8s DURATION 7776000s"
        );
    }

    #[test]
    fn blank_database_falls_back_to_default() {
        let janitor = InfluxDbJanitor::new(
            "http://influx:8086/",
            Some(" ".to_string()),
            Duration::from_secs(60),
        )
        .unwrap();
        assert_eq!(janitor.database, DEFAULT_DATABASE);
        assert_eq!(janitor.endpoint, "http://influx:8086");
    }

    #[tokio::test]
    async fn statement_is_posted_with_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/query"))
            .and(query_param(
                "q",
                "ALTER RETENTION POLICY default ON metrics DURATION 86400s",
            ))
            .and(basic_auth("admin", "secret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"results": [{"statement_id": 0}]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let janitor = InfluxDbJanitor::new(
            &server.uri(),
            Some("metrics".to_string()),
            Duration::from_secs(86400),
        )
        .unwrap()
        .with_basic_auth(Some("admin".to_string()), Some("secret".to_string()));
        janitor.cleanup(Utc::now()).await.unwrap();
    }

    #[tokio::test]
    async fn statement_error_in_body_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{"statement_id": 0, "error": "database not found: k8s"}]
            })))
            .mount(&server)
            .await;

        let janitor = InfluxDbJanitor::new(&server.uri(), None, Duration::from_secs(3600)).unwrap();
        let err = janitor.cleanup(Utc::now()).await.unwrap_err();
        assert_eq!(err.system(), Some(SYSTEM));
        assert!(err.to_string().contains("database not found"));
    }

    #[tokio::test]
    async fn unauthorized_is_upstream_error_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({"error": "authorization failed"})),
            )
            .mount(&server)
            .await;

        let janitor = InfluxDbJanitor::new(&server.uri(), None, Duration::from_secs(3600)).unwrap();
        match janitor.cleanup(Utc::now()).await {
            Err(Error::Upstream { status, message, .. }) => {
                assert_eq!(status, Some(401));
                assert!(message.contains("authorization failed"));
            }
            other => panic!("Expected Upstream error, got {other:?}"),
        }
    }
}
