//! Elasticsearch index retention
//!
//! Log shippers write one index per day, named `<prefix><YYYY.MM.DD>`. The
//! janitor lists indices under the prefix, keeps anything it cannot date, and
//! deletes the rest in a single request once their day is older than the TTL.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use tracing::{debug, info};

use super::{Janitor, JanitorKind};
use crate::http::{check_response, http_client, request_error};
use crate::{Error, Result};

const SYSTEM: &str = "elasticsearch";

/// Secret key holding the basic-auth user
pub const USERNAME_KEY: &str = "ADMIN_USERNAME";

/// Secret key holding the basic-auth password
pub const PASSWORD_KEY: &str = "ADMIN_PASSWORD";

/// Date suffix of daily indices
pub const INDEX_DATE_FORMAT: &str = "%Y.%m.%d";

/// Select the indices whose date suffix is before `now - ttl`
///
/// Names that do not start with `prefix` or whose suffix is not a date are
/// never selected.
pub fn expired_indices(
    names: &[String],
    prefix: &str,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Vec<String> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    let Some(cutoff) = now.checked_sub_signed(ttl).map(|t| t.date_naive()) else {
        return Vec::new();
    };

    names
        .iter()
        .filter(|name| {
            name.strip_prefix(prefix)
                .and_then(|suffix| NaiveDate::parse_from_str(suffix, INDEX_DATE_FORMAT).ok())
                .is_some_and(|date| date < cutoff)
        })
        .cloned()
        .collect()
}

/// Index listing and deletion
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IndexClient: Send + Sync {
    /// Names of every index starting with `prefix`
    async fn list_indices(&self, prefix: &str) -> Result<Vec<String>>;

    /// Delete the named indices
    async fn delete_indices(&self, names: &[String]) -> Result<()>;
}

#[derive(Deserialize)]
struct CatIndex {
    index: String,
}

/// [`IndexClient`] over the Elasticsearch REST API
pub struct HttpIndexClient {
    endpoint: String,
    username: Option<String>,
    password: Option<String>,
    client: reqwest::Client,
}

impl HttpIndexClient {
    /// Create a client for `endpoint` (e.g. `http://elasticsearch:9200`)
    pub fn new(endpoint: &str) -> Result<Self> {
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
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

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_ref()),
            None => request,
        }
    }
}

#[async_trait]
impl IndexClient for HttpIndexClient {
    async fn list_indices(&self, prefix: &str) -> Result<Vec<String>> {
        let url = format!("{}/_cat/indices/{}*", self.endpoint, prefix);
        let response = self
            .authorize(self.client.get(&url))
            .query(&[("format", "json"), ("h", "index")])
            .send()
            .await
            .map_err(|e| request_error(SYSTEM, e))?;
        let indices: Vec<CatIndex> = check_response(SYSTEM, response)
            .await?
            .json()
            .await
            .map_err(|e| Error::upstream(SYSTEM, format!("unexpected index listing: {e}")))?;
        Ok(indices.into_iter().map(|i| i.index).collect())
    }

    async fn delete_indices(&self, names: &[String]) -> Result<()> {
        let url = format!("{}/{}", self.endpoint, names.join(","));
        let response = self
            .authorize(self.client.delete(&url))
            .send()
            .await
            .map_err(|e| request_error(SYSTEM, e))?;
        check_response(SYSTEM, response).await?;
        Ok(())
    }
}

/// Deletes daily indices older than the TTL
pub struct ElasticsearchJanitor {
    client: Box<dyn IndexClient>,
    prefix: String,
    ttl: Duration,
}

impl ElasticsearchJanitor {
    /// Create a janitor for indices named `<prefix><YYYY.MM.DD>`
    pub fn new(client: Box<dyn IndexClient>, prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            client,
            prefix: prefix.into(),
            ttl,
        }
    }
}

#[async_trait]
impl Janitor for ElasticsearchJanitor {
    fn kind(&self) -> JanitorKind {
        JanitorKind::Elasticsearch
    }

    async fn cleanup(&self, now: DateTime<Utc>) -> Result<()> {
        let names = self.client.list_indices(&self.prefix).await?;
        let expired = expired_indices(&names, &self.prefix, self.ttl, now);
        if expired.is_empty() {
            debug!(prefix = %self.prefix, listed = names.len(), "No expired indices");
            return Ok(());
        }

        self.client.delete_indices(&expired).await?;
        info!(prefix = %self.prefix, deleted = expired.len(), "Deleted expired indices");
        Ok(())
    }
}
