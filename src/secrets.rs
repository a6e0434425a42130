//! Access to Kubernetes Secret data
//!
//! The certificate watcher, the janitors and the notifier wiring all read
//! Secret data. They go through [`SecretSource`] so tests can substitute an
//! in-memory implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::{Error, Result};

/// Decoded Secret data, keyed by data key
pub type SecretData = BTreeMap<String, Vec<u8>>;

/// Trait for reading Secret data
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretSource: Send + Sync {
    /// Fetch all data entries of a Secret
    async fn secret_data(&self, namespace: &str, name: &str) -> Result<SecretData>;
}

/// Read one entry of a Secret as UTF-8
pub async fn secret_string(
    source: &dyn SecretSource,
    namespace: &str,
    name: &str,
    key: &str,
) -> Result<String> {
    let data = source.secret_data(namespace, name).await?;
    let bytes = data.get(key).ok_or_else(|| {
        Error::validation(format!("secret {namespace}/{name} has no key {key}"))
    })?;
    String::from_utf8(bytes.clone()).map_err(|e| {
        Error::serialization_for_kind("Secret", format!("{namespace}/{name}[{key}]: {e}"))
    })
}

/// Read every entry of a Secret as UTF-8, skipping binary values
pub async fn secret_strings(
    source: &dyn SecretSource,
    namespace: &str,
    name: &str,
) -> Result<BTreeMap<String, String>> {
    let data = source.secret_data(namespace, name).await?;
    let mut out = BTreeMap::new();
    for (key, bytes) in data {
        match String::from_utf8(bytes) {
            Ok(value) => {
                out.insert(key, value);
            }
            Err(_) => debug!(secret = %name, key = %key, "Skipping non UTF-8 secret entry"),
        }
    }
    Ok(out)
}

/// [`SecretSource`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeSecretSource {
    client: Client,
}

impl KubeSecretSource {
    /// Create a source using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretSource for KubeSecretSource {
    async fn secret_data(&self, namespace: &str, name: &str) -> Result<SecretData> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api.get(name).await?;

        let mut data: SecretData = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect();
        // stringData is write-only on the API server, but fixtures and dry runs carry it
        for (k, v) in secret.string_data.unwrap_or_default() {
            data.entry(k).or_insert_with(|| v.into_bytes());
        }
        Ok(data)
    }
}
