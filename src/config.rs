//! Daemon configuration
//!
//! The daemon reads one YAML document at startup. Every section is optional;
//! a missing section disables the corresponding feature. [`DaemonConfig::validate`]
//! reports configuration errors before any ticker starts.

use std::path::Path;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::backend::BackendSpec;
use crate::janitor::{RetentionPolicy, DEFAULT_JANITOR_INTERVAL};
use crate::pki::CertWatchSpec;
use crate::recycle_bin::RecycleBinSpec;
use crate::{Error, DEFAULT_NAMESPACE};

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Snapshot settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSpec {
    /// Where snapshots are stored
    pub storage: BackendSpec,
}

/// Top-level daemon configuration document
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfig {
    /// Namespace used for Secret lookups
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Secret holding the notifier options (`notify_via` plus driver keys)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifier_secret_name: Option<String>,

    /// Snapshot storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<SnapshotSpec>,

    /// Archive-on-mutation settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recycle_bin: Option<RecycleBinSpec>,

    /// Certificate expiry watch settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_watch: Option<CertWatchSpec>,

    /// Time between janitor runs
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub janitor_interval: Option<Duration>,

    /// Retention policies
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub janitors: Vec<RetentionPolicy>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            notifier_secret_name: None,
            snapshot: None,
            recycle_bin: None,
            cert_watch: None,
            janitor_interval: None,
            janitors: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Parse a configuration document
    pub fn from_yaml(yaml: &str) -> crate::Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::serialization_for_kind("DaemonConfig", e.to_string()))
    }

    /// Read and parse a configuration file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_yaml(&yaml)
    }

    /// Janitor interval, or the 1h default
    pub fn janitor_interval(&self) -> Duration {
        self.janitor_interval.unwrap_or(DEFAULT_JANITOR_INTERVAL)
    }

    /// Whether any configured feature reads Kubernetes Secrets
    pub fn needs_secrets(&self) -> bool {
        self.notifier_secret_name.is_some()
            || !self.janitors.is_empty()
            || self
                .cert_watch
                .as_ref()
                .is_some_and(|c| c.secret_name.is_some())
    }

    /// Check every section, returning the first problem found
    pub fn validate(&self) -> crate::Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(Error::validation_for_field("namespace", "must not be empty"));
        }
        if matches!(&self.notifier_secret_name, Some(name) if name.trim().is_empty()) {
            return Err(Error::validation_for_field(
                "notifierSecretName",
                "must not be empty",
            ));
        }
        if let Some(snapshot) = &self.snapshot {
            snapshot.storage.validate()?;
        }
        if let Some(recycle_bin) = &self.recycle_bin {
            recycle_bin.validate()?;
        }
        if let Some(cert_watch) = &self.cert_watch {
            cert_watch.validate()?;
        }
        if self.janitor_interval().is_zero() {
            return Err(Error::validation_for_field(
                "janitorInterval",
                "must be greater than zero",
            ));
        }
        for policy in &self.janitors {
            policy.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use crate::janitor::JanitorKind;
    use std::path::PathBuf;

    const FULL: &str = r#"
namespace: ops
notifierSecretName: custodian-notifier
snapshot:
  storage:
    s3: { endpoint: s3.amazonaws.com, bucket: backups, prefix: cluster-a }
recycleBin:
  path: /var/lib/custodian/trash
  ttl: 7d
  handleUpdates: true
  sweepInterval: 30m
certWatch:
  secretName: cluster-ca
  checkInterval: 12h
  minRemaining: 14d
janitorInterval: 2h
janitors:
  - kind: elasticsearch
    ttl: 30d
    elasticsearch: { endpoint: "http://es:9200", logIndexPrefix: logstash-, secretName: es-auth }
  - kind: influxdb
    ttl: 90d
    influxdb: { endpoint: "http://influx:8086", secretName: influx-auth }
"#;

    #[test]
    fn full_document_parses_and_validates() {
        let config = DaemonConfig::from_yaml(FULL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.namespace, "ops");
        assert_eq!(
            config.snapshot.as_ref().unwrap().storage.kind().unwrap(),
            BackendKind::S3
        );
        let bin = config.recycle_bin.as_ref().unwrap();
        assert!(bin.handle_updates);
        assert_eq!(bin.sweep_interval(), Duration::from_secs(1800));
        assert_eq!(config.janitor_interval(), Duration::from_secs(7200));
        assert_eq!(
            config.janitors.iter().map(|j| j.kind).collect::<Vec<_>>(),
            vec![JanitorKind::Elasticsearch, JanitorKind::Influxdb]
        );
        assert!(config.needs_secrets());
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = DaemonConfig::from_yaml("{}").unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert_eq!(config.namespace, DEFAULT_NAMESPACE);
        assert_eq!(config.janitor_interval(), DEFAULT_JANITOR_INTERVAL);
        assert!(!config.needs_secrets());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn ambiguous_backend_fails_validation() {
        let config = DaemonConfig::from_yaml(
            r#"
snapshot:
  storage:
    local: { path: /backups }
    gcs: { bucket: backups }
"#,
        )
        .unwrap();
        assert_eq!(config.validate().unwrap_err().category(), crate::ErrorCategory::Configuration);
    }

    #[test]
    fn invalid_janitor_fails_validation() {
        let config = DaemonConfig::from_yaml(
            r#"
janitors:
  - kind: influxdb
    ttl: 1d
"#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(Error::Validation { .. })));
    }

    #[test]
    fn malformed_yaml_is_serialization_error() {
        let err = DaemonConfig::from_yaml("janitors: {not: [a list").unwrap_err();
        assert!(matches!(
            err,
            Error::Serialization { kind: Some(ref k), .. } if k == "DaemonConfig"
        ));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custodian.yaml");
        std::fs::write(&path, "recycleBin:\n  path: /trash\n").unwrap();

        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(
            config.recycle_bin.unwrap().path,
            PathBuf::from("/trash")
        );
        assert!(matches!(
            DaemonConfig::load(&dir.path().join("missing.yaml")),
            Err(Error::Io { .. })
        ));
    }
}
