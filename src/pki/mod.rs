//! CA certificate expiry watch
//!
//! The watcher reads a PEM certificate from a file or a Kubernetes Secret on a
//! fixed interval and classifies it as soon-to-expire or not. It does not
//! alert by itself: every verdict (or the error of a failed tick) is sent to
//! the caller, which typically feeds soon-expiring verdicts into the
//! notifier dispatcher.
//!
//! A failed tick never stops the watch. A permission problem on the file or
//! an unreachable API server only costs that one check.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use x509_parser::prelude::*;

use crate::secrets::{secret_string, SecretSource};
use crate::{ticker, Error, DEFAULT_CA_CERT_KEY, DEFAULT_CA_CERT_PATH, SECONDS_PER_DAY};

/// Default time between checks (24 hours)
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default warning threshold (7 days)
pub const DEFAULT_MIN_REMAINING: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Where the certificate is read from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CertSource {
    /// A PEM file on local disk
    File {
        /// Path to the PEM file
        path: PathBuf,
    },
    /// One entry of a Kubernetes Secret
    Secret {
        /// Secret namespace
        namespace: String,
        /// Secret name
        name: String,
        /// Data key holding the PEM certificate
        key: String,
    },
}

impl std::fmt::Display for CertSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File { path } => write!(f, "file:{}", path.display()),
            Self::Secret {
                namespace,
                name,
                key,
            } => write!(f, "secret:{namespace}/{name}[{key}]"),
        }
    }
}

/// Certificate watch configuration
///
/// Setting `secretName` selects the Secret source; otherwise `path` (or the
/// service account CA bundle) is read.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertWatchSpec {
    /// PEM file to check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Secret holding the certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    /// Secret namespace (defaults to the daemon namespace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_namespace: Option<String>,

    /// Secret data key (defaults to `ca.crt`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,

    /// Time between checks
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub check_interval: Option<Duration>,

    /// Certificates with less validity left than this are reported as soon expiring
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub min_remaining: Option<Duration>,
}

impl CertWatchSpec {
    /// Resolve the certificate source, defaulting Secret namespace to `namespace`
    pub fn source(&self, namespace: &str) -> CertSource {
        match &self.secret_name {
            Some(name) => CertSource::Secret {
                namespace: self
                    .secret_namespace
                    .clone()
                    .unwrap_or_else(|| namespace.to_string()),
                name: name.clone(),
                key: self
                    .secret_key
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CA_CERT_KEY.to_string()),
            },
            None => CertSource::File {
                path: self
                    .path
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CA_CERT_PATH)),
            },
        }
    }

    /// Check interval, or the 24h default
    pub fn check_interval(&self) -> Duration {
        self.check_interval.unwrap_or(DEFAULT_CHECK_INTERVAL)
    }

    /// Warning threshold, or the 7 day default
    pub fn min_remaining(&self) -> Duration {
        self.min_remaining.unwrap_or(DEFAULT_MIN_REMAINING)
    }

    /// Validate the spec before the watcher starts
    pub fn validate(&self) -> crate::Result<()> {
        if self.path.is_some() && self.secret_name.is_some() {
            return Err(Error::validation_for_field(
                "certWatch",
                "set either path or secretName, not both",
            ));
        }
        if matches!(&self.secret_name, Some(name) if name.trim().is_empty()) {
            return Err(Error::validation_for_field(
                "certWatch.secretName",
                "must not be empty",
            ));
        }
        if self.check_interval().is_zero() {
            return Err(Error::validation_for_field(
                "certWatch.checkInterval",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Outcome of one certificate check
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertVerdict {
    /// Whole days of validity left, rounded down (negative once expired)
    pub expires_in_days: i64,
    /// Whether less than the configured minimum validity remains
    pub soon_expiring: bool,
    /// The certificate's `notAfter`
    pub not_after: DateTime<Utc>,
    /// Validity left at check time (negative once expired)
    pub remaining: chrono::Duration,
    /// Subject common name, empty when the certificate has none
    pub common_name: String,
}

impl CertVerdict {
    /// Human-readable one-line summary, suitable as a notification body
    pub fn summary(&self, source: &CertSource) -> String {
        let subject = if self.common_name.is_empty() {
            String::new()
        } else {
            format!(" ({})", self.common_name)
        };
        if self.expires_in_days < 0 || (self.expires_in_days == 0 && self.soon_expiring) {
            format!(
                "Certificate {source}{subject} expired or expires today ({})",
                self.not_after.to_rfc3339()
            )
        } else {
            format!(
                "Certificate {source}{subject} expires in {} days ({})",
                self.expires_in_days,
                self.not_after.to_rfc3339()
            )
        }
    }
}

/// Decode one PEM block and return its DER bytes
pub fn parse_pem(pem_data: &[u8]) -> crate::Result<Vec<u8>> {
    let block = ::pem::parse(pem_data)
        .map_err(|e| Error::certificate_unparsable(format!("failed to decode PEM block: {e}")))?;
    Ok(block.into_contents())
}

/// Classify a PEM certificate against `now`
///
/// `soon_expiring` is `not_after - now < min_remaining`; `expires_in_days` is
/// that remaining time divided by 24h, rounded toward negative infinity.
pub fn check_pem_at(
    pem_data: &[u8],
    now: DateTime<Utc>,
    min_remaining: Duration,
) -> crate::Result<CertVerdict> {
    let der = parse_pem(pem_data)?;
    let (_, cert) = X509Certificate::from_der(&der)
        .map_err(|e| Error::certificate_invalid(format!("failed to parse certificate: {e}")))?;

    let not_after_secs = cert.validity().not_after.timestamp();
    let not_after = Utc
        .timestamp_opt(not_after_secs, 0)
        .single()
        .ok_or_else(|| {
            Error::certificate_invalid(format!("notAfter out of range: {not_after_secs}"))
        })?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or("")
        .to_string();

    let remaining_secs = not_after_secs - now.timestamp();
    let min_secs = i64::try_from(min_remaining.as_secs()).unwrap_or(i64::MAX);

    Ok(CertVerdict {
        expires_in_days: remaining_secs.div_euclid(SECONDS_PER_DAY),
        soon_expiring: remaining_secs < min_secs,
        not_after,
        remaining: chrono::Duration::seconds(remaining_secs),
        common_name,
    })
}

/// Periodically checks one certificate
pub struct CertExpiryWatcher {
    source: CertSource,
    secrets: Option<Arc<dyn SecretSource>>,
    check_interval: Duration,
    min_remaining: Duration,
}

impl CertExpiryWatcher {
    /// Create a watcher with the default interval and threshold
    pub fn new(source: CertSource) -> Self {
        Self {
            source,
            secrets: None,
            check_interval: DEFAULT_CHECK_INTERVAL,
            min_remaining: DEFAULT_MIN_REMAINING,
        }
    }

    /// Create a watcher from configuration
    pub fn from_spec(spec: &CertWatchSpec, namespace: &str) -> Self {
        Self::new(spec.source(namespace))
            .with_check_interval(spec.check_interval())
            .with_min_remaining(spec.min_remaining())
    }

    /// Set the Secret reader used by [`CertSource::Secret`]
    pub fn with_secrets(mut self, secrets: Arc<dyn SecretSource>) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Set the time between checks; `run` raises zero to
    /// [`crate::MIN_TICK_INTERVAL`]
    pub fn with_check_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    /// Set the warning threshold
    pub fn with_min_remaining(mut self, min_remaining: Duration) -> Self {
        self.min_remaining = min_remaining;
        self
    }

    /// The certificate source being watched
    pub fn source(&self) -> &CertSource {
        &self.source
    }

    /// Read the certificate bytes from the configured source
    pub async fn load(&self) -> crate::Result<Vec<u8>> {
        match &self.source {
            CertSource::File { path } => tokio::fs::read(path)
                .await
                .map_err(|e| Error::io(path.clone(), e)),
            CertSource::Secret {
                namespace,
                name,
                key,
            } => {
                let secrets = self.secrets.as_deref().ok_or_else(|| {
                    Error::validation(
                        "certificate source is a Secret but no Secret reader is configured",
                    )
                })?;
                secret_string(secrets, namespace, name, key)
                    .await
                    .map(String::into_bytes)
            }
        }
    }

    /// Run one check against the current time
    pub async fn check(&self) -> crate::Result<CertVerdict> {
        let pem_data = self.load().await?;
        check_pem_at(&pem_data, Utc::now(), self.min_remaining)
    }

    /// Check immediately, then once per interval until shut down
    ///
    /// Every result is sent on `verdicts`. The loop ends when `shutdown`
    /// fires (or its sender is dropped) or when the receiver of `verdicts`
    /// goes away. A check that is already running finishes first.
    pub async fn run(
        self,
        verdicts: mpsc::Sender<crate::Result<CertVerdict>>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        info!(
            source = %self.source,
            interval_secs = self.check_interval.as_secs(),
            min_remaining_secs = self.min_remaining.as_secs(),
            "Starting certificate expiry watch"
        );

        let mut ticker = ticker(self.check_interval);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    debug!(source = %self.source, "Certificate expiry watch stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let result = self.check().await;
                    match &result {
                        Ok(v) if v.soon_expiring => warn!(
                            source = %self.source,
                            days = v.expires_in_days,
                            not_after = %v.not_after,
                            "Certificate expires soon"
                        ),
                        Ok(v) => debug!(
                            source = %self.source,
                            days = v.expires_in_days,
                            "Certificate validity ok"
                        ),
                        Err(e) => error!(
                            source = %self.source,
                            error = %e,
                            "Certificate check failed"
                        ),
                    }
                    if verdicts.send(result).await.is_err() {
                        debug!("Verdict receiver closed, stopping certificate watch");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::{MockSecretSource, SecretData};
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

    /// A fixed "now" with whole seconds, as X.509 validity has second precision
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn cert_expiring_at(not_after: DateTime<Utc>) -> String {
        let mut params = CertificateParams::new(vec!["ca.cluster.local".to_string()]).unwrap();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "kubernetes-ca");
        params.distinguished_name = dn;
        params.not_before = ::time::OffsetDateTime::from_unix_timestamp(
            not_after.timestamp() - 365 * SECONDS_PER_DAY,
        )
        .unwrap();
        params.not_after =
            ::time::OffsetDateTime::from_unix_timestamp(not_after.timestamp()).unwrap();

        let key_pair = KeyPair::generate().unwrap();
        params.self_signed(&key_pair).unwrap().pem()
    }

    fn seven_days() -> Duration {
        Duration::from_secs(7 * 24 * 60 * 60)
    }

    // ==========================================================================
    // Story: Classification at the threshold boundary
    // ==========================================================================

    #[test]
    fn just_under_seven_days_is_soon_expiring() {
        let not_after = now()
            + chrono::Duration::days(6)
            + chrono::Duration::hours(23)
            + chrono::Duration::seconds(59);
        let pem = cert_expiring_at(not_after);

        let verdict = check_pem_at(pem.as_bytes(), now(), seven_days()).unwrap();
        assert!(verdict.soon_expiring);
        assert_eq!(verdict.expires_in_days, 6);
        assert_eq!(verdict.not_after, not_after);
        assert_eq!(verdict.common_name, "kubernetes-ca");
    }

    #[test]
    fn one_second_short_of_threshold_is_soon_expiring() {
        let not_after = now() + chrono::Duration::days(7) - chrono::Duration::seconds(1);
        let verdict =
            check_pem_at(cert_expiring_at(not_after).as_bytes(), now(), seven_days()).unwrap();
        assert!(verdict.soon_expiring);
        assert_eq!(verdict.expires_in_days, 6);
    }

    #[test]
    fn exactly_at_threshold_is_not_soon_expiring() {
        let not_after = now() + chrono::Duration::days(7);
        let verdict =
            check_pem_at(cert_expiring_at(not_after).as_bytes(), now(), seven_days()).unwrap();
        assert!(!verdict.soon_expiring);
        assert_eq!(verdict.expires_in_days, 7);
        assert_eq!(verdict.remaining, chrono::Duration::days(7));
    }

    #[test]
    fn eight_days_is_not_soon_expiring() {
        let not_after = now() + chrono::Duration::days(8);
        let verdict =
            check_pem_at(cert_expiring_at(not_after).as_bytes(), now(), seven_days()).unwrap();
        assert!(!verdict.soon_expiring);
        assert_eq!(verdict.expires_in_days, 8);
    }

    #[test]
    fn expired_certificate_has_negative_days() {
        let not_after = now() - chrono::Duration::hours(1);
        let verdict =
            check_pem_at(cert_expiring_at(not_after).as_bytes(), now(), seven_days()).unwrap();
        assert!(verdict.soon_expiring);
        assert_eq!(verdict.expires_in_days, -1);
        assert!(verdict
            .summary(&CertSource::File {
                path: PathBuf::from("/tmp/ca.crt")
            })
            .contains("expired"));
    }

    // ==========================================================================
    // Story: Garbage never yields a verdict
    // ==========================================================================

    #[test]
    fn bytes_without_pem_block_are_unparsable() {
        let err = check_pem_at(b"definitely not a certificate", now(), seven_days()).unwrap_err();
        assert!(matches!(err, Error::CertificateUnparsable { .. }));
    }

    #[test]
    fn pem_block_with_bad_der_is_invalid() {
        let bogus = ::pem::encode(&::pem::Pem::new(
            "CERTIFICATE",
            vec![0x30, 0x03, 0x01, 0x02, 0x03],
        ));
        let err = check_pem_at(bogus.as_bytes(), now(), seven_days()).unwrap_err();
        assert!(matches!(err, Error::CertificateInvalid { .. }));
    }

    // ==========================================================================
    // Story: Both certificate sources are supported
    // ==========================================================================

    #[tokio::test]
    async fn file_source_is_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ca.crt");
        std::fs::write(&path, cert_expiring_at(Utc::now() + chrono::Duration::days(365))).unwrap();

        let watcher = CertExpiryWatcher::new(CertSource::File { path });
        let verdict = watcher.check().await.unwrap();
        assert!(!verdict.soon_expiring);
        assert!(verdict.expires_in_days >= 363);
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let watcher = CertExpiryWatcher::new(CertSource::File {
            path: PathBuf::from("/nonexistent/custodian/ca.crt"),
        });
        let err = watcher.check().await.unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn secret_source_reads_the_configured_key() {
        let pem =
            cert_expiring_at(Utc::now() + chrono::Duration::days(2) - chrono::Duration::hours(1));
        let mut secrets = MockSecretSource::new();
        secrets
            .expect_secret_data()
            .withf(|ns, name| ns == "kube-system" && name == "cluster-ca")
            .times(1)
            .returning(move |_, _| {
                let mut data = SecretData::new();
                data.insert("tls.crt".to_string(), pem.clone().into_bytes());
                Ok(data)
            });

        let spec = CertWatchSpec {
            secret_name: Some("cluster-ca".to_string()),
            secret_key: Some("tls.crt".to_string()),
            ..Default::default()
        };
        let watcher =
            CertExpiryWatcher::from_spec(&spec, "kube-system").with_secrets(Arc::new(secrets));
        let verdict = watcher.check().await.unwrap();
        assert!(verdict.soon_expiring);
        assert_eq!(verdict.expires_in_days, 1);
    }

    #[tokio::test]
    async fn secret_without_the_key_is_configuration_error() {
        let mut secrets = MockSecretSource::new();
        secrets.expect_secret_data().returning(|_, _| {
            let mut data = SecretData::new();
            data.insert("tls.key".to_string(), b"not a cert".to_vec());
            Ok(data)
        });

        let watcher = CertExpiryWatcher::new(CertSource::Secret {
            namespace: "kube-system".to_string(),
            name: "cluster-ca".to_string(),
            key: "tls.crt".to_string(),
        })
        .with_secrets(Arc::new(secrets));
        match watcher.load().await {
            Err(Error::Validation { message, .. }) => {
                assert!(message.contains("kube-system/cluster-ca"));
                assert!(message.contains("tls.crt"));
            }
            other => panic!("Expected Validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn secret_source_without_reader_is_configuration_error() {
        let watcher = CertExpiryWatcher::new(CertSource::Secret {
            namespace: "ns".to_string(),
            name: "ca".to_string(),
            key: "ca.crt".to_string(),
        });
        assert!(matches!(watcher.check().await, Err(Error::Validation { .. })));
    }

    // ==========================================================================
    // Story: The watch loop survives failures and stops on request
    // ==========================================================================

    #[tokio::test]
    async fn failed_ticks_do_not_stop_the_watch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ca.crt");

        let watcher = CertExpiryWatcher::new(CertSource::File { path: path.clone() })
            .with_check_interval(Duration::from_millis(20));
        let (tx, mut rx) = mpsc::channel(8);
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(watcher.run(tx, stop_rx));

        // First tick fires immediately and fails: the file does not exist yet
        let first = rx.recv().await.expect("first verdict");
        assert!(matches!(first, Err(Error::Io { .. })));

        std::fs::write(&path, cert_expiring_at(Utc::now() + chrono::Duration::days(30))).unwrap();

        let mut recovered = false;
        for _ in 0..50 {
            if let Some(Ok(verdict)) = rx.recv().await {
                assert!(!verdict.soon_expiring);
                recovered = true;
                break;
            }
        }
        assert!(recovered, "watch should recover once the file appears");

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("watch stops after shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn zero_check_interval_does_not_panic() {
        let watcher = CertExpiryWatcher::new(CertSource::File {
            path: PathBuf::from("/nonexistent/ca.crt"),
        })
        .with_check_interval(Duration::ZERO);
        let (tx, mut rx) = mpsc::channel(8);
        let (_stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(watcher.run(tx, stop_rx));

        assert!(matches!(rx.recv().await, Some(Err(Error::Io { .. }))));
        assert!(matches!(rx.recv().await, Some(Err(Error::Io { .. }))));

        drop(rx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("watch ends when nobody listens")
            .expect("watch should not panic");
    }

    #[tokio::test]
    async fn dropping_the_receiver_stops_the_watch() {
        let watcher = CertExpiryWatcher::new(CertSource::File {
            path: PathBuf::from("/nonexistent/ca.crt"),
        })
        .with_check_interval(Duration::from_millis(10));
        let (tx, rx) = mpsc::channel(1);
        let (_stop_tx, stop_rx) = oneshot::channel();
        drop(rx);

        tokio::time::timeout(Duration::from_secs(5), watcher.run(tx, stop_rx))
            .await
            .expect("watch ends when nobody listens");
    }

    // ==========================================================================
    // Story: Configuration
    // ==========================================================================

    #[test]
    fn spec_defaults_to_service_account_ca() {
        let spec = CertWatchSpec::default();
        assert_eq!(
            spec.source("kube-system"),
            CertSource::File {
                path: PathBuf::from(DEFAULT_CA_CERT_PATH)
            }
        );
        assert_eq!(spec.check_interval(), DEFAULT_CHECK_INTERVAL);
        assert_eq!(spec.min_remaining(), DEFAULT_MIN_REMAINING);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn spec_parses_humantime_durations() {
        let spec: CertWatchSpec = serde_yaml::from_str(
            r#"
secretName: cluster-ca
checkInterval: 12h
minRemaining: 14days
"#,
        )
        .unwrap();
        assert_eq!(spec.check_interval(), Duration::from_secs(12 * 3600));
        assert_eq!(spec.min_remaining(), Duration::from_secs(14 * 24 * 3600));
        assert_eq!(
            spec.source("monitoring"),
            CertSource::Secret {
                namespace: "monitoring".to_string(),
                name: "cluster-ca".to_string(),
                key: "ca.crt".to_string(),
            }
        );
    }

    #[test]
    fn spec_rejects_both_sources() {
        let spec = CertWatchSpec {
            path: Some(PathBuf::from("/etc/ca.crt")),
            secret_name: Some("ca".to_string()),
            ..Default::default()
        };
        assert!(matches!(spec.validate(), Err(Error::Validation { .. })));
    }
}
