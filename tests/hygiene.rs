//! End-to-end tests for the custodian library surface
//!
//! Everything here runs against local fixtures: a temp directory for the
//! recycle bin, a mock HTTP server for the notifier and janitors, and
//! certificates minted on the fly. Tests touching a live cluster are ignored
//! by default and can be run with:
//!
//! ```bash
//! cargo test --test hygiene -- --ignored
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use custodian::backend::{self, BackendKind};
use custodian::config::DaemonConfig;
use custodian::janitor::{Janitor, JanitorKind, RetentionPolicy};
use custodian::notifier::{Driver, NotifierDispatcher, NotifierOptions, NotifierRegistry};
use custodian::pki::{check_pem_at, CertSource};
use custodian::recycle_bin::RecycleBin;
use custodian::secrets::{SecretData, SecretSource};
use custodian::{Error, Result};

/// Driver that records what it was asked to send
#[derive(Default)]
struct RecordingDriver {
    sent: Arc<Mutex<Vec<String>>>,
    channel: Option<String>,
}

#[async_trait]
impl Driver for RecordingDriver {
    fn uid(&self) -> &'static str {
        "recording"
    }

    fn set_options(&mut self, options: &NotifierOptions) -> Result<()> {
        self.channel = Some(options.require("recording_channel")?.to_string());
        Ok(())
    }

    async fn notify(&self, body: &str) -> Result<()> {
        let channel = self.channel.as_deref().unwrap_or_default();
        self.sent
            .lock()
            .unwrap()
            .push(format!("{channel}: {body}"));
        Ok(())
    }
}

/// Secret reader backed by an in-memory map
struct StaticSecrets(BTreeMap<(String, String), SecretData>);

#[async_trait]
impl SecretSource for StaticSecrets {
    async fn secret_data(&self, namespace: &str, name: &str) -> Result<SecretData> {
        self.0
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::validation(format!("secret {namespace}/{name} not found")))
    }
}

// =============================================================================
// Story: A custom transport plugs into the same dispatch path as the builtins
// =============================================================================

#[tokio::test]
async fn custom_driver_is_dispatched_alongside_builtin_drivers() {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let mut registry = NotifierRegistry::with_builtin_drivers();
    let recorder = sent.clone();
    registry.register(
        "recording",
        Arc::new(move || {
            Box::new(RecordingDriver {
                sent: recorder.clone(),
                channel: None,
            }) as Box<dyn Driver>
        }),
    );
    let dispatcher = NotifierDispatcher::new(Arc::new(registry));

    let options = NotifierOptions::new()
        .with("notify_via", "recording")
        .with("recording_channel", "#ops");
    let uid = dispatcher
        .send_notification(&options, "CA expires in 3 days")
        .await
        .unwrap();

    assert_eq!(uid, "recording");
    assert_eq!(*sent.lock().unwrap(), vec!["#ops: CA expires in 3 days".to_string()]);
    assert!(dispatcher.registry().contains("smtp"));
}

#[tokio::test]
async fn slack_alert_reaches_the_webhook() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/custodian"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = NotifierDispatcher::new(Arc::new(NotifierRegistry::with_builtin_drivers()));
    let options = NotifierOptions::new()
        .with("notify_via", "slack")
        .with("slack_webhook_url", format!("{}/hooks/custodian", server.uri()));
    assert_eq!(
        dispatcher.send_notification(&options, "janitor failed").await.unwrap(),
        "slack"
    );
}

#[tokio::test]
async fn unknown_transport_is_reported_not_sent() {
    let dispatcher = NotifierDispatcher::new(Arc::new(NotifierRegistry::with_builtin_drivers()));
    let options = NotifierOptions::new().with("notify_via", "carrier-pigeon");
    let err = dispatcher.send_notification(&options, "hello").await.unwrap_err();
    assert!(matches!(err, Error::UnknownNotifier { ref uid } if uid == "carrier-pigeon"));
    assert!(!err.is_retryable());
}

// =============================================================================
// Story: A configuration document drives snapshot locations
// =============================================================================

#[test]
fn configured_backend_resolves_deterministically() {
    let config = DaemonConfig::from_yaml(
        r#"
snapshot:
  storage:
    azure: { container: backups, prefix: prod }
"#,
    )
    .unwrap();
    config.validate().unwrap();

    let storage = &config.snapshot.unwrap().storage;
    let at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
    let first = backend::resolve(storage, at).unwrap();
    let second = backend::resolve(storage, at).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.kind, BackendKind::Azure);
    assert_eq!(first.container, "backups");
    assert!(first.relative_path.starts_with("prod/"));
}

// =============================================================================
// Story: Deleted objects are archived and eventually swept
// =============================================================================

#[tokio::test]
async fn deleted_object_is_archived_then_swept() {
    let dir = tempfile::tempdir().unwrap();
    let bin = RecycleBin::new(dir.path()).with_ttl(Duration::from_secs(24 * 3600));
    let cm = ConfigMap {
        metadata: ObjectMeta {
            name: Some("feature-flags".to_string()),
            namespace: Some("shop".to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([("checkout".to_string(), "on".to_string())])),
        ..Default::default()
    };

    let record = bin.delete(&cm).await.unwrap();
    let restored: ConfigMap =
        serde_yaml::from_str(&std::fs::read_to_string(&record).unwrap()).unwrap();
    assert_eq!(restored.data, cm.data);

    assert!(bin.cleanup().removed.is_empty());
    let report = bin.cleanup_at(Utc::now() + chrono::Duration::days(2));
    assert_eq!(report.removed, vec![record]);
    assert!(report.is_clean());
}

// =============================================================================
// Story: Janitors are built from configuration and credentials
// =============================================================================

#[tokio::test]
async fn influxdb_janitor_from_config_alters_retention() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .and(query_param(
            "q",
            "ALTER RETENTION POLICY default ON k8s DURATION 604800s",
        ))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"results": [{}]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let policy: RetentionPolicy = serde_yaml::from_str(&format!(
        "kind: influxdb\nttl: 7d\ninfluxdb:\n  endpoint: {}\n  secretName: influx-auth\n",
        server.uri()
    ))
    .unwrap();
    let mut data = SecretData::new();
    data.insert("INFLUX_ADMIN_USER".to_string(), b"admin".to_vec());
    data.insert("INFLUX_ADMIN_PASSWORD".to_string(), b"pw".to_vec());
    let secrets = StaticSecrets(BTreeMap::from([(
        ("kube-system".to_string(), "influx-auth".to_string()),
        data,
    )]));

    let janitor: Box<dyn Janitor> =
        custodian::janitor::build_janitor(&policy, &secrets, "kube-system")
            .await
            .unwrap();
    assert_eq!(janitor.kind(), JanitorKind::Influxdb);
    janitor.cleanup(Utc::now()).await.unwrap();
}

#[tokio::test]
async fn missing_janitor_secret_fails_the_build() {
    let policy: RetentionPolicy = serde_yaml::from_str(concat!(
        "kind: elasticsearch\n",
        "ttl: 30d\n",
        "elasticsearch:\n",
        "  endpoint: http://es:9200\n",
        "  logIndexPrefix: logs-\n",
        "  secretName: absent\n",
    ))
    .unwrap();
    let secrets = StaticSecrets(BTreeMap::new());
    assert!(custodian::janitor::build_janitor(&policy, &secrets, "kube-system")
        .await
        .is_err());
}

// =============================================================================
// Story: Certificate verdicts feed alert bodies
// =============================================================================

#[test]
fn expiring_certificate_produces_alert_summary() {
    let now = Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap();
    let mut params = rcgen::CertificateParams::new(vec!["ca.local".to_string()]).unwrap();
    params.not_before = time::OffsetDateTime::from_unix_timestamp(now.timestamp() - 86400).unwrap();
    params.not_after =
        time::OffsetDateTime::from_unix_timestamp(now.timestamp() + 3 * 86400).unwrap();
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let pem = params.self_signed(&key_pair).unwrap().pem();

    let verdict = check_pem_at(pem.as_bytes(), now, Duration::from_secs(7 * 86400)).unwrap();
    assert!(verdict.soon_expiring);
    assert_eq!(verdict.expires_in_days, 3);

    let summary = verdict.summary(&CertSource::File {
        path: "/etc/kubernetes/pki/ca.crt".into(),
    });
    assert!(summary.contains("expires in 3 days"));
    assert!(summary.contains("/etc/kubernetes/pki/ca.crt"));
}

// =============================================================================
// Live cluster
// =============================================================================

#[tokio::test]
#[ignore = "requires a Kubernetes cluster"]
async fn kube_secret_source_reads_from_cluster() {
    let client = kube::Client::try_default().await.unwrap();
    let source = custodian::secrets::KubeSecretSource::new(client);
    let name = std::env::var("CUSTODIAN_TEST_SECRET")
        .unwrap_or_else(|_| "custodian-notifier".to_string());
    let data = source.secret_data("kube-system", &name).await.unwrap();
    assert!(!data.is_empty());
}
