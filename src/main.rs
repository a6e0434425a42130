//! Custodian - operational hygiene sidecar for Kubernetes clusters

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use kube::Client;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use custodian::backend;
use custodian::config::DaemonConfig;
use custodian::janitor::{self, build_janitor, Janitor, JanitorFailure};
use custodian::notifier::{NotifierDispatcher, NotifierOptions, NotifierRegistry};
use custodian::pki::{CertExpiryWatcher, CertVerdict};
use custodian::recycle_bin::RecycleBin;
use custodian::secrets::{secret_strings, KubeSecretSource, SecretSource};

/// Configuration file read when no subcommand is given
const DEFAULT_CONFIG_PATH: &str = "/etc/custodian/config.yaml";

/// Custodian - certificate expiry alerts, object archiving and retention enforcement
#[derive(Parser, Debug)]
#[command(name = "custodian", version, about, long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, global = true, value_enum, env = "CUSTODIAN_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the daemon (default mode)
    ///
    /// Starts the certificate expiry watch, the recycle bin sweeper and the
    /// retention janitors configured in the file, and routes alerts through
    /// the notifier configured in `notifierSecretName`.
    Run(RunArgs),

    /// Print where the configured snapshot backend stores a snapshot
    Locate(LocateArgs),

    /// Send one message through the notifier dispatcher
    Notify(NotifyArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the daemon configuration file
    #[arg(
        short = 'f',
        long = "config",
        env = "CUSTODIAN_CONFIG",
        default_value = DEFAULT_CONFIG_PATH
    )]
    config: PathBuf,
}

#[derive(Parser, Debug)]
struct LocateArgs {
    /// Path to the daemon configuration file
    #[arg(
        short = 'f',
        long = "config",
        env = "CUSTODIAN_CONFIG",
        default_value = DEFAULT_CONFIG_PATH
    )]
    config: PathBuf,

    /// Snapshot time (RFC3339), defaults to now
    #[arg(long)]
    at: Option<String>,
}

#[derive(Parser, Debug)]
struct NotifyArgs {
    /// YAML map of notifier options, including `notify_via`
    #[arg(long)]
    options: PathBuf,

    /// Message body
    message: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Both kube and reqwest use rustls; pin the provider before any TLS handshake
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Some(Commands::Run(args)) => run_daemon(&args.config).await,
        Some(Commands::Locate(args)) => run_locate(args),
        Some(Commands::Notify(args)) => run_notify(args).await,
        None => {
            let config = std::env::var("CUSTODIAN_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
            run_daemon(&config).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init(),
    }
}

fn load_config(path: &Path) -> anyhow::Result<DaemonConfig> {
    let config = DaemonConfig::load(path)
        .map_err(|e| anyhow::anyhow!("Failed to load config {}: {}", path.display(), e))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid config {}: {}", path.display(), e))?;
    Ok(config)
}

/// Resolve and print the snapshot location
fn run_locate(args: LocateArgs) -> anyhow::Result<()> {
    let config = load_config(&args.config)?;
    let at: DateTime<Utc> = match args.at {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map_err(|e| anyhow::anyhow!("Invalid --at {:?}: {}", raw, e))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };
    let storage = config.snapshot.map(|s| s.storage).unwrap_or_default();
    let location = backend::resolve(&storage, at)?;

    println!("backend: {}", location.kind);
    println!("container: {}", location.container);
    println!("path: {}", location.relative_path);
    Ok(())
}

/// Send a single message using options from a YAML file
async fn run_notify(args: NotifyArgs) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&args.options).map_err(|e| {
        anyhow::anyhow!("Failed to read options file {}: {}", args.options.display(), e)
    })?;
    let map: BTreeMap<String, String> = serde_yaml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("Failed to parse notifier options: {}", e))?;

    let dispatcher = NotifierDispatcher::new(Arc::new(NotifierRegistry::with_builtin_drivers()));
    let uid = dispatcher
        .send_notification(&NotifierOptions::from(map), &args.message)
        .await?;
    tracing::info!(driver = %uid, "Notification sent");
    Ok(())
}

/// Routes alert bodies to the notifier configured in a Secret
///
/// The Secret is read for every alert so rotated credentials apply without a
/// restart. Without a configured Secret alerts are only logged.
fn spawn_alert_router(
    mut alerts: mpsc::Receiver<String>,
    dispatcher: NotifierDispatcher,
    secrets: Option<Arc<dyn SecretSource>>,
    namespace: String,
    secret_name: Option<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(body) = alerts.recv().await {
            let (Some(secrets), Some(name)) = (&secrets, &secret_name) else {
                tracing::warn!(alert = %body, "No notifier configured, alert only logged");
                continue;
            };
            let options = match secret_strings(secrets.as_ref(), &namespace, name).await {
                Ok(map) => NotifierOptions::from(map),
                Err(e) => {
                    tracing::error!(error = %e, secret = %name, "Failed to read notifier options");
                    continue;
                }
            };
            if let Err(e) = dispatcher.send_notification(&options, &body).await {
                tracing::error!(error = %e, category = %e.category(), "Failed to send alert");
            }
        }
    })
}

/// Run the daemon until Ctrl-C
async fn run_daemon(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    tracing::info!(
        config = %config_path.display(),
        namespace = %config.namespace,
        "Starting custodian"
    );

    let secrets: Option<Arc<dyn SecretSource>> = if config.needs_secrets() {
        let client = Client::try_default()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;
        let source: Arc<dyn SecretSource> = Arc::new(KubeSecretSource::new(client));
        Some(source)
    } else {
        None
    };

    if let Some(snapshot) = &config.snapshot {
        let location = backend::resolve(&snapshot.storage, Utc::now())?;
        tracing::info!(
            backend = %location.kind,
            container = %location.container,
            path = %location.relative_path,
            "Snapshot backend configured"
        );
    }

    let registry = Arc::new(NotifierRegistry::with_builtin_drivers());
    tracing::debug!(drivers = ?registry.uids(), "Notifier drivers registered");
    let (alert_tx, alert_rx) = mpsc::channel::<String>(32);
    let router = spawn_alert_router(
        alert_rx,
        NotifierDispatcher::new(registry),
        secrets.clone(),
        config.namespace.clone(),
        config.notifier_secret_name.clone(),
    );

    let mut stops: Vec<oneshot::Sender<()>> = Vec::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    if let Some(spec) = &config.cert_watch {
        let mut watcher = CertExpiryWatcher::from_spec(spec, &config.namespace);
        if let Some(secrets) = &secrets {
            watcher = watcher.with_secrets(secrets.clone());
        }
        let source = watcher.source().clone();
        let (verdict_tx, mut verdict_rx) = mpsc::channel::<custodian::Result<CertVerdict>>(4);
        let (stop_tx, stop_rx) = oneshot::channel();
        stops.push(stop_tx);
        tasks.push(tokio::spawn(watcher.run(verdict_tx, stop_rx)));

        let alerts = alert_tx.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(result) = verdict_rx.recv().await {
                if let Ok(verdict) = result {
                    if verdict.soon_expiring
                        && alerts.send(verdict.summary(&source)).await.is_err()
                    {
                        break;
                    }
                }
            }
        }));
    }

    if let Some(spec) = &config.recycle_bin {
        let bin = RecycleBin::from_spec(spec);
        let (stop_tx, stop_rx) = oneshot::channel();
        stops.push(stop_tx);
        tasks.push(tokio::spawn(bin.run(spec.sweep_interval(), stop_rx)));
    }

    if !config.janitors.is_empty() {
        let secrets = secrets
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Janitors require a Kubernetes client"))?;
        let mut janitors: Vec<Arc<dyn Janitor>> = Vec::with_capacity(config.janitors.len());
        for policy in &config.janitors {
            let janitor = build_janitor(policy, secrets.as_ref(), &config.namespace)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to build {} janitor: {}", policy.kind, e))?;
            janitors.push(Arc::from(janitor));
        }

        let (failure_tx, mut failure_rx) = mpsc::channel::<JanitorFailure>(8);
        let (stop_tx, stop_rx) = oneshot::channel();
        stops.push(stop_tx);
        tasks.push(tokio::spawn(janitor::run(
            janitors,
            config.janitor_interval(),
            failure_tx,
            stop_rx,
        )));

        let alerts = alert_tx.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(failure) = failure_rx.recv().await {
                let body = format!("Retention janitor {} failed: {}", failure.kind, failure.error);
                if alerts.send(body).await.is_err() {
                    break;
                }
            }
        }));
    }
    drop(alert_tx);

    if tasks.is_empty() {
        tracing::warn!("Nothing configured to watch, exiting");
        return Ok(());
    }

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to listen for shutdown signal: {}", e))?;
    tracing::info!("Shutdown requested, waiting for in-flight work");

    for stop in stops {
        let _ = stop.send(());
    }
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }
    if let Err(e) = router.await {
        tracing::warn!(error = %e, "Alert router ended abnormally");
    }

    tracing::info!("Custodian shut down");
    Ok(())
}
