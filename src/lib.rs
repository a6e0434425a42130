//! Custodian - operational hygiene for a cluster sidecar daemon
//!
//! Custodian watches for conditions that need cleanup or notification and
//! reacts by invoking a pluggable backend: an expiring CA certificate, an
//! object update/delete that should be archived, an aging time-series
//! retention window.
//!
//! # Modules
//!
//! - [`backend`] - Storage location resolution for snapshots (S3, GCS, Azure, Swift, local)
//! - [`notifier`] - Driver registry, dispatcher and the shipped notification drivers
//! - [`pki`] - CA certificate expiry watch
//! - [`recycle_bin`] - Archive-on-mutation of Kubernetes objects and TTL sweep
//! - [`janitor`] - Retention enforcement for Elasticsearch and InfluxDB
//! - [`secrets`] - Access to Kubernetes Secret data
//! - [`config`] - Daemon configuration document
//! - [`http`] - HTTP client and response handling shared by drivers and janitors
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod backend;
pub mod config;
pub mod error;
pub mod http;
pub mod janitor;
pub mod notifier;
pub mod pki;
pub mod recycle_bin;
pub mod secrets;

use std::time::Duration;

use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::warn;

pub use error::{Error, ErrorCategory};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Namespace used for Secret lookups when the configuration does not name one
pub const DEFAULT_NAMESPACE: &str = "kube-system";

/// Certificate checked when the configuration names neither a path nor a Secret
pub const DEFAULT_CA_CERT_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Secret data key holding the PEM certificate
pub const DEFAULT_CA_CERT_KEY: &str = "ca.crt";

/// Seconds in a day
pub const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Shortest period a periodic task ticks at
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Ticker for a periodic task; the first tick completes immediately
///
/// `tokio::time::interval` panics on a zero period, so anything shorter than
/// [`MIN_TICK_INTERVAL`] is raised to it.
pub(crate) fn ticker(period: Duration) -> Interval {
    if period < MIN_TICK_INTERVAL {
        warn!(
            requested_ms = period.as_millis() as u64,
            "Tick interval below minimum, using {}ms",
            MIN_TICK_INTERVAL.as_millis()
        );
    }
    let mut ticker = interval(period.max(MIN_TICK_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
