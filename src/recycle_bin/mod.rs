//! Archive-on-mutation of Kubernetes objects
//!
//! Before an object is overwritten or removed, its representation is written
//! to a timestamped YAML file under a root directory. The filesystem is the
//! record store: the layout is
//!
//! ```text
//! <root>/<dirname(object path)>/<name>.<RFC3339 UTC>.yaml
//! ```
//!
//! where the object path is the object's `selfLink`, or the API path kube
//! derives from the resource type when the server no longer populates it.
//!
//! [`RecycleBin::cleanup`] sweeps records whose modification time is older
//! than the configured TTL. A sweep never stops on a bad entry; every failure
//! is collected in the returned [`CleanupReport`].

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use kube::Resource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::{ticker, Error};

/// Default record lifetime (7 days)
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default time between sweeps (1 hour)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

const FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;

/// Recycle bin configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecycleBinSpec {
    /// Root directory of the archive
    pub path: PathBuf,

    /// Records older than this are removed by the sweep
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub ttl: Option<Duration>,

    /// Archive on update as well as on delete; the daemon only archives
    /// deletions unless this is set
    #[serde(default)]
    pub handle_updates: bool,

    /// Time between sweeps
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub sweep_interval: Option<Duration>,
}

impl RecycleBinSpec {
    /// Sweep interval, or the 1h default
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval.unwrap_or(DEFAULT_SWEEP_INTERVAL)
    }

    /// Validate the spec before the sweeper starts
    pub fn validate(&self) -> crate::Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(Error::validation_for_field("recycleBin.path", "must not be empty"));
        }
        if self.ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(Error::validation_for_field(
                "recycleBin.ttl",
                "must be greater than zero",
            ));
        }
        if self.sweep_interval().is_zero() {
            return Err(Error::validation_for_field(
                "recycleBin.sweepInterval",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Result of one sweep
#[derive(Debug, Default)]
pub struct CleanupReport {
    /// Files that were deleted
    pub removed: Vec<PathBuf>,
    /// Entries that could not be walked, inspected or deleted
    pub failures: Vec<Error>,
}

impl CleanupReport {
    /// Whether every expired entry was handled
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Timestamped archive of object representations
#[derive(Clone, Debug)]
pub struct RecycleBin {
    root: PathBuf,
    ttl: Duration,
    handle_updates: bool,
}

impl RecycleBin {
    /// Create a recycle bin rooted at `root` that archives updates and deletions
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ttl: DEFAULT_TTL,
            handle_updates: true,
        }
    }

    /// Create a recycle bin from configuration
    pub fn from_spec(spec: &RecycleBinSpec) -> Self {
        Self::new(spec.path.clone())
            .with_ttl(spec.ttl.unwrap_or(DEFAULT_TTL))
            .with_handle_updates(spec.handle_updates)
    }

    /// Set the record lifetime
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Enable or disable archiving on update
    pub fn with_handle_updates(mut self, handle_updates: bool) -> Self {
        self.handle_updates = handle_updates;
        self
    }

    /// Root directory of the archive
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Archive the new representation of an updated object
    ///
    /// Returns `None` without touching the filesystem when update handling
    /// was turned off with [`RecycleBin::with_handle_updates`]. Records are
    /// stamped with the current time so repeated updates to the same object
    /// land in distinct files.
    pub async fn update<K>(&self, obj: &K) -> crate::Result<Option<PathBuf>>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        if !self.handle_updates {
            return Ok(None);
        }
        self.archive_at(obj, Utc::now()).await.map(Some)
    }

    /// Archive the last known representation of a deleted object
    ///
    /// The record is stamped with the object's deletion timestamp, or the
    /// current time when the object carries none.
    pub async fn delete<K>(&self, obj: &K) -> crate::Result<PathBuf>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let stamp = obj
            .meta()
            .deletion_timestamp
            .as_ref()
            .map(|t| t.0)
            .unwrap_or_else(Utc::now);
        self.archive_at(obj, stamp).await
    }

    /// Compute the file an object's record is written to for a given time
    pub fn record_path<K>(&self, obj: &K, at: DateTime<Utc>) -> crate::Result<PathBuf>
    where
        K: Resource<DynamicType = ()>,
    {
        let name = obj
            .meta()
            .name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::validation("object has no name"))?;
        let object_path = object_path(obj)?;
        // only plain segments, so `..` in a selfLink cannot leave the root
        let dir: PathBuf = Path::new(&object_path)
            .parent()
            .map(|p| {
                p.components()
                    .filter_map(|c| match c {
                        Component::Normal(segment) => Some(segment),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        let stamp = at.to_rfc3339_opts(SecondsFormat::Secs, true);
        Ok(self.root.join(dir).join(format!("{name}.{stamp}.yaml")))
    }

    /// Write the YAML representation of `obj` stamped with `at`
    pub async fn archive_at<K>(&self, obj: &K, at: DateTime<Utc>) -> crate::Result<PathBuf>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let path = self.record_path(obj, at)?;
        let body = serde_yaml::to_string(obj)
            .map_err(|e| Error::serialization_for_kind(K::kind(&()).to_string(), e.to_string()))?;

        if let Some(dir) = path.parent() {
            let mut builder = tokio::fs::DirBuilder::new();
            builder.recursive(true).mode(DIR_MODE);
            builder
                .create(dir)
                .await
                .map_err(|e| Error::io(dir, e))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(FILE_MODE)
            .open(&path)
            .await
            .map_err(|e| Error::io(&path, e))?;
        file.write_all(body.as_bytes())
            .await
            .map_err(|e| Error::io(&path, e))?;
        file.flush().await.map_err(|e| Error::io(&path, e))?;
        // umask may have narrowed the creation mode
        tokio::fs::set_permissions(&path, Permissions::from_mode(FILE_MODE))
            .await
            .map_err(|e| Error::io(&path, e))?;

        debug!(path = %path.display(), "Archived object");
        Ok(path)
    }

    /// Remove records older than the TTL
    pub fn cleanup(&self) -> CleanupReport {
        self.cleanup_at(Utc::now())
    }

    /// Remove records whose modification time plus the TTL is before `now`
    pub fn cleanup_at(&self, now: DateTime<Utc>) -> CleanupReport {
        self.sweep(now, |path| std::fs::remove_file(path))
    }

    fn sweep<F>(&self, now: DateTime<Utc>, mut remove: F) -> CleanupReport
    where
        F: FnMut(&Path) -> std::io::Result<()>,
    {
        let mut report = CleanupReport::default();
        if !self.root.exists() {
            return report;
        }
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);

        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.root.clone());
                    report.failures.push(Error::io(path, e.into()));
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }

            let modified = match entry
                .metadata()
                .map_err(std::io::Error::from)
                .and_then(|m| m.modified())
            {
                Ok(modified) => DateTime::<Utc>::from(modified),
                Err(e) => {
                    report.failures.push(Error::io(entry.path(), e));
                    continue;
                }
            };
            let expired = modified
                .checked_add_signed(ttl)
                .is_some_and(|deadline| deadline < now);
            if !expired {
                continue;
            }

            match remove(entry.path()) {
                Ok(()) => report.removed.push(entry.into_path()),
                Err(e) => report.failures.push(Error::io(entry.path(), e)),
            }
        }
        report
    }

    /// Sweep once per interval until shut down
    ///
    /// The walk runs on the blocking pool; a sweep in progress completes
    /// before shutdown is observed. A zero interval is raised to
    /// [`crate::MIN_TICK_INTERVAL`].
    pub async fn run(self, sweep_interval: Duration, mut shutdown: oneshot::Receiver<()>) {
        info!(
            root = %self.root.display(),
            ttl_secs = self.ttl.as_secs(),
            interval_secs = sweep_interval.as_secs(),
            "Starting recycle bin sweeper"
        );
        let mut ticker = ticker(sweep_interval);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    debug!("Recycle bin sweeper stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let bin = self.clone();
                    match tokio::task::spawn_blocking(move || bin.cleanup()).await {
                        Ok(report) => {
                            for failure in &report.failures {
                                warn!(error = %failure, "Recycle bin sweep entry failed");
                            }
                            info!(
                                removed = report.removed.len(),
                                failures = report.failures.len(),
                                "Recycle bin sweep finished"
                            );
                        }
                        Err(e) => warn!(error = %e, "Recycle bin sweep task failed"),
                    }
                }
            }
        }
    }
}

/// API path of an object: its `selfLink`, or the path kube derives from the type
pub fn object_path<K>(obj: &K) -> crate::Result<String>
where
    K: Resource<DynamicType = ()>,
{
    let meta = obj.meta();
    if let Some(link) = meta.self_link.as_deref().filter(|l| !l.is_empty()) {
        return Ok(link.to_string());
    }
    let name = meta
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::validation("object has no name"))?;
    Ok(format!(
        "{}/{}",
        K::url_path(&(), meta.namespace.as_deref()),
        name
    ))
}
