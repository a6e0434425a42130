//! Storage location resolution for snapshots
//!
//! A [`BackendSpec`] declares where snapshots live (S3, GCS, Azure, Swift or a
//! local directory). This module only computes *where* an archive goes; it
//! never talks to the storage provider. The functions are pure so the same
//! location is computed when an archive is written and later when it is
//! looked up for restore.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Path segment every snapshot is stored under
pub const SNAPSHOT_NAMESPACE: &str = "snapshots";

/// Object name used instead of a timestamp when `overwrite` is set
pub const OVERWRITE_NAME: &str = "latest";

/// Timestamp layout embedded in snapshot paths (compact RFC 3339, UTC)
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Local directory backend
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalSpec {
    /// Directory snapshots are written to
    pub path: String,
}

/// S3 (or S3-compatible) backend
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct S3Spec {
    /// Endpoint host (e.g., "s3.amazonaws.com" or a MinIO service)
    #[serde(default)]
    pub endpoint: String,
    /// Bucket name
    pub bucket: String,
    /// Key prefix inside the bucket
    #[serde(default)]
    pub prefix: String,
}

/// Google Cloud Storage backend
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GcsSpec {
    /// Bucket name
    pub bucket: String,
    /// Object prefix inside the bucket
    #[serde(default)]
    pub prefix: String,
}

/// Azure Blob Storage backend
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureSpec {
    /// Blob container name
    pub container: String,
    /// Blob prefix inside the container
    #[serde(default)]
    pub prefix: String,
}

/// OpenStack Swift backend
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SwiftSpec {
    /// Swift container name
    pub container: String,
    /// Object prefix inside the container
    #[serde(default)]
    pub prefix: String,
}

/// Declarative storage backend
///
/// At most one variant should be populated; [`BackendSpec::validate`] rejects
/// ambiguous specs up front. When several are populated anyway, resolution
/// picks the first of S3, GCS, Azure, Local, Swift.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackendSpec {
    /// Local directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalSpec>,

    /// S3 or S3-compatible storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Spec>,

    /// Google Cloud Storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs: Option<GcsSpec>,

    /// Azure Blob Storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureSpec>,

    /// OpenStack Swift
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swift: Option<SwiftSpec>,

    /// Store every snapshot under the fixed name `latest` instead of a timestamp
    #[serde(default)]
    pub overwrite: bool,
}

/// Which backend variant a spec resolves to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// Amazon S3
    S3,
    /// Google Cloud Storage
    Gcs,
    /// Azure Blob Storage
    Azure,
    /// Local directory
    Local,
    /// OpenStack Swift
    Swift,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::S3 => write!(f, "s3"),
            Self::Gcs => write!(f, "gcs"),
            Self::Azure => write!(f, "azure"),
            Self::Local => write!(f, "local"),
            Self::Swift => write!(f, "swift"),
        }
    }
}

/// Where a snapshot lives: object key plus bucket/container
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotLocation {
    /// Backend variant the location was resolved against
    pub kind: BackendKind,
    /// `/`-separated object key relative to the container
    pub relative_path: String,
    /// Bucket, container or local directory
    pub container: String,
}

impl BackendSpec {
    /// Backend variants that are populated, in resolution priority order
    pub fn populated(&self) -> Vec<BackendKind> {
        let mut kinds = Vec::new();
        if self.s3.is_some() {
            kinds.push(BackendKind::S3);
        }
        if self.gcs.is_some() {
            kinds.push(BackendKind::Gcs);
        }
        if self.azure.is_some() {
            kinds.push(BackendKind::Azure);
        }
        if self.local.is_some() {
            kinds.push(BackendKind::Local);
        }
        if self.swift.is_some() {
            kinds.push(BackendKind::Swift);
        }
        kinds
    }

    /// The variant this spec resolves to
    pub fn kind(&self) -> Result<BackendKind> {
        self.populated()
            .into_iter()
            .next()
            .ok_or(Error::NoBackendConfigured)
    }

    /// Validate the spec before it is used at runtime
    ///
    /// Rejects empty and ambiguous specs as well as blank bucket, container
    /// and path values.
    pub fn validate(&self) -> Result<()> {
        let populated = self.populated();
        match populated.len() {
            0 => return Err(Error::NoBackendConfigured),
            1 => {}
            _ => {
                let names: Vec<String> = populated.iter().map(ToString::to_string).collect();
                return Err(Error::validation(format!(
                    "ambiguous storage backend: {} are all set, expected exactly one",
                    names.join(", ")
                )));
            }
        }

        if let Some(s3) = &self.s3 {
            require_non_empty("s3.bucket", &s3.bucket)?;
        }
        if let Some(gcs) = &self.gcs {
            require_non_empty("gcs.bucket", &gcs.bucket)?;
        }
        if let Some(azure) = &self.azure {
            require_non_empty("azure.container", &azure.container)?;
        }
        if let Some(local) = &self.local {
            require_non_empty("local.path", &local.path)?;
        }
        if let Some(swift) = &self.swift {
            require_non_empty("swift.container", &swift.container)?;
        }
        Ok(())
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation_for_field(field, "must not be empty"));
    }
    Ok(())
}

/// Object key for a snapshot taken at `ts`
///
/// Remote backends use `<prefix>/snapshots/<stamp>`, the local backend uses
/// `snapshots/<stamp>`. The stamp is the UTC time in [`TIMESTAMP_FORMAT`], or
/// [`OVERWRITE_NAME`] when the spec sets `overwrite`.
pub fn location(spec: &BackendSpec, ts: DateTime<Utc>) -> Result<String> {
    let stamp = snapshot_stamp(spec, ts);

    if let Some(s3) = &spec.s3 {
        return Ok(join(&[&s3.prefix, SNAPSHOT_NAMESPACE, &stamp]));
    }
    if let Some(gcs) = &spec.gcs {
        return Ok(join(&[&gcs.prefix, SNAPSHOT_NAMESPACE, &stamp]));
    }
    if let Some(azure) = &spec.azure {
        return Ok(join(&[&azure.prefix, SNAPSHOT_NAMESPACE, &stamp]));
    }
    if spec.local.is_some() {
        return Ok(join(&[SNAPSHOT_NAMESPACE, &stamp]));
    }
    if let Some(swift) = &spec.swift {
        return Ok(join(&[&swift.prefix, SNAPSHOT_NAMESPACE, &stamp]));
    }
    Err(Error::NoBackendConfigured)
}

/// Bucket, container or directory the snapshot lives in
pub fn container(spec: &BackendSpec) -> Result<String> {
    if let Some(s3) = &spec.s3 {
        return Ok(s3.bucket.clone());
    }
    if let Some(gcs) = &spec.gcs {
        return Ok(gcs.bucket.clone());
    }
    if let Some(azure) = &spec.azure {
        return Ok(azure.container.clone());
    }
    if let Some(local) = &spec.local {
        return Ok(local.path.clone());
    }
    if let Some(swift) = &spec.swift {
        return Ok(swift.container.clone());
    }
    Err(Error::NoBackendConfigured)
}

/// Resolve both halves of a snapshot location
pub fn resolve(spec: &BackendSpec, ts: DateTime<Utc>) -> Result<SnapshotLocation> {
    Ok(SnapshotLocation {
        kind: spec.kind()?,
        relative_path: location(spec, ts)?,
        container: container(spec)?,
    })
}

fn snapshot_stamp(spec: &BackendSpec, ts: DateTime<Utc>) -> String {
    if spec.overwrite {
        OVERWRITE_NAME.to_string()
    } else {
        ts.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Join object key segments with `/`, dropping empty segments and stray slashes
fn join(segments: &[&str]) -> String {
    segments
        .iter()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
