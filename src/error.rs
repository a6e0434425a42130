//! Error types for custodian
//!
//! Errors are structured with fields to aid debugging in production.
//! Every variant belongs to one [`ErrorCategory`], which callers use to decide
//! whether a failure needs a configuration fix or can simply be tried again on
//! the next tick.

use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification of every [`Error`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing or ambiguous configuration; retrying will not help
    Configuration,
    /// File or network failure that may succeed on the next attempt
    TransientIo,
    /// Certificate or document could not be parsed
    Parse,
    /// A third-party system rejected the call
    Upstream,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::TransientIo => write!(f, "transient-io"),
            Self::Parse => write!(f, "parse"),
            Self::Upstream => write!(f, "upstream"),
        }
    }
}

/// Main error type for custodian operations
#[derive(Debug, Error)]
pub enum Error {
    /// None of the storage backend variants is populated
    #[error("no storage backend configured")]
    NoBackendConfigured,

    /// Notifier options do not name a driver
    #[error("no notifier configured: option `{key}` is missing")]
    NoNotifierConfigured {
        /// The reserved selector key that was looked up
        key: String,
    },

    /// Notifier options name a driver that is not registered
    #[error("unknown notifier: {uid}")]
    UnknownNotifier {
        /// The driver UID taken from the options
        uid: String,
    },

    /// A driver's required option is absent or empty
    #[error("missing required notifier option: {key}")]
    MissingKey {
        /// Name of the first missing option
        key: String,
    },

    /// Validation error for daemon configuration
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "recycleBin.path")
        field: Option<String>,
    },

    /// No PEM block could be decoded from the certificate source
    #[error("certificate unparsable: {message}")]
    CertificateUnparsable {
        /// Description of what failed
        message: String,
    },

    /// The PEM block does not hold a valid X.509 certificate
    #[error("certificate invalid: {message}")]
    CertificateInvalid {
        /// Description of what failed
        message: String,
    },

    /// Filesystem error
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        /// Path being read, written or removed
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The document kind being processed (if known)
        kind: Option<String>,
    },

    /// A third-party system (notifier transport, time-series store) failed the call
    #[error("upstream error [{system}]: {message}")]
    Upstream {
        /// The remote system (e.g., "slack", "elasticsearch")
        system: String,
        /// Description of what failed
        message: String,
        /// HTTP status code, when the failure came with one
        status: Option<u16>,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error pointing at a configuration field
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create the error returned when options lack the driver selector
    pub fn no_notifier(key: impl Into<String>) -> Self {
        Self::NoNotifierConfigured { key: key.into() }
    }

    /// Create an unknown-notifier error
    pub fn unknown_notifier(uid: impl Into<String>) -> Self {
        Self::UnknownNotifier { uid: uid.into() }
    }

    /// Create a missing-key error
    pub fn missing_key(key: impl Into<String>) -> Self {
        Self::MissingKey { key: key.into() }
    }

    /// Create an unparsable-certificate error
    pub fn certificate_unparsable(msg: impl Into<String>) -> Self {
        Self::CertificateUnparsable {
            message: msg.into(),
        }
    }

    /// Create an invalid-certificate error
    pub fn certificate_invalid(msg: impl Into<String>) -> Self {
        Self::CertificateInvalid {
            message: msg.into(),
        }
    }

    /// Create an I/O error for the given path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a serialization error with document kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an upstream error without a status code
    pub fn upstream(system: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Upstream {
            system: system.into(),
            message: msg.into(),
            status: None,
        }
    }

    /// Create an upstream error carrying the HTTP status the remote answered with
    pub fn upstream_status(system: impl Into<String>, status: u16, msg: impl Into<String>) -> Self {
        Self::Upstream {
            system: system.into(),
            message: msg.into(),
            status: Some(status),
        }
    }

    /// Category this error belongs to
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::NoBackendConfigured
            | Error::NoNotifierConfigured { .. }
            | Error::UnknownNotifier { .. }
            | Error::MissingKey { .. }
            | Error::Validation { .. } => ErrorCategory::Configuration,
            Error::CertificateUnparsable { .. }
            | Error::CertificateInvalid { .. }
            | Error::Serialization { .. } => ErrorCategory::Parse,
            Error::Io { .. } => ErrorCategory::TransientIo,
            Error::Upstream { .. } => ErrorCategory::Upstream,
            Error::Kube { source } => match source {
                kube::Error::Api(_) => ErrorCategory::Upstream,
                _ => ErrorCategory::TransientIo,
            },
        }
    }

    /// Check if this error may go away on its own
    ///
    /// Configuration and parse errors need a human to fix something.
    /// I/O and upstream failures are worth trying again on the next tick.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::TransientIo | ErrorCategory::Upstream
        )
    }

    /// Get the remote system name if this error came from one
    pub fn system(&self) -> Option<&str> {
        match self {
            Error::Upstream { system, .. } => Some(system),
            Error::Kube { .. } => Some("kubernetes"),
            _ => None,
        }
    }
}
