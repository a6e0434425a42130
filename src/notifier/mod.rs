//! Pluggable notification drivers
//!
//! A single logical "send a message" operation is dispatched to one of
//! several unrelated transports, selected purely by a flat string map:
//!
//! - [`NotifierOptions`] carries the configuration, typically the data of a
//!   Kubernetes Secret. The reserved key [`NOTIFY_VIA`] names the driver.
//! - [`Driver`] is the capability every transport implements.
//! - [`NotifierRegistry`] maps driver UIDs to factories.
//! - [`NotifierDispatcher`] resolves, configures and invokes a driver.
//!
//! New transports are added by implementing [`Driver`] and registering it;
//! the dispatcher never changes.

pub mod dispatcher;
pub mod drivers;
pub mod registry;

use std::collections::BTreeMap;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::{Error, Result};

pub use dispatcher::NotifierDispatcher;
pub use registry::{DriverFactory, NotifierRegistry};

/// Reserved option key naming the driver to use
pub const NOTIFY_VIA: &str = "notify_via";

/// A notification transport
///
/// Instances are created fresh for every dispatch by the registry, configured
/// once with [`Driver::set_options`] and then asked to [`Driver::notify`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Driver: Send + Sync {
    /// Stable identifier the driver is registered under
    fn uid(&self) -> &'static str;

    /// Validate and copy the options this driver needs
    ///
    /// Fails with [`Error::MissingKey`] naming the first required option that
    /// is absent or empty.
    fn set_options(&mut self, options: &NotifierOptions) -> Result<()>;

    /// Send `body` through the transport
    async fn notify(&self, body: &str) -> Result<()>;
}

/// Flat string-keyed notifier configuration
///
/// Drivers only read from it; each copies what it needs into its own option
/// struct, so one map can be reused across concurrent sends.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NotifierOptions(BTreeMap<String, String>);

impl NotifierOptions {
    /// Create an empty option map
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an option
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Get an option value, if present
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Get an option value, treating blank values as absent
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.trim().is_empty())
    }

    /// Get a required option value
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get_non_empty(key).ok_or_else(|| Error::missing_key(key))
    }

    /// Get a comma separated list option, trimming entries and dropping blanks
    pub fn list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get a required list option; a value with no non-blank entry is missing
    pub fn require_list(&self, key: &str) -> Result<Vec<String>> {
        let list = self.list(key);
        if list.is_empty() {
            return Err(Error::missing_key(key));
        }
        Ok(list)
    }

    /// Driver selected by [`NOTIFY_VIA`]
    pub fn notify_via(&self) -> Option<&str> {
        self.get_non_empty(NOTIFY_VIA).map(str::trim)
    }

    /// Number of options
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<String, String>> for NotifierOptions {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for NotifierOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Check that every required option is present and non-empty
///
/// Keys are checked in order and the first missing one is reported; this is
/// fail-fast, not an aggregate report.
pub fn ensure_required_keys(options: &NotifierOptions, required: &[&str]) -> Result<()> {
    for key in required {
        options.require(key)?;
    }
    Ok(())
}
