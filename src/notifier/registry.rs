//! Driver registry
//!
//! The registry is an explicit value built by the composition root and then
//! shared read-only (behind an `Arc`) with the dispatcher. Registration takes
//! `&mut self`, so once the table is shared nothing can add to it.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use super::drivers::{MailgunDriver, PlivoDriver, SlackDriver, SmtpDriver, TwilioDriver};
use super::Driver;

/// Creates a fresh, unconfigured driver instance
pub type DriverFactory = Arc<dyn Fn() -> Box<dyn Driver> + Send + Sync>;

/// Table of driver factories keyed by driver UID
#[derive(Clone, Default)]
pub struct NotifierRegistry {
    factories: BTreeMap<String, DriverFactory>,
}

impl NotifierRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every driver shipped with custodian
    pub fn with_builtin_drivers() -> Self {
        let mut registry = Self::new();
        registry.register_driver::<SmtpDriver>();
        registry.register_driver::<MailgunDriver>();
        registry.register_driver::<TwilioDriver>();
        registry.register_driver::<PlivoDriver>();
        registry.register_driver::<SlackDriver>();
        registry
    }

    /// Register a factory under `uid`
    ///
    /// Registering the same UID twice replaces the earlier factory.
    pub fn register(&mut self, uid: impl Into<String>, factory: DriverFactory) {
        let uid = uid.into();
        if self.factories.insert(uid.clone(), factory).is_some() {
            warn!(driver = %uid, "Notifier driver registered twice, keeping the latest");
        }
    }

    /// Register a driver type under the UID its default instance reports
    pub fn register_driver<D>(&mut self)
    where
        D: Driver + Default + 'static,
    {
        let uid = D::default().uid();
        self.register(uid, Arc::new(|| Box::new(D::default()) as Box<dyn Driver>));
    }

    /// Create a fresh instance of the driver registered under `uid`
    pub fn lookup(&self, uid: &str) -> Option<Box<dyn Driver>> {
        self.factories.get(uid).map(|factory| factory())
    }

    /// Whether a driver is registered under `uid`
    pub fn contains(&self, uid: &str) -> bool {
        self.factories.contains_key(uid)
    }

    /// Registered UIDs in sorted order
    pub fn uids(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl std::fmt::Debug for NotifierRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifierRegistry")
            .field("drivers", &self.uids())
            .finish()
    }
}
