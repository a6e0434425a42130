//! Notification dispatch
//!
//! Resolves the driver named by `notify_via`, configures a fresh instance
//! with the caller's options and sends. There is no retry here: a transport
//! error goes back to the caller unchanged.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{NotifierOptions, NotifierRegistry, NOTIFY_VIA};
use crate::{Error, Result};

/// Dispatches messages through drivers resolved from a [`NotifierRegistry`]
#[derive(Clone, Debug)]
pub struct NotifierDispatcher {
    registry: Arc<NotifierRegistry>,
}

impl NotifierDispatcher {
    /// Create a dispatcher over a fully populated registry
    pub fn new(registry: Arc<NotifierRegistry>) -> Self {
        Self { registry }
    }

    /// The registry drivers are resolved from
    pub fn registry(&self) -> &NotifierRegistry {
        &self.registry
    }

    /// Send `body` through the driver selected by `options`
    ///
    /// Returns the UID of the driver that delivered the message so the caller
    /// can attribute the channel used.
    ///
    /// # Errors
    ///
    /// - [`Error::NoNotifierConfigured`] when `notify_via` is missing
    /// - [`Error::UnknownNotifier`] when no driver is registered under it
    /// - [`Error::MissingKey`] when the driver's required options are incomplete;
    ///   nothing is sent in that case
    /// - whatever the transport reports
    pub async fn send_notification(&self, options: &NotifierOptions, body: &str) -> Result<String> {
        let via = options.notify_via().ok_or_else(|| Error::no_notifier(NOTIFY_VIA))?;

        let mut driver = self
            .registry
            .lookup(via)
            .ok_or_else(|| Error::unknown_notifier(via))?;
        debug!(driver = %via, "Dispatching notification");

        if let Err(e) = driver.set_options(options) {
            warn!(driver = %via, error = %e, "Notifier options rejected");
            return Err(e);
        }

        if let Err(e) = driver.notify(body).await {
            warn!(driver = %via, error = %e, "Notification failed");
            return Err(e);
        }

        let uid = driver.uid().to_string();
        info!(driver = %uid, "Notification sent");
        Ok(uid)
    }
}
