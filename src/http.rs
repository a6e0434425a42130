//! Shared reqwest plumbing for notifier drivers and janitors
//!
//! Every HTTP caller names the remote `system` so failures surface as
//! [`Error::Upstream`] tagged with where they came from.

use std::time::Duration;

use crate::{Error, Result};

/// Timeout applied to every outbound HTTP request
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Build an HTTP client with [`HTTP_TIMEOUT`]
pub(crate) fn http_client(system: &str) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| Error::upstream(system, format!("failed to build HTTP client: {e}")))
}

/// Turn a non-success HTTP response into an upstream error
pub(crate) async fn check_response(
    system: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::upstream_status(
        system,
        status.as_u16(),
        format!("{} - {}", status, body.trim()),
    ))
}

/// Map a request-level failure (DNS, connect, timeout) to an upstream error
pub(crate) fn request_error(system: &str, e: reqwest::Error) -> Error {
    Error::upstream(system, format!("request failed: {e}"))
}
