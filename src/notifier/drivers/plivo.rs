//! Plivo SMS driver

use async_trait::async_trait;
use serde::Serialize;

use super::{base_url, not_configured};
use crate::http::{check_response, http_client, request_error};
use crate::notifier::{ensure_required_keys, Driver, NotifierOptions};
use crate::Result;

const UID: &str = "plivo";

const DEFAULT_API_URL: &str = "https://api.plivo.com";

const REQUIRED: &[&str] = &["plivo_auth_id", "plivo_auth_token", "plivo_from", "plivo_to"];

#[derive(Clone, Debug)]
struct PlivoOptions {
    api_url: String,
    auth_id: String,
    auth_token: String,
    from: String,
    to: Vec<String>,
}

#[derive(Serialize)]
struct MessageRequest<'a> {
    src: &'a str,
    /// Plivo takes multiple destinations joined with `<`
    dst: String,
    text: &'a str,
}

/// Sends SMS through the Plivo message API
#[derive(Debug, Default)]
pub struct PlivoDriver {
    options: Option<PlivoOptions>,
}

#[async_trait]
impl Driver for PlivoDriver {
    fn uid(&self) -> &'static str {
        UID
    }

    fn set_options(&mut self, options: &NotifierOptions) -> Result<()> {
        ensure_required_keys(options, REQUIRED)?;
        self.options = Some(PlivoOptions {
            api_url: base_url(options, "plivo_api_url", DEFAULT_API_URL),
            auth_id: options.require("plivo_auth_id")?.to_string(),
            auth_token: options.require("plivo_auth_token")?.to_string(),
            from: options.require("plivo_from")?.to_string(),
            to: options.require_list("plivo_to")?,
        });
        Ok(())
    }

    async fn notify(&self, body: &str) -> Result<()> {
        let opts = self.options.as_ref().ok_or_else(|| not_configured(UID))?;
        let url = format!("{}/v1/Account/{}/Message/", opts.api_url, opts.auth_id);
        let request = MessageRequest {
            src: &opts.from,
            dst: opts.to.join("<"),
            text: body,
        };

        let response = http_client(UID)?
            .post(&url)
            .basic_auth(&opts.auth_id, Some(&opts.auth_token))
            .json(&request)
            .send()
            .await
            .map_err(|e| request_error(UID, e))?;
        check_response(UID, response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use wiremock::matchers::{body_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options(api_url: &str) -> NotifierOptions {
        NotifierOptions::new()
            .with("plivo_api_url", api_url)
            .with("plivo_auth_id", "MAXXXXXXXX")
            .with("plivo_auth_token", "secret")
            .with("plivo_from", "+15550001111")
            .with("plivo_to", "+15550002222,+15550003333")
    }

    #[test]
    fn required_keys_are_checked_in_order() {
        let mut driver = PlivoDriver::default();
        let partial = NotifierOptions::new()
            .with("plivo_auth_id", "MAXXXXXXXX")
            .with("plivo_from", "+15550001111");
        match driver.set_options(&partial) {
            Err(Error::MissingKey { key }) => assert_eq!(key, "plivo_auth_token"),
            other => panic!("Expected MissingKey, got {other:?}"),
        }
    }

    #[test]
    fn blank_destinations_are_missing() {
        let mut driver = PlivoDriver::default();
        let opts = options("http://localhost").with("plivo_to", ",, ");
        assert!(matches!(
            driver.set_options(&opts),
            Err(Error::MissingKey { key }) if key == "plivo_to"
        ));
    }

    #[tokio::test]
    async fn sends_one_message_to_all_destinations() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/Account/MAXXXXXXXX/Message/"))
            .and(header_exists("authorization"))
            .and(body_json(serde_json::json!({
                "src": "+15550001111",
                "dst": "+15550002222<+15550003333",
                "text": "disk full"
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let mut driver = PlivoDriver::default();
        driver.set_options(&options(&server.uri())).unwrap();
        driver.notify("disk full").await.unwrap();
    }

    #[tokio::test]
    async fn authentication_failure_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&server)
            .await;

        let mut driver = PlivoDriver::default();
        driver.set_options(&options(&server.uri())).unwrap();
        let err = driver.notify("disk full").await.unwrap_err();
        assert_eq!(err.system(), Some("plivo"));
        assert!(err.to_string().contains("unauthorized"));
    }
}
