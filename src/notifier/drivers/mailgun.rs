//! Mailgun mail driver

use async_trait::async_trait;

use super::{base_url, not_configured, DEFAULT_SUBJECT};
use crate::http::{check_response, http_client, request_error};
use crate::notifier::{ensure_required_keys, Driver, NotifierOptions};
use crate::Result;

const UID: &str = "mailgun";

const DEFAULT_API_URL: &str = "https://api.mailgun.net";

const REQUIRED: &[&str] = &["mailgun_domain", "mailgun_api_key", "mailgun_from", "mailgun_to"];

#[derive(Clone, Debug)]
struct MailgunOptions {
    api_url: String,
    domain: String,
    api_key: String,
    from: String,
    to: Vec<String>,
    subject: String,
}

/// Sends mail through the Mailgun messages API
///
/// Set `mailgun_api_url` to `https://api.eu.mailgun.net` for EU domains.
#[derive(Debug, Default)]
pub struct MailgunDriver {
    options: Option<MailgunOptions>,
}

#[async_trait]
impl Driver for MailgunDriver {
    fn uid(&self) -> &'static str {
        UID
    }

    fn set_options(&mut self, options: &NotifierOptions) -> Result<()> {
        ensure_required_keys(options, REQUIRED)?;
        self.options = Some(MailgunOptions {
            api_url: base_url(options, "mailgun_api_url", DEFAULT_API_URL),
            domain: options.require("mailgun_domain")?.to_string(),
            api_key: options.require("mailgun_api_key")?.to_string(),
            from: options.require("mailgun_from")?.to_string(),
            to: options.require_list("mailgun_to")?,
            subject: options
                .get_non_empty("mailgun_subject")
                .unwrap_or(DEFAULT_SUBJECT)
                .to_string(),
        });
        Ok(())
    }

    async fn notify(&self, body: &str) -> Result<()> {
        let opts = self.options.as_ref().ok_or_else(|| not_configured(UID))?;
        let url = format!("{}/v3/{}/messages", opts.api_url, opts.domain);
        let to = opts.to.join(",");

        let response = http_client(UID)?
            .post(&url)
            .basic_auth("api", Some(&opts.api_key))
            .form(&[
                ("from", opts.from.as_str()),
                ("to", to.as_str()),
                ("subject", opts.subject.as_str()),
                ("text", body),
            ])
            .send()
            .await
            .map_err(|e| request_error(UID, e))?;
        check_response(UID, response).await?;
        Ok(())
    }
}
