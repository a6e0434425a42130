//! Twilio SMS driver

use async_trait::async_trait;

use super::{base_url, not_configured};
use crate::http::{check_response, http_client, request_error};
use crate::notifier::{ensure_required_keys, Driver, NotifierOptions};
use crate::Result;

const UID: &str = "twilio";

const DEFAULT_API_URL: &str = "https://api.twilio.com";

const REQUIRED: &[&str] = &[
    "twilio_account_sid",
    "twilio_auth_token",
    "twilio_from",
    "twilio_to",
];

#[derive(Clone, Debug)]
struct TwilioOptions {
    api_url: String,
    account_sid: String,
    auth_token: String,
    from: String,
    to: Vec<String>,
}

/// Sends SMS through the Twilio messages API
///
/// Twilio accepts a single recipient per request, so one request is made per
/// entry of `twilio_to`. The first failure stops the remaining sends.
#[derive(Debug, Default)]
pub struct TwilioDriver {
    options: Option<TwilioOptions>,
}

#[async_trait]
impl Driver for TwilioDriver {
    fn uid(&self) -> &'static str {
        UID
    }

    fn set_options(&mut self, options: &NotifierOptions) -> Result<()> {
        ensure_required_keys(options, REQUIRED)?;
        self.options = Some(TwilioOptions {
            api_url: base_url(options, "twilio_api_url", DEFAULT_API_URL),
            account_sid: options.require("twilio_account_sid")?.to_string(),
            auth_token: options.require("twilio_auth_token")?.to_string(),
            from: options.require("twilio_from")?.to_string(),
            to: options.require_list("twilio_to")?,
        });
        Ok(())
    }

    async fn notify(&self, body: &str) -> Result<()> {
        let opts = self.options.as_ref().ok_or_else(|| not_configured(UID))?;
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            opts.api_url, opts.account_sid
        );
        let client = http_client(UID)?;

        for to in &opts.to {
            let response = client
                .post(&url)
                .basic_auth(&opts.account_sid, Some(&opts.auth_token))
                .form(&[("From", opts.from.as_str()), ("To", to.as_str()), ("Body", body)])
                .send()
                .await
                .map_err(|e| request_error(UID, e))?;
            check_response(UID, response).await?;
        }
        Ok(())
    }
}
