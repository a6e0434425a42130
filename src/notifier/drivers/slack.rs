//! Slack incoming-webhook driver

use async_trait::async_trait;
use serde::Serialize;

use super::not_configured;
use crate::http::{check_response, http_client, request_error};
use crate::notifier::{ensure_required_keys, Driver, NotifierOptions};
use crate::Result;

const UID: &str = "slack";

const REQUIRED: &[&str] = &["slack_webhook_url"];

#[derive(Clone, Debug)]
struct SlackOptions {
    webhook_url: String,
    channel: Option<String>,
    username: Option<String>,
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<&'a str>,
}

/// Posts messages to a Slack (or Slack-compatible) incoming webhook
#[derive(Debug, Default)]
pub struct SlackDriver {
    options: Option<SlackOptions>,
}

#[async_trait]
impl Driver for SlackDriver {
    fn uid(&self) -> &'static str {
        UID
    }

    fn set_options(&mut self, options: &NotifierOptions) -> Result<()> {
        ensure_required_keys(options, REQUIRED)?;
        self.options = Some(SlackOptions {
            webhook_url: options.require("slack_webhook_url")?.trim().to_string(),
            channel: options.get_non_empty("slack_channel").map(str::to_string),
            username: options.get_non_empty("slack_username").map(str::to_string),
        });
        Ok(())
    }

    async fn notify(&self, body: &str) -> Result<()> {
        let opts = self.options.as_ref().ok_or_else(|| not_configured(UID))?;
        let message = WebhookMessage {
            text: body,
            channel: opts.channel.as_deref(),
            username: opts.username.as_deref(),
        };

        let response = http_client(UID)?
            .post(&opts.webhook_url)
            .json(&message)
            .send()
            .await
            .map_err(|e| request_error(UID, e))?;
        check_response(UID, response).await?;
        Ok(())
    }
}
