//! SMTP mail driver

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{not_configured, DEFAULT_SUBJECT};
use crate::notifier::{ensure_required_keys, Driver, NotifierOptions};
use crate::{Error, Result};

const UID: &str = "smtp";

const REQUIRED: &[&str] = &[
    "smtp_host",
    "smtp_port",
    "smtp_username",
    "smtp_password",
    "smtp_from",
    "smtp_to",
];

#[derive(Clone, Debug)]
struct SmtpOptions {
    host: String,
    port: u16,
    username: String,
    password: String,
    from: Mailbox,
    to: Vec<Mailbox>,
    subject: String,
}

/// Sends mail through an SMTP relay using STARTTLS
#[derive(Debug, Default)]
pub struct SmtpDriver {
    options: Option<SmtpOptions>,
}

fn parse_mailbox(key: &str, value: &str) -> Result<Mailbox> {
    value
        .parse::<Mailbox>()
        .map_err(|e| Error::validation_for_field(key, format!("invalid address {value:?}: {e}")))
}

impl SmtpOptions {
    fn message(&self, body: &str) -> Result<Message> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(self.subject.clone())
            .header(ContentType::TEXT_PLAIN);
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        builder
            .body(body.to_string())
            .map_err(|e| Error::serialization_for_kind("mail", e.to_string()))
    }
}

#[async_trait]
impl Driver for SmtpDriver {
    fn uid(&self) -> &'static str {
        UID
    }

    fn set_options(&mut self, options: &NotifierOptions) -> Result<()> {
        ensure_required_keys(options, REQUIRED)?;

        let port_raw = options.require("smtp_port")?;
        let port = port_raw.trim().parse::<u16>().map_err(|e| {
            Error::validation_for_field("smtp_port", format!("invalid port {port_raw:?}: {e}"))
        })?;
        let to = options
            .require_list("smtp_to")?
            .iter()
            .map(|addr| parse_mailbox("smtp_to", addr))
            .collect::<Result<Vec<_>>>()?;

        self.options = Some(SmtpOptions {
            host: options.require("smtp_host")?.trim().to_string(),
            port,
            username: options.require("smtp_username")?.to_string(),
            password: options.require("smtp_password")?.to_string(),
            from: parse_mailbox("smtp_from", options.require("smtp_from")?)?,
            to,
            subject: options
                .get_non_empty("smtp_subject")
                .unwrap_or(DEFAULT_SUBJECT)
                .to_string(),
        });
        Ok(())
    }

    async fn notify(&self, body: &str) -> Result<()> {
        let opts = self.options.as_ref().ok_or_else(|| not_configured(UID))?;
        let message = opts.message(body)?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&opts.host)
            .map_err(|e| Error::upstream(UID, format!("failed to configure relay: {e}")))?
            .port(opts.port)
            .credentials(Credentials::new(opts.username.clone(), opts.password.clone()))
            .build();

        transport
            .send(message)
            .await
            .map_err(|e| Error::upstream(UID, e.to_string()))?;
        Ok(())
    }
}
