//! Notification drivers shipped with custodian
//!
//! | uid       | transport                  |
//! |-----------|----------------------------|
//! | `smtp`    | mail over SMTP (STARTTLS)  |
//! | `mailgun` | mail over the Mailgun API  |
//! | `twilio`  | SMS over the Twilio API    |
//! | `plivo`   | SMS over the Plivo API     |
//! | `slack`   | chat via incoming webhook  |

mod mailgun;
mod plivo;
mod slack;
mod smtp;
mod twilio;

pub use mailgun::MailgunDriver;
pub use plivo::PlivoDriver;
pub use slack::SlackDriver;
pub use smtp::SmtpDriver;
pub use twilio::TwilioDriver;

use crate::notifier::NotifierOptions;
use crate::Error;

/// Subject used by mail drivers when the options do not set one
pub const DEFAULT_SUBJECT: &str = "Notification from custodian";

/// Error returned by `notify` on a driver that was never configured
pub(crate) fn not_configured(uid: &str) -> Error {
    Error::validation(format!("notifier {uid} used before set_options"))
}

/// Base URL option override, without a trailing slash
pub(crate) fn base_url(options: &NotifierOptions, key: &str, default: &str) -> String {
    options
        .get_non_empty(key)
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}
