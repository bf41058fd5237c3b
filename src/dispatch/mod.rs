//! Dispatch - Sending Invitations and Recording Every Attempt
//!
//! Each guest produces one log line per state change. Provider failures
//! and unusable phone numbers are recorded and counted; only a log that
//! cannot be written stops a batch.

pub mod log;
pub mod provider;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::code::{is_all_digits, normalize_code};
use crate::guest::GuestRecord;
use crate::templates::MessageTemplates;
use self::log::{Action, DispatchLog, LogEntry, Status};
use self::provider::{MessagingProvider, OutboundMessage};

pub use provider::{ProviderError, SmsCredentials, SmsGateway, TwilioCredentials, TwilioWhatsApp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Whatsapp,
    Sms,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Invalid code: {0}")]
    InvalidCode(String),

    #[error("Cannot write dispatch log {path}: {source}")]
    Log {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What happened to one guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Sent { message_id: Option<String> },
    DryRun,
    Skipped(String),
    Failed(String),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Sent { .. } | Outcome::DryRun)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub sent: usize,
    pub dry_run: usize,
    pub errors: usize,
    pub skipped: usize,
    pub total: usize,
}

impl DispatchSummary {
    fn record(&mut self, outcome: &Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Sent { .. } => self.sent += 1,
            Outcome::DryRun => self.dry_run += 1,
            Outcome::Skipped(_) => self.skipped += 1,
            Outcome::Failed(_) => self.errors += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub dial_code: String,
    pub card_base_url: String,
    pub dry_run: bool,
}

/// One row of the pre-send overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreviewRow {
    pub name: String,
    pub phone: Option<String>,
    pub code: String,
}

pub fn preview(guests: &[GuestRecord], provider: &dyn MessagingProvider, dial_code: &str) -> Vec<PreviewRow> {
    guests
        .iter()
        .map(|g| PreviewRow {
            name: g.name.clone(),
            phone: g.phone.as_deref().and_then(|p| provider.recipient(p, dial_code).ok()),
            code: g.code.clone(),
        })
        .collect()
}

pub struct Dispatcher<'a> {
    provider: &'a dyn MessagingProvider,
    messages: MessageTemplates,
    log: DispatchLog,
    settings: DispatchSettings,
    batch_id: Uuid,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        provider: &'a dyn MessagingProvider,
        messages: MessageTemplates,
        log: DispatchLog,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            provider,
            messages,
            log,
            settings,
            batch_id: Uuid::new_v4(),
        }
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn card_url(&self, code: &str) -> String {
        format!("{}/{}.png", self.settings.card_base_url.trim_end_matches('/'), code)
    }

    /// Send one invitation for a phone/code pair typed by an operator.
    ///
    /// The code must be numeric; it is zero-padded, never truncated.
    pub fn send_code(&self, phone: &str, code: &str, name: Option<&str>) -> Result<Outcome, DispatchError> {
        let code = normalize_code(code)
            .filter(|c| is_all_digits(c))
            .ok_or_else(|| DispatchError::InvalidCode(code.to_string()))?;
        self.deliver(name, Some(phone), &code)
    }

    pub fn send_guest(&self, guest: &GuestRecord) -> Result<Outcome, DispatchError> {
        self.deliver(Some(&guest.name), guest.phone.as_deref(), &guest.code)
    }

    /// Send to every guest; per-guest failures never abort the batch.
    pub fn send_batch(&self, guests: &[GuestRecord]) -> Result<DispatchSummary, DispatchError> {
        let mut summary = DispatchSummary::default();
        for guest in guests {
            let outcome = self.send_guest(guest)?;
            summary.record(&outcome);
        }
        info!(
            batch_id = %self.batch_id,
            sent = summary.sent,
            dry_run = summary.dry_run,
            errors = summary.errors,
            skipped = summary.skipped,
            "dispatch batch finished"
        );
        Ok(summary)
    }

    fn deliver(&self, name: Option<&str>, phone: Option<&str>, code: &str) -> Result<Outcome, DispatchError> {
        let recipient = match phone.map(|p| self.provider.recipient(p, &self.settings.dial_code)) {
            Some(Ok(recipient)) => recipient,
            Some(Err(e)) => return self.skip(name, phone, code, e.to_string()),
            None => return self.skip(name, None, code, "No phone number".to_string()),
        };

        let text = match self.provider.channel() {
            Channel::Whatsapp => self.messages.whatsapp_for(code),
            Channel::Sms => self.messages.sms_for(code),
        };
        let message = OutboundMessage {
            to: recipient.clone(),
            code: code.to_string(),
            text,
        };

        self.record(Action::Send, name, Some(&recipient), code, Status::Pending, None, None)?;

        if self.settings.dry_run {
            info!(code, to = %recipient, "dry run, not sending");
            self.record(Action::Send, name, Some(&recipient), code, Status::DryRun, None, None)?;
            return Ok(Outcome::DryRun);
        }

        match self.provider.send(&message) {
            Ok(delivery) => {
                info!(code, to = %recipient, status = %delivery.status, "invitation sent");
                self.record(
                    Action::Send,
                    name,
                    Some(&recipient),
                    code,
                    Status::Sent,
                    None,
                    delivery.message_id.clone(),
                )?;
                Ok(Outcome::Sent {
                    message_id: delivery.message_id,
                })
            }
            Err(e) => {
                let error = e.to_string();
                warn!(code, to = %recipient, error = %error, "send failed");
                self.record(Action::Send, name, Some(&recipient), code, Status::Error, Some(error.clone()), None)?;
                Ok(Outcome::Failed(error))
            }
        }
    }

    fn skip(&self, name: Option<&str>, phone: Option<&str>, code: &str, reason: String) -> Result<Outcome, DispatchError> {
        warn!(code, reason = %reason, "skipping guest");
        self.record(Action::Skip, name, phone, code, Status::Skipped, Some(reason.clone()), None)?;
        Ok(Outcome::Skipped(reason))
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        action: Action,
        name: Option<&str>,
        phone: Option<&str>,
        code: &str,
        status: Status,
        error: Option<String>,
        message_id: Option<String>,
    ) -> Result<(), DispatchError> {
        self.log.append(&LogEntry {
            timestamp: Utc::now(),
            batch_id: self.batch_id,
            channel: self.provider.channel(),
            action,
            name: name.map(str::to_string),
            phone: phone.map(str::to_string),
            code: code.to_string(),
            status,
            error,
            card_url: self.card_url(code),
            template_id: self.provider.template_id().map(str::to_string),
            message_id,
        })
    }
}
