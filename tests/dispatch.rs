//! Dispatch Batch Tests
//!
//! A recording provider stands in for Twilio and the SMS gateway.

use std::cell::RefCell;

use invitecard::dispatch::log::{Action, DispatchLog, Status};
use invitecard::dispatch::provider::{Delivery, MessagingProvider, OutboundMessage};
use invitecard::dispatch::{DispatchSettings, Dispatcher, ProviderError};
use invitecard::phone::{to_international, PhoneError};
use invitecard::{Channel, DispatchError, DispatchSummary, GuestRecord, GuestType, MessageTemplates, Outcome};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

/// Accepts everything except the numbers in `reject`.
struct Recorder {
    reject: Vec<String>,
    sent: RefCell<Vec<OutboundMessage>>,
}

impl Recorder {
    fn new(reject: &[&str]) -> Self {
        Self {
            reject: reject.iter().map(|s| s.to_string()).collect(),
            sent: RefCell::new(Vec::new()),
        }
    }
}

impl MessagingProvider for Recorder {
    fn channel(&self) -> Channel {
        Channel::Whatsapp
    }

    fn template_id(&self) -> Option<&str> {
        Some("HX-test")
    }

    fn recipient(&self, phone: &str, dial_code: &str) -> Result<String, PhoneError> {
        to_international(phone, dial_code)
    }

    fn send(&self, message: &OutboundMessage) -> Result<Delivery, ProviderError> {
        if self.reject.contains(&message.to) {
            return Err(ProviderError::Rejected {
                status: 400,
                message: "unreachable".to_string(),
            });
        }
        self.sent.borrow_mut().push(message.clone());
        Ok(Delivery {
            message_id: Some(format!("SM{}", self.sent.borrow().len())),
            status: "queued".to_string(),
        })
    }
}

fn guest(name: &str, phone: Option<&str>, code: &str) -> GuestRecord {
    GuestRecord {
        name: name.to_string(),
        guest_type: GuestType::Single,
        phone: phone.map(str::to_string),
        code: code.to_string(),
    }
}

fn guests() -> Vec<GuestRecord> {
    vec![
        guest("Jane Doe", Some("0712345678"), "00045"),
        guest("No Phone", None, "00046"),
        guest("Bad Phone", Some("12"), "00047"),
        guest("Offline", Some("0799999999"), "00048"),
    ]
}

fn settings(dry_run: bool) -> DispatchSettings {
    DispatchSettings {
        dial_code: "255".to_string(),
        card_base_url: "https://cards.example/png/".to_string(),
        dry_run,
    }
}

fn messages() -> MessageTemplates {
    MessageTemplates {
        whatsapp: "Karibu, code {code}".to_string(),
        sms: "SMS {code}".to_string(),
    }
}

#[test]
fn batch_continues_past_failures() {
    let dir = TempDir::new().unwrap();
    let log = DispatchLog::new(dir.path().join("send.jsonl"));
    let provider = Recorder::new(&["+255799999999"]);
    let dispatcher = Dispatcher::new(&provider, messages(), log.clone(), settings(false));

    let summary = dispatcher.send_batch(&guests()).unwrap();
    assert_eq!(
        summary,
        DispatchSummary {
            sent: 1,
            dry_run: 0,
            errors: 1,
            skipped: 2,
            total: 4,
        }
    );

    let sent = provider.sent.borrow();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "+255712345678");
    assert_eq!(sent[0].code, "00045");
    assert_eq!(sent[0].text, "Karibu, code 00045");

    let entries = log.entries().unwrap();
    let statuses: Vec<_> = entries.iter().map(|e| (e.code.as_str(), e.status)).collect();
    assert_eq!(
        statuses,
        vec![
            ("00045", Status::Pending),
            ("00045", Status::Sent),
            ("00046", Status::Skipped),
            ("00047", Status::Skipped),
            ("00048", Status::Pending),
            ("00048", Status::Error),
        ]
    );
    assert!(entries.iter().all(|e| e.batch_id == dispatcher.batch_id()));
    assert!(entries.iter().all(|e| e.template_id.as_deref() == Some("HX-test")));
    assert_eq!(entries[0].card_url, "https://cards.example/png/00045.png");
    assert_eq!(entries[1].message_id.as_deref(), Some("SM1"));
    assert_eq!(entries[2].action, Action::Skip);
    assert!(entries[5].error.as_deref().unwrap().contains("unreachable"));
}

#[test]
fn dry_run_never_calls_provider() {
    let dir = TempDir::new().unwrap();
    let log = DispatchLog::new(dir.path().join("send.jsonl"));
    let provider = Recorder::new(&[]);
    let dispatcher = Dispatcher::new(&provider, messages(), log.clone(), settings(true));

    let summary = dispatcher.send_batch(&guests()).unwrap();
    assert!(provider.sent.borrow().is_empty());
    assert_eq!(summary.dry_run, 2);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.sent, 0);

    let dry: Vec<_> = log
        .entries()
        .unwrap()
        .into_iter()
        .filter(|e| e.status == Status::DryRun)
        .map(|e| e.phone.unwrap_or_default())
        .collect();
    assert_eq!(dry, vec!["+255712345678", "+255799999999"]);
}

#[test]
fn single_send_normalizes_code() {
    let dir = TempDir::new().unwrap();
    let log = DispatchLog::new(dir.path().join("send.jsonl"));
    let provider = Recorder::new(&[]);
    let dispatcher = Dispatcher::new(&provider, messages(), log.clone(), settings(false));

    let outcome = dispatcher.send_code("+255 712 345 678", "45", None).unwrap();
    assert_eq!(
        outcome,
        Outcome::Sent {
            message_id: Some("SM1".to_string())
        }
    );
    assert_eq!(provider.sent.borrow()[0].code, "00045");
    assert!(log.entries().unwrap().iter().all(|e| e.name.is_none()));
}

#[test]
fn single_send_rejects_non_numeric_code() {
    let dir = TempDir::new().unwrap();
    let provider = Recorder::new(&[]);
    let dispatcher = Dispatcher::new(
        &provider,
        messages(),
        DispatchLog::new(dir.path().join("send.jsonl")),
        settings(false),
    );

    assert!(matches!(
        dispatcher.send_code("0712345678", "VIP-1", None),
        Err(DispatchError::InvalidCode(_))
    ));
    assert!(matches!(
        dispatcher.send_code("0712345678", "", None),
        Err(DispatchError::InvalidCode(_))
    ));
    assert!(provider.sent.borrow().is_empty());
}

#[test]
fn single_send_keeps_long_numeric_code() {
    let dir = TempDir::new().unwrap();
    let provider = Recorder::new(&[]);
    let dispatcher = Dispatcher::new(
        &provider,
        messages(),
        DispatchLog::new(dir.path().join("send.jsonl")),
        settings(false),
    );

    let outcome = dispatcher.send_code("0712345678", "123456", None).unwrap();
    assert!(outcome.is_success());
    let batch = dispatcher.send_guest(&guest("Long", Some("0712345678"), "123456")).unwrap();
    assert!(batch.is_success());

    let codes: Vec<_> = provider.sent.borrow().iter().map(|m| m.code.clone()).collect();
    assert_eq!(codes, vec!["123456", "123456"]);
}

#[test]
fn unwritable_log_stops_the_batch() {
    let dir = TempDir::new().unwrap();
    let log = DispatchLog::new(dir.path().join("missing-dir").join("send.jsonl"));
    let provider = Recorder::new(&[]);
    let dispatcher = Dispatcher::new(&provider, messages(), log, settings(false));

    let result = dispatcher.send_batch(&guests());
    assert!(matches!(result, Err(DispatchError::Log { .. })));
    assert!(provider.sent.borrow().is_empty());
}
