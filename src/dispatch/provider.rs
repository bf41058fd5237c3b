//! Messaging providers: Twilio WhatsApp content templates and a plain
//! HTTP SMS gateway.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use thiserror::Error;

use super::Channel;
use crate::phone::{to_gateway, to_international, PhoneError};

const USER_AGENT: &str = concat!("invitecard/", env!("CARGO_PKG_VERSION"));
/// Fixed per-call network timeout.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
pub const TWILIO_API_BASE: &str = "https://api.twilio.com";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Provider rejected message (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
}

/// One message ready to go out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Recipient in the provider's own format.
    pub to: String,
    pub code: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: Option<String>,
    pub status: String,
}

pub trait MessagingProvider {
    fn channel(&self) -> Channel;

    /// Provider-side template the message is built from, if any.
    fn template_id(&self) -> Option<&str> {
        None
    }

    fn recipient(&self, phone: &str, dial_code: &str) -> Result<String, PhoneError>;

    fn send(&self, message: &OutboundMessage) -> Result<Delivery, ProviderError>;
}

pub fn http_client() -> Result<Client, ProviderError> {
    Ok(Client::builder()
        .user_agent(USER_AGENT)
        .timeout(HTTP_TIMEOUT)
        .build()?)
}

#[derive(Debug, Clone)]
pub struct TwilioCredentials {
    pub account_sid: String,
    pub auth_token: String,
    /// Sender, with or without the `whatsapp:` prefix.
    pub from: String,
}

pub struct TwilioWhatsApp {
    client: Client,
    api_base: String,
    credentials: TwilioCredentials,
    content_sid: Option<String>,
}

#[derive(Deserialize)]
struct TwilioMessage {
    sid: String,
    #[serde(default)]
    status: String,
}

#[derive(Deserialize)]
struct TwilioFailure {
    message: String,
}

impl TwilioWhatsApp {
    pub fn new(credentials: TwilioCredentials, content_sid: Option<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client()?,
            api_base: TWILIO_API_BASE.to_string(),
            credentials,
            content_sid,
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base, self.credentials.account_sid
        )
    }
}

fn whatsapp_address(number: &str) -> String {
    if number.starts_with("whatsapp:") {
        number.to_string()
    } else {
        format!("whatsapp:{number}")
    }
}

impl MessagingProvider for TwilioWhatsApp {
    fn channel(&self) -> Channel {
        Channel::Whatsapp
    }

    fn template_id(&self) -> Option<&str> {
        self.content_sid.as_deref()
    }

    fn recipient(&self, phone: &str, dial_code: &str) -> Result<String, PhoneError> {
        to_international(phone, dial_code)
    }

    fn send(&self, message: &OutboundMessage) -> Result<Delivery, ProviderError> {
        let mut form = vec![
            ("From", whatsapp_address(&self.credentials.from)),
            ("To", whatsapp_address(&message.to)),
        ];
        match &self.content_sid {
            Some(sid) => {
                let variables = serde_json::json!({ "1": message.code, "2": message.code });
                form.push(("ContentSid", sid.clone()));
                form.push(("ContentVariables", variables.to_string()));
            }
            None => form.push(("Body", message.text.clone())),
        }

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.credentials.account_sid, Some(&self.credentials.auth_token))
            .form(&form)
            .send()?;
        let status = response.status();
        let body = response.text()?;

        if !status.is_success() {
            let message = serde_json::from_str::<TwilioFailure>(&body)
                .map(|f| f.message)
                .unwrap_or(body);
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        match serde_json::from_str::<TwilioMessage>(&body) {
            Ok(sent) => Ok(Delivery {
                message_id: Some(sent.sid),
                status: sent.status,
            }),
            Err(_) => Ok(Delivery {
                message_id: None,
                status: status.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmsCredentials {
    pub username: String,
    pub password: String,
    pub sender_id: Option<String>,
}

/// Query-string SMS API answering `OK…`/`SUCCESS…` on acceptance.
pub struct SmsGateway {
    client: Client,
    api_url: String,
    credentials: SmsCredentials,
}

impl SmsGateway {
    pub fn new(api_url: impl Into<String>, credentials: SmsCredentials) -> Result<Self, ProviderError> {
        Ok(Self {
            client: http_client()?,
            api_url: api_url.into(),
            credentials,
        })
    }
}

impl MessagingProvider for SmsGateway {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn recipient(&self, phone: &str, dial_code: &str) -> Result<String, PhoneError> {
        to_gateway(phone, dial_code)
    }

    fn send(&self, message: &OutboundMessage) -> Result<Delivery, ProviderError> {
        let mut query = vec![
            ("do", "sms"),
            ("username", self.credentials.username.as_str()),
            ("password", self.credentials.password.as_str()),
            ("dest", message.to.as_str()),
            ("msg", message.text.as_str()),
        ];
        if let Some(sender) = &self.credentials.sender_id {
            query.push(("senderid", sender.as_str()));
        }

        let response = self.client.get(&self.api_url).query(&query).send()?;
        let status = response.status();
        let body = response.text()?;
        let reply = body.trim();

        if status.is_success() && (reply.starts_with("OK") || reply.starts_with("SUCCESS")) {
            Ok(Delivery {
                message_id: None,
                status: reply.to_string(),
            })
        } else {
            Err(ProviderError::Rejected {
                status: status.as_u16(),
                message: reply.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::{matchers::*, responders::*, Expectation, Server};

    fn message() -> OutboundMessage {
        OutboundMessage {
            to: "+255712345678".into(),
            code: "00045".into(),
            text: "Invitation 00045".into(),
        }
    }

    fn twilio(server: &Server, content_sid: Option<&str>) -> TwilioWhatsApp {
        let credentials = TwilioCredentials {
            account_sid: "AC123".into(),
            auth_token: "secret".into(),
            from: "+14155238886".into(),
        };
        TwilioWhatsApp::new(credentials, content_sid.map(String::from))
            .unwrap()
            .with_api_base(server.url_str(""))
    }

    #[test]
    fn test_twilio_sends_content_template() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("POST", "/2010-04-01/Accounts/AC123/Messages.json"),
                request::body(url_decoded(contains(("To", "whatsapp:+255712345678")))),
                request::body(url_decoded(contains(("From", "whatsapp:+14155238886")))),
                request::body(url_decoded(contains(("ContentSid", "HXtemplate")))),
                request::body(url_decoded(contains(("ContentVariables", r#"{"1":"00045","2":"00045"}"#)))),
            ])
            .respond_with(status_code(201).body(r#"{"sid": "SM42", "status": "queued"}"#)),
        );

        let delivery = twilio(&server, Some("HXtemplate")).send(&message()).unwrap();
        assert_eq!(delivery.message_id.as_deref(), Some("SM42"));
        assert_eq!(delivery.status, "queued");
    }

    #[test]
    fn test_twilio_body_without_template() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method("POST"),
                request::body(url_decoded(contains(("Body", "Invitation 00045")))),
            ])
            .respond_with(status_code(201).body(r#"{"sid": "SM43", "status": "queued"}"#)),
        );
        assert!(twilio(&server, None).send(&message()).is_ok());
    }

    #[test]
    fn test_twilio_rejection_message() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method("POST"))
                .respond_with(status_code(400).body(r#"{"code": 21211, "message": "Invalid 'To' Phone Number"}"#)),
        );
        match twilio(&server, None).send(&message()) {
            Err(ProviderError::Rejected { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid 'To' Phone Number");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    fn gateway(server: &Server) -> SmsGateway {
        SmsGateway::new(
            server.url_str("/api.php"),
            SmsCredentials {
                username: "user".into(),
                password: "pass".into(),
                sender_id: Some("WEDDING".into()),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_sms_gateway_accepts_ok() {
        let server = Server::run();
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/api.php"),
                request::query(url_decoded(contains(("do", "sms")))),
                request::query(url_decoded(contains(("dest", "255712345678")))),
                request::query(url_decoded(contains(("senderid", "WEDDING")))),
            ])
            .respond_with(status_code(200).body("OK: 1 message queued")),
        );

        let gateway = gateway(&server);
        let msg = OutboundMessage {
            to: gateway.recipient("0712345678", "255").unwrap(),
            ..message()
        };
        let delivery = gateway.send(&msg).unwrap();
        assert_eq!(delivery.status, "OK: 1 message queued");
    }

    #[test]
    fn test_sms_gateway_error_reply() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/api.php"))
                .respond_with(status_code(200).body("ERR: insufficient balance")),
        );

        let result = gateway(&server).send(&message());
        assert!(matches!(result, Err(ProviderError::Rejected { status: 200, .. })));
    }

    #[test]
    fn test_whatsapp_address() {
        assert_eq!(whatsapp_address("+1415"), "whatsapp:+1415");
        assert_eq!(whatsapp_address("whatsapp:+1415"), "whatsapp:+1415");
    }
}
