//! Verification Service - Code Lookup over HTTP
//!
//! Routes:
//! - `GET /` manual entry form
//! - `GET /c/{code}` HTML verdict (QR codes point here)
//! - `GET /api/verify/{code}` JSON verdict, 404 when unknown
//! - `POST /verify` form field `code`, redirects to `/c/{code}`
//!
//! The registry is fetched from the provider for every request and
//! dropped afterwards. Requests are served one at a time.

use std::io::Read;
use std::net::SocketAddr;

use askama::Template;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{debug, info, warn};

use crate::guest::GuestType;
use crate::registry::RegistryProvider;

const MAX_FORM_BYTES: u64 = 16 * 1024;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Cannot bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Body of `/api/verify/{code}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub found: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub guest_type: Option<GuestType>,
    pub code: String,
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexPage;

#[derive(Template)]
#[template(path = "verify.html")]
struct VerifyPage<'a> {
    found: bool,
    name: &'a str,
    guest_type: &'a str,
    code: &'a str,
}

/// Transport-independent response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
    pub location: Option<String>,
}

impl Reply {
    fn html(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "text/html; charset=utf-8",
            body,
            location: None,
        }
    }

    fn json(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "application/json",
            body,
            location: None,
        }
    }

    fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.to_string(),
            location: None,
        }
    }

    fn redirect(location: String) -> Self {
        Self {
            status: 302,
            content_type: "text/plain; charset=utf-8",
            body: String::new(),
            location: Some(location),
        }
    }
}

pub struct VerificationService<P> {
    provider: P,
}

impl<P: RegistryProvider> VerificationService<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Look a code up against a freshly loaded registry.
    pub fn verify(&self, code: &str) -> Verdict {
        let registry = self.provider.registry();
        match registry.resolve(code) {
            Some(hit) => Verdict {
                found: true,
                name: Some(hit.guest.name.clone()),
                guest_type: Some(hit.guest.guest_type),
                code: hit.key.to_string(),
            },
            None => Verdict {
                found: false,
                name: None,
                guest_type: None,
                code: code.to_string(),
            },
        }
    }

    pub fn handle(&self, method: &Method, url: &str, body: &str) -> Reply {
        let path = url.split(['?', '#']).next().unwrap_or_default();

        match (method, path) {
            (Method::Get, "/") => render(&IndexPage),
            (Method::Post, "/verify") => {
                let code = url::form_urlencoded::parse(body.as_bytes())
                    .find(|(key, _)| key == "code")
                    .map(|(_, value)| value.trim().to_string())
                    .unwrap_or_default();
                if code.is_empty() {
                    Reply::redirect("/".to_string())
                } else {
                    Reply::redirect(format!("/c/{}", urlencoding::encode(&code)))
                }
            }
            (Method::Get, _) => {
                if let Some(segment) = path.strip_prefix("/c/") {
                    return match decode_segment(segment) {
                        Some(code) => self.verify_page(&code),
                        None => Reply::text(400, "Bad Request"),
                    };
                }
                if let Some(segment) = path.strip_prefix("/api/verify/") {
                    return match decode_segment(segment) {
                        Some(code) => self.verify_api(&code),
                        None => Reply::text(400, "Bad Request"),
                    };
                }
                Reply::text(404, "Not Found")
            }
            _ => Reply::text(404, "Not Found"),
        }
    }

    fn verify_page(&self, code: &str) -> Reply {
        let verdict = self.verify(code);
        let page = VerifyPage {
            found: verdict.found,
            name: verdict.name.as_deref().unwrap_or_default(),
            guest_type: verdict.guest_type.map(|t| t.as_str()).unwrap_or_default(),
            code: &verdict.code,
        };
        render(&page)
    }

    fn verify_api(&self, code: &str) -> Reply {
        let verdict = self.verify(code);
        let status = if verdict.found { 200 } else { 404 };
        match serde_json::to_string(&verdict) {
            Ok(body) => Reply::json(status, body),
            Err(e) => {
                warn!(error = %e, "cannot serialize verdict");
                Reply::text(500, "Internal Server Error")
            }
        }
    }
}

fn render<T: Template>(page: &T) -> Reply {
    match page.render() {
        Ok(body) => Reply::html(200, body),
        Err(e) => {
            warn!(error = %e, "template rendering failed");
            Reply::text(500, "Internal Server Error")
        }
    }
}

/// One non-empty, percent-decoded path segment.
fn decode_segment(segment: &str) -> Option<String> {
    if segment.is_empty() || segment.contains('/') {
        return None;
    }
    urlencoding::decode(segment).ok().map(|s| s.into_owned())
}

/// Blocking HTTP front end for a `VerificationService`.
pub struct VerificationServer<P> {
    server: Server,
    service: VerificationService<P>,
}

impl<P: RegistryProvider> VerificationServer<P> {
    pub fn bind(addr: &str, service: VerificationService<P>) -> Result<Self, ServiceError> {
        let server = Server::http(addr).map_err(|e| ServiceError::Bind {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { server, service })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    /// Serve until the listener fails.
    pub fn run(&self) -> Result<(), ServiceError> {
        if let Some(addr) = self.local_addr() {
            info!(%addr, "verification service listening");
        }
        loop {
            let request = self.server.recv()?;
            self.respond(request);
        }
    }

    fn respond(&self, mut request: Request) {
        let mut body = String::new();
        if *request.method() == Method::Post {
            if let Err(e) = request.as_reader().take(MAX_FORM_BYTES).read_to_string(&mut body) {
                debug!(error = %e, "unreadable request body");
                body.clear();
            }
        }

        let reply = self.service.handle(request.method(), request.url(), &body);
        info!(method = %request.method(), url = %request.url(), status = reply.status, "request");

        let mut response = Response::from_string(reply.body).with_status_code(reply.status);
        if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], reply.content_type.as_bytes()) {
            response = response.with_header(header);
        }
        if let Some(location) = reply.location {
            if let Ok(header) = Header::from_bytes(&b"Location"[..], location.as_bytes()) {
                response = response.with_header(header);
            }
        }
        if let Err(e) = request.respond(response) {
            warn!(error = %e, "failed to write response");
        }
    }
}
