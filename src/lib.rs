//! invitecard - Invitation Cards, Dispatch and Verification
//!
//! One guest sheet feeds three consumers:
//! 1. The card generator (name, type, QR pointing at the verify URL)
//! 2. Dispatch (WhatsApp template or SMS per guest, logged line by line)
//! 3. The verification service (code in, guest out)
//!
//! All three agree on what a code is through `code::normalize_code`.

pub mod code;
pub mod source;
pub mod guest;
pub mod registry;
pub mod phone;
pub mod templates;
pub mod hashing;
pub mod card;
pub mod pipeline;
pub mod dispatch;
pub mod validation;
pub mod config;
pub mod service;

pub use code::{normalize_code, CODE_WIDTH};
pub use guest::{GuestRecord, GuestType};
pub use registry::{Registry, RegistryProvider, SpreadsheetRegistry};
pub use source::{Cell, OdsSource, SourceError, TabularSource};
pub use templates::{CardTemplate, MessageTemplates};
pub use card::{CardError, CardRenderer};
pub use pipeline::{GenerationManifest, GenerationPipeline, PipelineError};
pub use dispatch::{Channel, DispatchError, DispatchSummary, Dispatcher, Outcome};
pub use validation::{AuditReport, Auditor};
pub use config::AppConfig;
pub use service::{VerificationServer, VerificationService, Verdict};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
