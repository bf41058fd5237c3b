//! Generation Pipeline - One Card Folder per Guest
//!
//! Rows are processed strictly in order. A guest whose card cannot be
//! rendered is counted and skipped; a file that cannot be written stops
//! the run.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::card::{encode_png, is_file_safe_code, sanitize_folder_name, CardError, CardRenderer};
use crate::code::normalize_code;
use crate::guest::GuestRecord;
use crate::hashing::{manifest_digest, sha256_hex};
use crate::templates::MessageTemplates;
use crate::VERSION;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const WHATSAPP_FILE: &str = "message_whatsapp.txt";
pub const SMS_FILE: &str = "message_sms.txt";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Cannot write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedCard {
    pub name: String,
    pub code: String,
    pub folder: PathBuf,
    pub card: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedCard {
    pub name: String,
    pub code: String,
    pub error: String,
}

/// Written next to the card folders after every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationManifest {
    pub run_id: String,
    pub engine_version: String,
    pub created_at: DateTime<Utc>,
    pub cards: Vec<GeneratedCard>,
    pub failures: Vec<FailedCard>,
    pub manifest_hash: String,
}

impl GenerationManifest {
    pub fn generated(&self) -> usize {
        self.cards.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

pub struct GenerationPipeline {
    renderer: CardRenderer,
    messages: MessageTemplates,
    out_dir: PathBuf,
}

impl GenerationPipeline {
    pub fn new(renderer: CardRenderer, messages: MessageTemplates, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            renderer,
            messages,
            out_dir: out_dir.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Generate every guest's card and messages, then the manifest.
    pub fn run(&self, guests: &[GuestRecord]) -> Result<GenerationManifest, PipelineError> {
        create_dir(&self.out_dir)?;

        let mut cards = Vec::new();
        let mut failures = Vec::new();

        for guest in guests {
            match self.generate_one(guest) {
                Ok(card) => {
                    cards.push(card);
                    if cards.len() % 10 == 0 {
                        info!(generated = cards.len(), "generating cards");
                    }
                }
                Err(GenerateError::Card(e)) => {
                    warn!(name = %guest.name, code = %guest.code, error = %e, "card generation failed");
                    failures.push(FailedCard {
                        name: guest.name.clone(),
                        code: guest.code.clone(),
                        error: e.to_string(),
                    });
                }
                Err(GenerateError::Fatal(e)) => return Err(e),
            }
        }

        let mut manifest = GenerationManifest {
            run_id: Uuid::new_v4().to_string(),
            engine_version: VERSION.to_string(),
            created_at: Utc::now(),
            cards,
            failures,
            manifest_hash: String::new(),
        };
        manifest.manifest_hash = manifest_digest(&(&manifest.cards, &manifest.failures))?;

        let path = self.out_dir.join(MANIFEST_FILE);
        write_file(&path, serde_json::to_string_pretty(&manifest)?.as_bytes())?;

        info!(
            generated = manifest.generated(),
            failed = manifest.failed(),
            out_dir = %self.out_dir.display(),
            "card generation finished"
        );
        Ok(manifest)
    }

    fn generate_one(&self, guest: &GuestRecord) -> Result<GeneratedCard, GenerateError> {
        let code = normalize_code(&guest.code).ok_or_else(|| CardError::MissingCode(guest.name.clone()))?;
        if !is_file_safe_code(&code) {
            return Err(CardError::UnsafeCode(code).into());
        }
        let image = self.renderer.render(guest)?;
        let png = encode_png(&image)?;

        let folder = self.out_dir.join(format!("{}_{}", sanitize_folder_name(&guest.name), code));
        create_dir(&folder)?;

        let card = folder.join(format!("{code}.png"));
        write_file(&card, &png)?;
        write_file(&folder.join(WHATSAPP_FILE), self.messages.whatsapp_for(&code).as_bytes())?;
        write_file(&folder.join(SMS_FILE), self.messages.sms_for(&code).as_bytes())?;

        Ok(GeneratedCard {
            name: guest.name.clone(),
            code,
            folder,
            card,
            sha256: sha256_hex(&png),
        })
    }
}

enum GenerateError {
    Card(CardError),
    Fatal(PipelineError),
}

impl From<CardError> for GenerateError {
    fn from(e: CardError) -> Self {
        GenerateError::Card(e)
    }
}

impl From<PipelineError> for GenerateError {
    fn from(e: PipelineError) -> Self {
        GenerateError::Fatal(e)
    }
}

fn create_dir(path: &Path) -> Result<(), PipelineError> {
    fs::create_dir_all(path).map_err(|source| PipelineError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), PipelineError> {
    fs::write(path, contents).map_err(|source| PipelineError::Write {
        path: path.to_path_buf(),
        source,
    })
}
