//! Ingestion input: per-page text handed over by the document reader.
//!
//! The reader that pulls text layers out of PDFs lives outside this crate.
//! What crosses the boundary is [`DocumentInput`]: the document's name, its
//! pages' text, and a flag per page saying whether the text layer was
//! usable. Scanned pages arrive with `text_layer_ok = false` and are routed
//! through fallback inference, together with the page image the reader
//! rendered for them, when there is one.
//!
//! ## Files on disk
//!
//! [`load_inputs`] accepts two shapes:
//! * `*.json`: an ingestion manifest, either one `DocumentInput` object or
//!   an array of them.
//! * anything else: a plain text layer, one document per file.

use crate::error::TaxError;
use crate::schema::ExtractionSource;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A rendered page image, base64-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageImage {
    pub data: String,
    /// e.g. `image/png`
    pub mime_type: String,
}

/// Text of one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageText {
    #[serde(default)]
    pub text: String,
    /// False when text-layer extraction failed for this page (scanned image).
    #[serde(default = "default_true")]
    pub text_layer_ok: bool,
    #[serde(default)]
    pub image: Option<PageImage>,
}

fn default_true() -> bool {
    true
}

/// One uploaded document as delivered by the ingestion collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentInput {
    pub name: String,
    pub pages: Vec<PageText>,
    /// Loose form name declared at upload time ("W-2", "1099-INT", …).
    #[serde(default)]
    pub kind_hint: Option<String>,
}

impl DocumentInput {
    /// A single-page document with a working text layer.
    pub fn from_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pages: vec![PageText {
                text: text.into(),
                text_layer_ok: true,
                image: None,
            }],
            kind_hint: None,
        }
    }

    /// A scanned document: `pages` pages with no usable text layer.
    pub fn scanned(name: impl Into<String>, pages: usize) -> Self {
        Self {
            name: name.into(),
            pages: (0..pages)
                .map(|_| PageText {
                    text: String::new(),
                    text_layer_ok: false,
                    image: None,
                })
                .collect(),
            kind_hint: None,
        }
    }

    /// Images of every page that has one, in page order.
    pub fn images(&self) -> impl Iterator<Item = &PageImage> {
        self.pages.iter().filter_map(|p| p.image.as_ref())
    }

    pub fn with_kind_hint(mut self, hint: impl Into<String>) -> Self {
        self.kind_hint = Some(hint.into());
        self
    }

    /// All page text joined with blank lines.
    pub fn text(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// `TextLayer` iff every page's text layer succeeded and there is text.
    pub fn extraction_source(&self) -> ExtractionSource {
        let usable = !self.pages.is_empty()
            && self.pages.iter().all(|p| p.text_layer_ok)
            && self.pages.iter().any(|p| !p.text.trim().is_empty());
        if usable {
            ExtractionSource::TextLayer
        } else {
            ExtractionSource::InferredFallback
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Manifest {
    Many(Vec<DocumentInput>),
    One(DocumentInput),
}

fn is_manifest(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Read documents from disk, in argument order.
pub async fn load_inputs(paths: &[PathBuf]) -> Result<Vec<DocumentInput>, TaxError> {
    let mut inputs = Vec::new();
    for path in paths {
        let content =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| TaxError::InputRead {
                    path: path.clone(),
                    source,
                })?;

        if is_manifest(path) {
            let manifest: Manifest =
                serde_json::from_str(&content).map_err(|e| TaxError::InvalidManifest {
                    path: path.clone(),
                    detail: e.to_string(),
                })?;
            let docs = match manifest {
                Manifest::Many(docs) => docs,
                Manifest::One(doc) => vec![doc],
            };
            debug!("{}: manifest with {} document(s)", path.display(), docs.len());
            inputs.extend(docs);
        } else {
            debug!("{}: text layer, {} bytes", path.display(), content.len());
            inputs.push(DocumentInput::from_text(file_name(path), content));
        }
    }
    info!("Loaded {} document(s) from {} file(s)", inputs.len(), paths.len());
    Ok(inputs)
}
