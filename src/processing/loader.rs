//! Reading uploaded documents into page texts.
//!
//! PDFs are parsed page by page with `lopdf`; when no page yields text (some encoders defeat
//! `lopdf`'s extractor) the whole document is retried through `pdf-extract` and returned as a
//! single page. Plain text and Markdown treat form feeds (`\x0c`) as page breaks.

use super::types::{LoadError, PageText};
use async_trait::async_trait;
use std::path::Path;

/// Formats the loader understands, keyed by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// Portable Document Format.
    Pdf,
    /// UTF-8 plain text.
    Text,
    /// Markdown, loaded as plain text.
    Markdown,
}

impl DocumentFormat {
    /// Detect a format from the path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" | "text" => Some(Self::Text),
            "md" | "markdown" => Some(Self::Markdown),
            _ => None,
        }
    }
}

/// Turns a file path into ordered page texts.
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// Load the document at `path`.
    async fn load(&self, path: &Path) -> Result<Vec<PageText>, LoadError>;
}

/// Loader reading from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsDocumentLoader;

impl FsDocumentLoader {
    /// Construct a filesystem loader.
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DocumentLoader for FsDocumentLoader {
    async fn load(&self, path: &Path) -> Result<Vec<PageText>, LoadError> {
        let format = DocumentFormat::from_path(path)
            .ok_or_else(|| LoadError::UnsupportedFormat(path.to_path_buf()))?;
        let bytes = tokio::fs::read(path).await.map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                LoadError::NotFound(path.to_path_buf())
            } else {
                LoadError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let pages = match format {
            DocumentFormat::Pdf => {
                let owned = path.to_path_buf();
                tokio::task::spawn_blocking(move || parse_pdf(&owned, &bytes))
                    .await
                    .map_err(|error| LoadError::Corrupt {
                        path: path.to_path_buf(),
                        reason: format!("parser task failed: {error}"),
                    })??
            }
            DocumentFormat::Text | DocumentFormat::Markdown => parse_text(path, bytes)?,
        };

        tracing::debug!(path = %path.display(), format = ?format, pages = pages.len(), "Document loaded");
        Ok(pages)
    }
}

fn parse_text(path: &Path, bytes: Vec<u8>) -> Result<Vec<PageText>, LoadError> {
    let text = String::from_utf8(bytes).map_err(|error| LoadError::Corrupt {
        path: path.to_path_buf(),
        reason: format!("invalid UTF-8: {error}"),
    })?;
    Ok(text
        .split('\x0c')
        .enumerate()
        .map(|(index, page)| PageText {
            page_number: index as u32 + 1,
            text: page.to_string(),
        })
        .collect())
}

fn parse_pdf(path: &Path, bytes: &[u8]) -> Result<Vec<PageText>, LoadError> {
    let corrupt = |reason: String| LoadError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };
    let document = lopdf::Document::load_mem(bytes).map_err(|error| corrupt(error.to_string()))?;

    let mut pages = Vec::new();
    for page_number in document.get_pages().into_keys() {
        match document.extract_text(&[page_number]) {
            Ok(text) => pages.push(PageText { page_number, text }),
            Err(error) => {
                tracing::debug!(path = %path.display(), page_number, error = %error, "Page text extraction failed");
                pages.push(PageText {
                    page_number,
                    text: String::new(),
                });
            }
        }
    }

    if pages.iter().all(|page| page.text.trim().is_empty()) {
        tracing::debug!(path = %path.display(), "Falling back to whole-document PDF extraction");
        let text = pdf_extract::extract_text_from_mem(bytes).map_err(|error| corrupt(error.to_string()))?;
        return Ok(vec![PageText {
            page_number: 1,
            text,
        }]);
    }

    Ok(pages)
}
