//! PDF text extraction.
//!
//! Turns one or more submission PDFs into a single text blob. Pages keep
//! their order within a file and files keep the order they were given in.
//! A PDF without a text layer (e.g. a scan) contributes nothing; that is
//! logged but not an error.

use crate::error::{GraderError, Result};
use std::fs;
use std::path::Path;

const PDF_MAGIC: &[u8] = b"%PDF-";

/// Character range of the concatenated text that came from one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpan {
    pub name: String,
    pub start: usize,
    pub end: usize,
}

/// Concatenated submission text, remembering which file each part came from.
#[derive(Debug, Clone, Default)]
pub struct ExtractedText {
    pub text: String,
    pub spans: Vec<SourceSpan>,
}

impl ExtractedText {
    /// Name of the file the character at `offset` came from.
    pub fn source_at(&self, offset: usize) -> Option<&str> {
        self.spans
            .iter()
            .find(|span| span.start <= offset && offset < span.end)
            .map(|span| span.name.as_str())
    }
}

/// Extract and concatenate the text of every PDF in `paths`.
pub fn extract_text<P: AsRef<Path>>(paths: &[P]) -> Result<String> {
    Ok(extract_files(paths)?.text)
}

/// Like [`extract_text`], also recording each file's character range.
pub fn extract_files<P: AsRef<Path>>(paths: &[P]) -> Result<ExtractedText> {
    let mut out = ExtractedText::default();
    let mut offset = 0;
    for path in paths {
        let path = path.as_ref();
        let text = extract_pdf(path)?;
        let len = text.chars().count();
        out.spans.push(SourceSpan {
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            start: offset,
            end: offset + len,
        });
        out.text.push_str(&text);
        offset += len;
    }
    Ok(out)
}

/// Extract the text of a single PDF file.
pub fn extract_pdf(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(GraderError::extraction(path, "file does not exist"));
    }

    let bytes = fs::read(path).map_err(|e| GraderError::extraction(path, e.to_string()))?;
    let text = extract_pdf_bytes(&bytes).map_err(|message| GraderError::extraction(path, message))?;

    if text.trim().is_empty() {
        tracing::warn!("No extractable text in {}", path.display());
    } else {
        tracing::debug!("Extracted {} chars from {}", text.chars().count(), path.display());
    }

    Ok(text)
}

/// Extract text from in-memory PDF bytes.
pub fn extract_pdf_bytes(bytes: &[u8]) -> std::result::Result<String, String> {
    if !bytes.starts_with(PDF_MAGIC) {
        return Err("not a PDF document (missing %PDF- header)".to_string());
    }
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| e.to_string())
}
