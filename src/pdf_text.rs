// src/pdf_text.rs

use crate::error::{BotError, Result};
use crate::heuristics::{self, ExtractedPdfRecord};
use lopdf::{Document, Object, ObjectId};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// What the text layer of an invoice PDF yielded.
#[derive(Debug)]
pub enum InvoiceText {
    Text(String),
    /// Printed and scanned; there is no text layer to read fields from.
    Scanned,
    Unreadable(String),
}

/// A DIAN graphic representation carries far more text than this; anything
/// shorter is a scan with a stray label.
const MIN_TEXT_CHARS: usize = 30;

/// Share of image-only pages above which the document counts as scanned.
const SCANNED_PAGE_RATIO: f64 = 0.8;

pub fn read_invoice_text(pdf_bytes: &[u8]) -> InvoiceText {
    let doc = match Document::load_mem(pdf_bytes) {
        Ok(d) => d,
        Err(e) => return InvoiceText::Unreadable(format!("Failed to parse PDF: {e}")),
    };
    if is_scan(&doc) {
        info!("Invoice PDF has no text layer");
        return InvoiceText::Scanned;
    }

    let text = match pdf_extract::extract_text_from_mem(pdf_bytes) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Text extraction failed, handling the invoice as a scan");
            return InvoiceText::Scanned;
        }
    };
    let chars = text.chars().filter(|c| !c.is_whitespace()).count();
    if chars < MIN_TEXT_CHARS {
        info!(chars, "Invoice text too short to hold any field");
        return InvoiceText::Scanned;
    }
    InvoiceText::Text(text)
}

/// A page is image-only when its resources hold XObjects but no fonts.
fn is_image_only_page(doc: &Document, page: ObjectId) -> bool {
    let resources = doc
        .get_object(page)
        .and_then(Object::as_dict)
        .and_then(|page| page.get(b"Resources"))
        .and_then(|r| doc.dereference(r))
        .and_then(|(_, r)| r.as_dict())
        .ok();
    let has_entries = |key: &[u8]| {
        resources
            .and_then(|res| res.get(key).ok())
            .and_then(|entry| doc.dereference(entry).ok())
            .and_then(|(_, entry)| entry.as_dict().ok())
            .is_some_and(|d| !d.is_empty())
    };
    has_entries(b"XObject".as_slice()) && !has_entries(b"Font".as_slice())
}

fn is_scan(doc: &Document) -> bool {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return false;
    }
    let image_only = pages
        .values()
        .filter(|&&page| is_image_only_page(doc, page))
        .count();
    let ratio = image_only as f64 / pages.len() as f64;
    debug!(pages = pages.len(), image_only, ratio = format!("{ratio:.2}"), "Page scan check");
    ratio >= SCANNED_PAGE_RATIO
}

/// Read a PDF and parse its fields.
///
/// Missing fields come back as `None`; only an unreadable or unparseable file
/// is an error. Scans have no text, so every field is `None`.
pub fn extract_record(path: &Path) -> Result<ExtractedPdfRecord> {
    let span = tracing::info_span!("pdf", file = %path.display());
    let _guard = span.enter();

    if !path.is_file() {
        return Err(BotError::MissingFile(path.to_path_buf()));
    }
    let bytes = fs::read(path)?;

    match read_invoice_text(&bytes) {
        InvoiceText::Text(text) => {
            let record = heuristics::extract_fields(path.to_path_buf(), &text);
            let (filled, total) = record.coverage();
            info!(
                filled,
                total,
                contributor = ?record.vendor.contributor_type,
                regime = ?record.vendor.tax_regime,
                payment = ?record.payment_method,
                gross_total = ?record.gross_total_value(),
                "Extraction result"
            );
            Ok(record)
        }
        InvoiceText::Scanned => {
            warn!("Scanned invoice, no fields can be read");
            Ok(ExtractedPdfRecord {
                source: path.to_path_buf(),
                ..Default::default()
            })
        }
        InvoiceText::Unreadable(e) => Err(BotError::Pdf(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_garbage_bytes() {
        let result = read_invoice_text(b"this is not a pdf");
        assert!(matches!(result, InvoiceText::Unreadable(_)));
    }

    #[test]
    fn test_unparseable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"%PDF-garbage").unwrap();
        assert!(matches!(extract_record(&path), Err(BotError::Pdf(_))));
    }

    #[test]
    fn test_missing_file() {
        let err = extract_record(Path::new("/nonexistent/x.pdf")).unwrap_err();
        assert!(matches!(err, BotError::MissingFile(_)));
    }
}
