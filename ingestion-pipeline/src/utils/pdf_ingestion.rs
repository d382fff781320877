use std::fmt::Write as _;
use std::time::Duration;

use common::error::AppError;
use lopdf::Document as LopdfDocument;

const FORM_FEED: char = '\u{c}';

/// Page-marked plain text plus the page count it was drawn from.
pub struct ExtractedPdf {
    pub marked_text: String,
    pub page_count: u32,
}

/// Extracts page-marked plain text from a PDF byte stream (C4's PDF phase).
/// `pdf_extract` performs the positional (Y-then-X, line-joined) layout
/// reconstruction internally and separates pages with form feeds; this wraps
/// that output with the `[Page N]` markers the chunker keys off of. `lopdf`
/// independently confirms the page count in case the text extractor produced
/// fewer form-feed-delimited sections than the document actually has (blank
/// trailing pages yield no extractable text but still count).
pub async fn extract_pdf_text(bytes: bytes::Bytes, timeout: Duration) -> Result<ExtractedPdf, AppError> {
    tokio::time::timeout(
        timeout,
        tokio::task::spawn_blocking(move || extract_pdf_text_blocking(&bytes)),
    )
    .await
    .map_err(|_| AppError::Timeout("pdf extraction exceeded its time budget".into()))?
    .map_err(|e| AppError::InternalError(format!("pdf extraction task panicked: {e}")))?
}

fn extract_pdf_text_blocking(bytes: &[u8]) -> Result<ExtractedPdf, AppError> {
    let raw = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| AppError::Processing(format!("pdf text extraction failed: {e}")))?;

    let lopdf_page_count = LopdfDocument::load_mem(bytes).map(|doc| doc.get_pages().len()).unwrap_or(0);

    let pages: Vec<&str> = raw.split(FORM_FEED).collect();
    let page_count = if lopdf_page_count > 0 { lopdf_page_count } else { pages.len().max(1) };

    let mut marked_text = String::with_capacity(raw.len() + page_count * 16);
    for (idx, page_text) in pages.iter().enumerate() {
        let page_number = idx + 1;
        let _ = writeln!(marked_text, "[Page {page_number}]");
        marked_text.push_str(page_text.trim());
        marked_text.push('\n');
    }

    Ok(ExtractedPdf {
        marked_text,
        page_count: u32::try_from(page_count).unwrap_or(u32::MAX),
    })
}
