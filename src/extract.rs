//! # Document Extraction Module
//!
//! This module is the boundary to the external document-to-text primitive.
//! Real extraction (OCR, PDF, spreadsheet export) lives outside this crate
//! behind the [`DocumentExtractor`] trait; what lives here is the line-item
//! parser that turns already-extracted text into [`RawLineItem`]s.
//!
//! ## Line format
//!
//! One order line per text line, semicolon-separated:
//!
//! ```text
//! Client A ; Choco Cake ; 2
//! Client A ; lemon tart ; 1,5
//! ```
//!
//! Blank lines and `#` comment lines are skipped. Anything else that does not
//! match the format fails the whole document with a parse error naming the
//! document and line, because a batch is all-or-nothing.

use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;

use crate::errors::PipelineError;
use crate::matrix::RawLineItem;

/// One uploaded order document, as received by the ingestion endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// File name or other caller-supplied identifier, used in error messages
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// External document-to-text primitive.
///
/// Implementations must be safe to call concurrently; the ingestion service
/// extracts the documents of one batch in parallel.
pub trait DocumentExtractor: Send + Sync {
    /// Extract the full text of one document. Failure aborts the whole batch.
    fn extract_text(&self, doc: &Document) -> Result<String, PipelineError>;
}

/// Trivial extractor for documents that already are UTF-8 text
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8TextExtractor;

impl DocumentExtractor for Utf8TextExtractor {
    fn extract_text(&self, doc: &Document) -> Result<String, PipelineError> {
        String::from_utf8(doc.bytes.clone()).map_err(|e| {
            PipelineError::Parse(format!(
                "document '{}' is not valid UTF-8: {e}",
                doc.name
            ))
        })
    }
}

lazy_static! {
    static ref LINE_ITEM: Regex = Regex::new(
        r"^\s*(?P<client>[^;]+?)\s*;\s*(?P<product>[^;]+?)\s*;\s*(?P<qty>\d+(?:[.,]\d+)?)\s*$"
    )
    .expect("line item pattern should be valid");
}

/// Parse extracted document text into raw line items.
///
/// # Examples
///
/// ```rust
/// use commissary::extract::parse_line_items;
///
/// let text = "Client A ; Choco Cake ; 2\n# a comment\nClient B ; lemon tart ; 1,5\n";
/// let items = parse_line_items("orders.txt", text)?;
///
/// assert_eq!(items.len(), 2);
/// assert_eq!(items[0].client_key, "Client A");
/// assert_eq!(items[1].qty, 1.5);
/// # Ok::<(), commissary::errors::PipelineError>(())
/// ```
pub fn parse_line_items(doc_name: &str, text: &str) -> Result<Vec<RawLineItem>, PipelineError> {
    let mut items = Vec::new();

    for (line_number, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let caps = LINE_ITEM.captures(line).ok_or_else(|| {
            PipelineError::Parse(format!(
                "document '{}', line {}: cannot parse '{}'",
                doc_name,
                line_number + 1,
                trimmed
            ))
        })?;

        // Comma decimals arrive from locale-formatted documents
        let qty: f64 = caps["qty"].replace(',', ".").parse().map_err(|_| {
            PipelineError::Parse(format!(
                "document '{}', line {}: invalid quantity '{}'",
                doc_name,
                line_number + 1,
                &caps["qty"]
            ))
        })?;

        debug!(
            "Parsed line {} of '{}': client='{}', product='{}', qty={}",
            line_number + 1,
            doc_name,
            &caps["client"],
            &caps["product"],
            qty
        );

        items.push(RawLineItem {
            client_key: caps["client"].to_string(),
            product_raw: caps["product"].to_string(),
            qty,
            source_doc: doc_name.to_string(),
        });
    }

    info!("Parsed {} line items from document '{}'", items.len(), doc_name);
    Ok(items)
}
