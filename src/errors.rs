//! # Pipeline Error Types Module
//!
//! This module defines the error taxonomy for the ingestion and
//! reconciliation pipeline. Extraction- and validation-level failures are
//! errors; reconciliation-level conditions (unresolved names, unmatched
//! dishes, unit ambiguity) are first-class result fields elsewhere, never
//! exceptions.

/// Custom error types for pipeline operations
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// Malformed or oversized input, rejected before any processing starts
    Validation(String),
    /// A document's text could not be extracted; aborts the whole batch
    Parse(String),
    /// Two different canonical targets proposed for the same key in one
    /// resolution round; no mutation happens
    MappingConflict(String),
    /// Materialization attempted while unresolved keys remain; carries the
    /// offending keys so the caller can resume the decision step
    UnresolvedProduct(Vec<String>),
}

impl PipelineError {
    /// Stable machine-readable code for endpoint error bodies
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation_error",
            PipelineError::Parse(_) => "parse_error",
            PipelineError::MappingConflict(_) => "mapping_conflict",
            PipelineError::UnresolvedProduct(_) => "unresolved_product",
        }
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Validation(msg) => write!(f, "Validation error: {msg}"),
            PipelineError::Parse(msg) => write!(f, "Parse error: {msg}"),
            PipelineError::MappingConflict(msg) => write!(f, "Mapping conflict: {msg}"),
            PipelineError::UnresolvedProduct(keys) => {
                write!(f, "Unresolved product keys: {}", keys.join(", "))
            }
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Validation(err.to_string())
    }
}
