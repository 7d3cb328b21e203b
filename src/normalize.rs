//! # Name Normalization Module
//!
//! This module canonicalizes raw product and ingredient names into stable
//! matching keys. All catalog, alias, and aggregation lookups in the crate go
//! through [`normalize`], so two spellings match exactly when their keys are
//! equal and never otherwise.
//!
//! ## Transformations
//!
//! - Trim leading/trailing whitespace
//! - Collapse internal whitespace runs to a single space
//! - Unicode case-folding (non-Latin scripts without case pass through unchanged)
//! - Strip punctuation noise introduced by document extraction artifacts
//!
//! No stemming, no transliteration, no edit-distance matching: matching is
//! exact-after-normalization only.

use lazy_static::lazy_static;
use log::trace;
use regex::Regex;

// Characters with no matching value: everything that is not a letter, digit,
// whitespace, hyphen, or apostrophe. Hyphens and apostrophes are kept because
// they distinguish real product names ("all-purpose flour", "l'orange").
lazy_static! {
    static ref NOISE_CHARS: Regex =
        Regex::new(r"[^\w\s'-]").expect("noise character pattern should be valid");
}

/// Canonicalize a raw product or ingredient string into a matching key.
///
/// Pure, deterministic, and idempotent: `normalize(normalize(s)) == normalize(s)`
/// for every input.
///
/// # Examples
///
/// ```rust
/// use commissary::normalize::normalize;
///
/// assert_eq!(normalize("  Choco   Cake "), "choco cake");
/// assert_eq!(normalize("choco cake"), "choco cake");
/// assert_eq!(normalize("Crème brûlée!!"), "crème brûlée");
/// ```
pub fn normalize(raw: &str) -> String {
    let stripped = NOISE_CHARS.replace_all(raw, " ");
    let key = stripped
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .to_lowercase();

    trace!("Normalized '{}' -> '{}'", raw, key);
    key
}
