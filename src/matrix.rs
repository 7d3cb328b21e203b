//! # Product Matrix Module
//!
//! This module accumulates raw per-document line items into a sparse
//! product × client quantity matrix. Products are keyed by their
//! normalization key, so different spellings of the same product fold into
//! one row.
//!
//! Accumulation is commutative: documents in a batch may be extracted in any
//! order (or in parallel) and the final matrix is identical. This is a
//! contract, not an implementation detail.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::PipelineError;
use crate::normalize::normalize;

/// One extracted order line: a client ordered a quantity of some raw product
/// string. Ephemeral, produced per extracted document, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLineItem {
    /// Client identifier as it appears in the document
    pub client_key: String,
    /// Product name exactly as extracted, before normalization
    pub product_raw: String,
    /// Ordered quantity; must be finite and strictly positive
    pub qty: f64,
    /// Identifier of the source document, for error reporting
    pub source_doc: String,
}

/// Sparse product × client quantity matrix for one ingestion batch.
///
/// Every cell holds the sum of all line-item quantities sharing that
/// (product key, client key) pair; no cell is ever negative.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductMatrix {
    cells: BTreeMap<String, BTreeMap<String, f64>>,
}

impl ProductMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one validated line item into the matrix.
    fn add(&mut self, product_key: String, client_key: String, qty: f64) {
        let cell = self
            .cells
            .entry(product_key)
            .or_default()
            .entry(client_key)
            .or_insert(0.0);
        *cell += qty;
    }

    /// All normalized product keys present in the matrix
    pub fn product_keys(&self) -> Vec<String> {
        self.cells.keys().cloned().collect()
    }

    /// All client keys present in the matrix
    pub fn client_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .cells
            .values()
            .flat_map(|row| row.keys().cloned())
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Quantity accumulated for a (product key, client key) pair, if any
    pub fn cell(&self, product_key: &str, client_key: &str) -> Option<f64> {
        self.cells.get(product_key).and_then(|row| row.get(client_key)).copied()
    }

    /// Per-client quantities for one product key
    pub fn row(&self, product_key: &str) -> Option<&BTreeMap<String, f64>> {
        self.cells.get(product_key)
    }

    /// Total quantity ordered for one product key across all clients
    pub fn product_total(&self, product_key: &str) -> f64 {
        self.cells
            .get(product_key)
            .map(|row| row.values().sum())
            .unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Iterate (product key, client row) pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeMap<String, f64>)> {
        self.cells.iter()
    }
}

/// Fold a batch of raw line items into a product × client matrix.
///
/// Product names are normalized before keying, so " Choco Cake " and
/// "choco cake" land in the same row. Zero, negative, or non-finite
/// quantities are rejected as a [`PipelineError::Validation`]; nothing is
/// clamped silently.
///
/// # Examples
///
/// ```rust
/// use commissary::matrix::{build_matrix, RawLineItem};
///
/// let items = vec![
///     RawLineItem {
///         client_key: "A".to_string(),
///         product_raw: "Choco Cake ".to_string(),
///         qty: 2.0,
///         source_doc: "doc1".to_string(),
///     },
///     RawLineItem {
///         client_key: "A".to_string(),
///         product_raw: "choco cake".to_string(),
///         qty: 1.0,
///         source_doc: "doc2".to_string(),
///     },
/// ];
/// let matrix = build_matrix(&items)?;
/// assert_eq!(matrix.cell("choco cake", "A"), Some(3.0));
/// # Ok::<(), commissary::errors::PipelineError>(())
/// ```
pub fn build_matrix(line_items: &[RawLineItem]) -> Result<ProductMatrix, PipelineError> {
    debug!("Building product matrix from {} line items", line_items.len());

    let mut matrix = ProductMatrix::new();

    for item in line_items {
        if !item.qty.is_finite() || item.qty <= 0.0 {
            return Err(PipelineError::Validation(format!(
                "invalid quantity {} for product '{}' (client '{}', document '{}')",
                item.qty, item.product_raw, item.client_key, item.source_doc
            )));
        }

        let product_key = normalize(&item.product_raw);
        if product_key.is_empty() {
            return Err(PipelineError::Validation(format!(
                "product name '{}' normalizes to an empty key (client '{}', document '{}')",
                item.product_raw, item.client_key, item.source_doc
            )));
        }

        matrix.add(product_key, item.client_key.clone(), item.qty);
    }

    info!(
        "Built matrix with {} products across {} clients",
        matrix.product_keys().len(),
        matrix.client_keys().len()
    );
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(client: &str, product: &str, qty: f64) -> RawLineItem {
        RawLineItem {
            client_key: client.to_string(),
            product_raw: product.to_string(),
            qty,
            source_doc: "test-doc".to_string(),
        }
    }

    #[test]
    fn test_spellings_fold_into_one_cell() {
        // Scenario: two spellings of the same product from one client
        let items = vec![item("A", "Choco Cake ", 2.0), item("A", "choco cake", 1.0)];
        let matrix = build_matrix(&items).unwrap();

        assert_eq!(matrix.cell("choco cake", "A"), Some(3.0));
        assert_eq!(matrix.product_keys(), vec!["choco cake".to_string()]);
    }

    #[test]
    fn test_accumulation_is_commutative() {
        let mut items = vec![
            item("A", "Choco Cake", 2.0),
            item("B", "choco cake", 5.0),
            item("A", "Lemon Tart", 1.0),
            item("A", "CHOCO CAKE ", 1.5),
            item("B", "lemon  tart", 4.0),
        ];

        let forward = build_matrix(&items).unwrap();
        items.reverse();
        let backward = build_matrix(&items).unwrap();

        assert_eq!(forward, backward);
        assert_eq!(forward.cell("choco cake", "A"), Some(3.5));
        assert_eq!(forward.cell("choco cake", "B"), Some(5.0));
    }

    #[test]
    fn test_conservation_of_totals() {
        let items = vec![
            item("A", "Flour", 2.0),
            item("B", "flour ", 3.0),
            item("C", "FLOUR", 4.0),
        ];
        let matrix = build_matrix(&items).unwrap();

        let input_total: f64 = items.iter().map(|i| i.qty).sum();
        assert_eq!(matrix.product_total("flour"), input_total);
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let result = build_matrix(&[item("A", "flour", 0.0)]);
        assert!(matches!(result, Err(PipelineError::Validation(_))));
    }

    #[test]
    fn test_negative_quantity_rejected() {
        let result = build_matrix(&[item("A", "flour", -1.0)]);
        assert!(matches!(result, Err(PipelineError::Validation(_))));
    }

    #[test]
    fn test_non_finite_quantity_rejected() {
        assert!(build_matrix(&[item("A", "flour", f64::NAN)]).is_err());
        assert!(build_matrix(&[item("A", "flour", f64::INFINITY)]).is_err());
    }

    #[test]
    fn test_empty_key_rejected() {
        let result = build_matrix(&[item("A", "***", 1.0)]);
        assert!(matches!(result, Err(PipelineError::Validation(_))));
    }

    #[test]
    fn test_empty_input_gives_empty_matrix() {
        let matrix = build_matrix(&[]).unwrap();
        assert!(matrix.is_empty());
        assert!(matrix.client_keys().is_empty());
    }

    #[test]
    fn test_distinct_clients_keep_distinct_cells() {
        let items = vec![item("A", "flour", 2.0), item("B", "flour", 7.0)];
        let matrix = build_matrix(&items).unwrap();

        assert_eq!(matrix.cell("flour", "A"), Some(2.0));
        assert_eq!(matrix.cell("flour", "B"), Some(7.0));
        assert_eq!(matrix.cell("flour", "C"), None);
        assert_eq!(matrix.client_keys(), vec!["A".to_string(), "B".to_string()]);
    }
}
