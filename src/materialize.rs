//! # Order Materialization Module
//!
//! This module turns a classified product matrix (or already-parsed draft
//! orders) into canonical [`Order`] entities. Materialization is the commit
//! half of the two-phase batch protocol: it refuses to run while any product
//! key of the batch is still unresolved, so nothing reaches storage until
//! every name is either mapped or explicitly ignored.
//!
//! Ignored keys are dropped entirely; that is intentional filtering of
//! non-menu text rows, not data loss. Two raw spellings resolving to the same
//! canonical title within one order merge into a single item with summed
//! quantity. Missing event dates are reported for manual assignment instead
//! of being defaulted, unless the caller supplies a per-client override for
//! the batch.

use chrono::NaiveDate;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::alias::Classification;
use crate::errors::PipelineError;
use crate::matrix::ProductMatrix;
use crate::normalize::normalize;
use crate::order::{MissingEventDate, Order, OrderItem};

/// Per-client event date overrides for one batch
pub type DateOverrides = BTreeMap<String, NaiveDate>;

/// An order parsed elsewhere (e.g., an interactive draft) whose item names
/// still need reconciliation against the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftOrder {
    pub client_name: String,
    pub event_date: Option<NaiveDate>,
    pub items: Vec<DraftItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// One unreconciled draft line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftItem {
    pub product_raw: String,
    pub qty: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Result of one materialization: the orders plus any that still need a
/// manual event date.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterializedBatch {
    pub orders: Vec<Order>,
    pub missing_dates: Vec<MissingEventDate>,
}

// Accumulates canonical items for one order, merging duplicate titles.
// Insertion order of first appearance is preserved.
#[derive(Default)]
struct ItemAccumulator {
    items: Vec<OrderItem>,
    index_by_title: BTreeMap<String, usize>,
}

impl ItemAccumulator {
    fn add(&mut self, title: &str, qty: f64, unit: Option<String>, notes: Option<String>) {
        if let Some(&idx) = self.index_by_title.get(title) {
            self.items[idx].qty += qty;
            debug!(
                "Merged duplicate item '{}': new qty {}",
                title, self.items[idx].qty
            );
        } else {
            self.index_by_title
                .insert(title.to_string(), self.items.len());
            self.items.push(OrderItem {
                title: title.to_string(),
                qty,
                unit,
                notes,
            });
        }
    }

    fn into_items(self) -> Vec<OrderItem> {
        self.items
    }
}

fn ensure_resolved(classification: &Classification) -> Result<(), PipelineError> {
    if classification.has_unresolved() {
        return Err(PipelineError::UnresolvedProduct(
            classification.unresolved.clone(),
        ));
    }
    Ok(())
}

/// Materialize canonical orders from a classified product matrix.
///
/// One order per client key, items in product-key order, quantities taken
/// from the accumulated matrix cells. Fails with
/// [`PipelineError::UnresolvedProduct`] while any key of the batch remains
/// unresolved. Keys absent from the classification entirely are treated the
/// same way: nothing unclassified may slip through the commit.
pub fn materialize_matrix(
    matrix: &ProductMatrix,
    classification: &Classification,
    date_overrides: &DateOverrides,
) -> Result<MaterializedBatch, PipelineError> {
    ensure_resolved(classification)?;

    // Defensive completeness check: every matrix key must be classified
    let unclassified: Vec<String> = matrix
        .product_keys()
        .into_iter()
        .filter(|key| {
            !classification.resolved.contains_key(key)
                && !classification.ignored.contains(key)
        })
        .collect();
    if !unclassified.is_empty() {
        return Err(PipelineError::UnresolvedProduct(unclassified));
    }

    let mut accumulators: BTreeMap<String, ItemAccumulator> = BTreeMap::new();

    for (product_key, row) in matrix.iter() {
        let canonical = match classification.resolved.get(product_key) {
            Some(canonical) => canonical,
            // Ignored: intended filtering, dropped without trace
            None => continue,
        };
        for (client_key, &qty) in row {
            accumulators
                .entry(client_key.clone())
                .or_default()
                .add(canonical, qty, None, None);
        }
    }

    let mut batch = MaterializedBatch::default();
    for (order_id, (client_key, acc)) in (1i64..).zip(accumulators) {
        let event_date = date_overrides.get(&client_key).copied();
        if event_date.is_none() {
            batch.missing_dates.push(MissingEventDate {
                order_id,
                client_name: client_key.clone(),
            });
        }
        batch.orders.push(Order {
            id: order_id,
            client_name: client_key,
            event_date,
            items: acc.into_items(),
            notes: None,
        });
    }

    info!(
        "Materialized {} orders ({} missing event dates)",
        batch.orders.len(),
        batch.missing_dates.len()
    );
    Ok(batch)
}

/// Materialize canonical orders from already-parsed drafts.
///
/// Each draft keeps its own client, date, and notes; item names are resolved
/// through the same classification as the matrix path, with identical
/// unresolved/ignored/duplicate-merge semantics. Item quantities are
/// validated here since drafts bypass the matrix boundary.
pub fn materialize_drafts(
    drafts: &[DraftOrder],
    classification: &Classification,
    date_overrides: &DateOverrides,
) -> Result<MaterializedBatch, PipelineError> {
    ensure_resolved(classification)?;

    let mut batch = MaterializedBatch::default();

    for (order_id, draft) in (1i64..).zip(drafts) {
        let mut acc = ItemAccumulator::default();

        for item in &draft.items {
            if !item.qty.is_finite() || item.qty <= 0.0 {
                return Err(PipelineError::Validation(format!(
                    "invalid quantity {} for draft item '{}' (client '{}')",
                    item.qty, item.product_raw, draft.client_name
                )));
            }

            let key = normalize(&item.product_raw);
            if classification.ignored.contains(&key) {
                continue;
            }
            let canonical = classification.resolved.get(&key).ok_or_else(|| {
                PipelineError::UnresolvedProduct(vec![key.clone()])
            })?;
            acc.add(canonical, item.qty, item.unit.clone(), item.notes.clone());
        }

        let event_date = draft
            .event_date
            .or_else(|| date_overrides.get(&draft.client_name).copied());
        if event_date.is_none() {
            batch.missing_dates.push(MissingEventDate {
                order_id,
                client_name: draft.client_name.clone(),
            });
        }
        batch.orders.push(Order {
            id: order_id,
            client_name: draft.client_name.clone(),
            event_date,
            items: acc.into_items(),
            notes: draft.notes.clone(),
        });
    }

    info!(
        "Materialized {} orders from drafts ({} missing event dates)",
        batch.orders.len(),
        batch.missing_dates.len()
    );
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::{classify, AliasMapping};
    use crate::catalog::MenuCatalog;
    use crate::matrix::{build_matrix, RawLineItem};

    fn item(client: &str, product: &str, qty: f64) -> RawLineItem {
        RawLineItem {
            client_key: client.to_string(),
            product_raw: product.to_string(),
            qty,
            source_doc: "test-doc".to_string(),
        }
    }

    fn catalog() -> MenuCatalog {
        MenuCatalog::new(["Choco Cake", "Lemon Tart"])
    }

    fn classify_matrix(
        matrix: &ProductMatrix,
        mapping: &AliasMapping,
    ) -> Classification {
        classify(&matrix.product_keys(), &catalog(), mapping)
    }

    #[test]
    fn test_refuses_while_unresolved_remains() {
        let matrix = build_matrix(&[item("A", "Mystery Pie", 1.0)]).unwrap();
        let classification = classify_matrix(&matrix, &AliasMapping::new());

        let result = materialize_matrix(&matrix, &classification, &DateOverrides::new());
        match result {
            Err(PipelineError::UnresolvedProduct(keys)) => {
                assert_eq!(keys, vec!["mystery pie".to_string()]);
            }
            other => panic!("expected UnresolvedProduct, got {other:?}"),
        }
    }

    #[test]
    fn test_materializes_catalog_matches() {
        let matrix =
            build_matrix(&[item("A", "Choco Cake", 2.0), item("A", "Lemon Tart", 1.0)]).unwrap();
        let classification = classify_matrix(&matrix, &AliasMapping::new());

        let batch =
            materialize_matrix(&matrix, &classification, &DateOverrides::new()).unwrap();
        assert_eq!(batch.orders.len(), 1);
        let order = &batch.orders[0];
        assert_eq!(order.client_name, "A");
        assert_eq!(order.items.len(), 2);
        assert!(order
            .items
            .iter()
            .any(|i| i.title == "Choco Cake" && i.qty == 2.0));
    }

    #[test]
    fn test_duplicate_raw_strings_merge_into_one_item() {
        // "chocolate cake" aliases to the same canonical title as the direct
        // catalog match, so one order item carries the summed quantity.
        let matrix = build_matrix(&[
            item("A", "Choco Cake", 2.0),
            item("A", "Chocolate Cake", 1.0),
        ])
        .unwrap();

        let mut mapping = AliasMapping::new();
        mapping
            .aliases
            .insert("chocolate cake".to_string(), "Choco Cake".to_string());
        let classification = classify_matrix(&matrix, &mapping);

        let batch =
            materialize_matrix(&matrix, &classification, &DateOverrides::new()).unwrap();
        let order = &batch.orders[0];
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].title, "Choco Cake");
        assert_eq!(order.items[0].qty, 3.0);

        // An order never carries two items with the same canonical title
        let mut titles: Vec<&str> = order.items.iter().map(|i| i.title.as_str()).collect();
        titles.sort();
        titles.dedup();
        assert_eq!(titles.len(), order.items.len());
    }

    #[test]
    fn test_ignored_keys_are_dropped_silently() {
        let matrix = build_matrix(&[
            item("A", "Choco Cake", 2.0),
            item("A", "Delivery Fee", 1.0),
        ])
        .unwrap();

        let mut mapping = AliasMapping::new();
        mapping.ignored.insert("delivery fee".to_string());
        let classification = classify_matrix(&matrix, &mapping);

        let batch =
            materialize_matrix(&matrix, &classification, &DateOverrides::new()).unwrap();
        let order = &batch.orders[0];
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].title, "Choco Cake");
    }

    #[test]
    fn test_missing_dates_reported_not_defaulted() {
        let matrix =
            build_matrix(&[item("A", "Choco Cake", 1.0), item("B", "Lemon Tart", 1.0)]).unwrap();
        let classification = classify_matrix(&matrix, &AliasMapping::new());

        let mut overrides = DateOverrides::new();
        overrides.insert("A".to_string(), NaiveDate::from_ymd_opt(2026, 9, 1).unwrap());

        let batch = materialize_matrix(&matrix, &classification, &overrides).unwrap();

        let a = batch.orders.iter().find(|o| o.client_name == "A").unwrap();
        let b = batch.orders.iter().find(|o| o.client_name == "B").unwrap();
        assert!(a.event_date.is_some());
        assert!(b.event_date.is_none());

        assert_eq!(batch.missing_dates.len(), 1);
        assert_eq!(batch.missing_dates[0].client_name, "B");
        assert_eq!(batch.missing_dates[0].order_id, b.id);
    }

    #[test]
    fn test_one_order_per_client() {
        let matrix = build_matrix(&[
            item("A", "Choco Cake", 1.0),
            item("B", "Choco Cake", 2.0),
            item("C", "Lemon Tart", 3.0),
        ])
        .unwrap();
        let classification = classify_matrix(&matrix, &AliasMapping::new());

        let batch =
            materialize_matrix(&matrix, &classification, &DateOverrides::new()).unwrap();
        assert_eq!(batch.orders.len(), 3);
        let clients: Vec<&str> = batch.orders.iter().map(|o| o.client_name.as_str()).collect();
        assert_eq!(clients, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_drafts_resolve_merge_and_keep_metadata() {
        let drafts = vec![DraftOrder {
            client_name: "A".to_string(),
            event_date: NaiveDate::from_ymd_opt(2026, 9, 1),
            items: vec![
                DraftItem {
                    product_raw: "Choco Cake".to_string(),
                    qty: 2.0,
                    unit: None,
                    notes: None,
                },
                DraftItem {
                    product_raw: "chocolate cake".to_string(),
                    qty: 1.0,
                    unit: None,
                    notes: None,
                },
                DraftItem {
                    product_raw: "Napkins".to_string(),
                    qty: 20.0,
                    unit: None,
                    notes: None,
                },
            ],
            notes: Some("deliver early".to_string()),
        }];

        let mut mapping = AliasMapping::new();
        mapping
            .aliases
            .insert("chocolate cake".to_string(), "Choco Cake".to_string());
        mapping.ignored.insert("napkins".to_string());

        let keys: Vec<String> = drafts[0]
            .items
            .iter()
            .map(|i| normalize(&i.product_raw))
            .collect();
        let classification = classify(&keys, &catalog(), &mapping);

        let batch =
            materialize_drafts(&drafts, &classification, &DateOverrides::new()).unwrap();
        assert_eq!(batch.orders.len(), 1);
        let order = &batch.orders[0];
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.items[0].qty, 3.0);
        assert_eq!(order.notes.as_deref(), Some("deliver early"));
        assert!(batch.missing_dates.is_empty());
    }

    #[test]
    fn test_draft_with_invalid_qty_rejected() {
        let drafts = vec![DraftOrder {
            client_name: "A".to_string(),
            event_date: None,
            items: vec![DraftItem {
                product_raw: "Choco Cake".to_string(),
                qty: -1.0,
                unit: None,
                notes: None,
            }],
            notes: None,
        }];
        let classification = classify(
            &["choco cake".to_string()],
            &catalog(),
            &AliasMapping::new(),
        );

        let result = materialize_drafts(&drafts, &classification, &DateOverrides::new());
        assert!(matches!(result, Err(PipelineError::Validation(_))));
    }
}
