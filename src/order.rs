//! # Order Data Model
//!
//! Canonical order entities produced by materialization, plus the aggregated
//! ingredient-requirement rows computed from them. Orders are created once at
//! materialization and edited downstream; requirement rows are a view,
//! recomputed from scratch on every aggregation request and never persisted.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One line of a materialized order. The title is always a canonical catalog
/// name; raw spellings never survive materialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Canonical product title (catalog member)
    pub title: String,
    pub qty: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A normalized per-client order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Batch-local id at materialization time; replaced by the durable store
    /// id on insert
    pub id: i64,
    pub client_name: String,
    /// Event date; `None` until assigned manually or via a batch override
    pub event_date: Option<NaiveDate>,
    pub items: Vec<OrderItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// An order that still needs a manual event date assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingEventDate {
    pub order_id: i64,
    pub client_name: String,
}

/// One aggregated shopping-list row: total demand for an ingredient under a
/// single unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientRequirement {
    /// `"<normalized ingredient name>|<unit>"` — the accumulation key
    pub ingredient_key: String,
    /// Normalized ingredient name
    pub name: String,
    pub unit: String,
    /// Sum of (recipe ingredient qty × order item qty) over all contributors
    pub qty: f64,
    /// Number of order-item expansions that contributed to this row
    pub contributing_orders: usize,
    /// True when the same ingredient name also appears under another unit;
    /// such rows are kept separate, never summed
    pub ambiguous_unit: bool,
}
