//! # Commissary Order Pipeline
//!
//! Ingests heterogeneous per-client order documents, reconciles free-text
//! product names against a canonical catalog with persisted operator
//! decisions, materializes normalized orders, and aggregates the ingredient
//! demand of a set of orders against a recipe catalog into one shopping list.

pub mod aggregate;
pub mod alias;
pub mod catalog;
pub mod errors;
pub mod extract;
pub mod ingest;
pub mod materialize;
pub mod matrix;
pub mod normalize;
pub mod order;
pub mod store;
