//! # Shopping List Aggregation Module
//!
//! This module expands a set of materialized orders through the recipe
//! catalog and consolidates the implied ingredient demand into one shopping
//! list. Every order item is scaled by its ordered quantity and summed by
//! `(normalized ingredient name, unit)`.
//!
//! Dishes without a recipe are reported, not fatal. The same ingredient name
//! appearing under two different units is never summed: both rows are kept
//! and flagged ambiguous-unit, because unit conversion is out of scope for
//! this pipeline.
//!
//! Totals are commutative and associative over the input orders, so the
//! result is independent of the order they are supplied in; row ordering is
//! insertion-stable by first-seen ingredient for deterministic tests.

use log::{debug, info, warn};
use std::collections::HashMap;

use crate::catalog::RecipeCatalog;
use crate::normalize::normalize;
use crate::order::{IngredientRequirement, Order};

/// Consolidated shopping list for a set of orders
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShoppingList {
    /// One row per (normalized ingredient name, unit), first-seen order
    pub requirements: Vec<IngredientRequirement>,
    /// Canonical dish titles with no recipe in the catalog, first-seen order,
    /// deduplicated; excluded from the totals
    pub unmatched_dishes: Vec<String>,
    /// Normalized ingredient names that appear under more than one unit
    pub ambiguous_units: Vec<String>,
}

/// Aggregate ingredient demand for a set of orders against the recipe catalog.
///
/// # Examples
///
/// ```rust
/// use commissary::aggregate::aggregate;
/// use commissary::catalog::{IngredientGroup, Recipe, RecipeCatalog, RecipeIngredient};
/// use commissary::order::{Order, OrderItem};
///
/// let mut recipes = RecipeCatalog::new();
/// recipes.insert(
///     "Choco Cake".to_string(),
///     Recipe {
///         id: "r-1".to_string(),
///         title: "Choco Cake".to_string(),
///         ingredient_groups: vec![IngredientGroup {
///             group_name: "batter".to_string(),
///             items: vec![RecipeIngredient {
///                 name: "flour".to_string(),
///                 qty: 200.0,
///                 unit: "g".to_string(),
///             }],
///         }],
///     },
/// );
/// let orders = vec![Order {
///     id: 1,
///     client_name: "A".to_string(),
///     event_date: None,
///     items: vec![OrderItem { title: "Choco Cake".to_string(), qty: 2.0, unit: None, notes: None }],
///     notes: None,
/// }];
///
/// let list = aggregate(&orders, &recipes);
/// assert_eq!(list.requirements[0].ingredient_key, "flour|g");
/// assert_eq!(list.requirements[0].qty, 400.0);
/// ```
pub fn aggregate(orders: &[Order], recipes: &RecipeCatalog) -> ShoppingList {
    let mut list = ShoppingList::default();
    // ingredient_key -> index into list.requirements
    let mut row_index: HashMap<String, usize> = HashMap::new();
    // normalized name -> index of first unit seen, to detect ambiguity
    let mut units_by_name: HashMap<String, Vec<String>> = HashMap::new();
    let mut unmatched_seen: HashMap<String, ()> = HashMap::new();

    for order in orders {
        for item in &order.items {
            let recipe = match recipes.get(&item.title) {
                Some(recipe) => recipe,
                None => {
                    if unmatched_seen.insert(item.title.clone(), ()).is_none() {
                        warn!("No recipe for dish '{}'", item.title);
                        list.unmatched_dishes.push(item.title.clone());
                    }
                    continue;
                }
            };

            for group in &recipe.ingredient_groups {
                for ingredient in &group.items {
                    let name = normalize(&ingredient.name);
                    let key = format!("{}|{}", name, ingredient.unit);
                    let scaled = ingredient.qty * item.qty;

                    debug!(
                        "Order {} item '{}' contributes {} {} of '{}'",
                        order.id, item.title, scaled, ingredient.unit, name
                    );

                    match row_index.get(&key) {
                        Some(&idx) => {
                            list.requirements[idx].qty += scaled;
                            list.requirements[idx].contributing_orders += 1;
                        }
                        None => {
                            row_index.insert(key.clone(), list.requirements.len());
                            units_by_name
                                .entry(name.clone())
                                .or_default()
                                .push(ingredient.unit.clone());
                            list.requirements.push(IngredientRequirement {
                                ingredient_key: key,
                                name,
                                unit: ingredient.unit.clone(),
                                qty: scaled,
                                contributing_orders: 1,
                                ambiguous_unit: false,
                            });
                        }
                    }
                }
            }
        }
    }

    // Flag ingredient names seen under more than one unit
    for (name, units) in &units_by_name {
        if units.len() > 1 {
            list.ambiguous_units.push(name.clone());
            for row in list.requirements.iter_mut().filter(|r| &r.name == name) {
                row.ambiguous_unit = true;
            }
        }
    }
    list.ambiguous_units.sort();

    info!(
        "Aggregated {} orders into {} requirement rows ({} unmatched dishes, {} ambiguous units)",
        orders.len(),
        list.requirements.len(),
        list.unmatched_dishes.len(),
        list.ambiguous_units.len()
    );
    list
}
