//! # Catalog Module
//!
//! Read-only views over the externally owned menu and recipe catalogs.
//! The menu catalog is the set of canonical product names; the recipe
//! catalog maps canonical dish titles to nested ingredient groups. Both are
//! mutated by managers elsewhere; this crate only reads them.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

use crate::normalize::normalize;

/// Set of canonical product names with a normalized-key index for
/// exact-after-normalization lookup.
#[derive(Debug, Clone, Default)]
pub struct MenuCatalog {
    // normalization key -> canonical spelling
    by_key: BTreeMap<String, String>,
}

impl MenuCatalog {
    /// Build a catalog from canonical names. Later duplicates under the same
    /// normalization key are ignored; the first spelling wins.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut by_key = BTreeMap::new();
        for name in names {
            let name = name.into();
            by_key.entry(normalize(&name)).or_insert(name);
        }
        Self { by_key }
    }

    /// Look up the canonical spelling for a normalization key
    pub fn canonical_for_key(&self, key: &str) -> Option<&str> {
        self.by_key.get(key).map(String::as_str)
    }

    /// Whether a canonical name (any spelling) is a catalog member
    pub fn contains(&self, name: &str) -> bool {
        self.by_key.contains_key(&normalize(name))
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// One ingredient entry inside a recipe group.
///
/// The persisted recipe document may carry `qty` as a JSON string or number;
/// both deserialize to `f64`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeIngredient {
    /// Ingredient name as written in the recipe
    pub name: String,
    /// Quantity per one unit of the dish
    #[serde(deserialize_with = "qty_from_string_or_number")]
    pub qty: f64,
    /// Measurement unit (e.g., "g", "ml", "unit")
    pub unit: String,
}

/// Named group of ingredients within a recipe (e.g., "dough", "filling")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientGroup {
    pub group_name: String,
    pub items: Vec<RecipeIngredient>,
}

/// A recipe for one canonical dish title
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    /// Canonical dish title; the recipe catalog is keyed by this
    pub title: String,
    pub ingredient_groups: Vec<IngredientGroup>,
}

/// Recipe catalog keyed by canonical dish title
pub type RecipeCatalog = BTreeMap<String, Recipe>;

fn qty_from_string_or_number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber {
        Number(f64),
        Text(String),
    }

    match StringOrNumber::deserialize(deserializer)? {
        StringOrNumber::Number(n) => Ok(n),
        StringOrNumber::Text(s) => s.trim().parse::<f64>().map_err(|_| {
            serde::de::Error::custom(format!("quantity '{s}' is not a number"))
        }),
    }
}
