//! # Persistence Module
//!
//! Sqlite-backed storage for the surfaces this pipeline shares with the rest
//! of the system: the alias-mapping document (aliases plus ignore list), the
//! recipe catalog keyed by canonical dish title, and materialized orders.
//!
//! Alias decisions are written only through [`apply_resolution_round`], one
//! transaction per round, so a failed round leaves the mapping untouched.
//! Orders receive their durable id from the database on insert.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::info;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::alias::{AliasMapping, AliasStore, ResolutionDecision, ResolutionRound};
use crate::catalog::{Recipe, RecipeCatalog};
use crate::order::{Order, OrderItem};

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    info!("Initializing database schema...");

    conn.execute(
        "CREATE TABLE IF NOT EXISTS aliases (
            key TEXT PRIMARY KEY,
            canonical TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create aliases table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS ignored_keys (
            key TEXT PRIMARY KEY
        )",
        [],
    )
    .context("Failed to create ignored_keys table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS recipes (
            title TEXT PRIMARY KEY,
            doc TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create recipes table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            client_name TEXT NOT NULL,
            event_date TEXT,
            doc TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create orders table")?;

    info!("Database schema initialized successfully");
    Ok(())
}

/// Load the full alias-mapping document
pub fn load_alias_mapping(conn: &Connection) -> Result<AliasMapping> {
    let mut mapping = AliasMapping::new();

    let mut stmt = conn
        .prepare("SELECT key, canonical FROM aliases")
        .context("Failed to prepare alias select")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .context("Failed to query aliases")?;
    for row in rows {
        let (key, canonical) = row.context("Failed to read alias row")?;
        mapping.aliases.insert(key, canonical);
    }

    let mut stmt = conn
        .prepare("SELECT key FROM ignored_keys")
        .context("Failed to prepare ignore select")?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .context("Failed to query ignored keys")?;
    for row in rows {
        mapping.ignored.insert(row.context("Failed to read ignore row")?);
    }

    Ok(mapping)
}

/// Persist one validated resolution round, all-or-nothing.
///
/// Concurrent rounds for the same key are last-writer-wins; nothing here
/// attempts locking beyond the single transaction.
pub fn apply_resolution_round(conn: &mut Connection, round: &ResolutionRound) -> Result<()> {
    let tx = conn
        .transaction()
        .context("Failed to open resolution transaction")?;

    for (key, decision) in round.iter() {
        match decision {
            ResolutionDecision::MapTo(canonical) => {
                tx.execute("DELETE FROM ignored_keys WHERE key = ?1", params![key])
                    .context("Failed to clear ignore entry")?;
                tx.execute(
                    "INSERT INTO aliases (key, canonical) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET canonical = excluded.canonical",
                    params![key, canonical],
                )
                .context("Failed to upsert alias")?;
            }
            ResolutionDecision::Ignore => {
                tx.execute("DELETE FROM aliases WHERE key = ?1", params![key])
                    .context("Failed to clear alias entry")?;
                tx.execute(
                    "INSERT OR IGNORE INTO ignored_keys (key) VALUES (?1)",
                    params![key],
                )
                .context("Failed to insert ignore entry")?;
            }
        }
    }

    tx.commit().context("Failed to commit resolution round")?;
    info!("Applied resolution round with {} decisions", round.len());
    Ok(())
}

/// Insert or replace a recipe document keyed by its canonical title
pub fn upsert_recipe(conn: &Connection, recipe: &Recipe) -> Result<()> {
    let doc = serde_json::to_string(recipe).context("Failed to serialize recipe")?;
    conn.execute(
        "INSERT INTO recipes (title, doc) VALUES (?1, ?2)
         ON CONFLICT(title) DO UPDATE SET doc = excluded.doc",
        params![recipe.title, doc],
    )
    .context("Failed to upsert recipe")?;
    Ok(())
}

/// Load the whole recipe catalog keyed by canonical dish title
pub fn load_recipe_catalog(conn: &Connection) -> Result<RecipeCatalog> {
    let mut stmt = conn
        .prepare("SELECT title, doc FROM recipes")
        .context("Failed to prepare recipe select")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .context("Failed to query recipes")?;

    let mut catalog = RecipeCatalog::new();
    for row in rows {
        let (title, doc) = row.context("Failed to read recipe row")?;
        let recipe: Recipe = serde_json::from_str(&doc)
            .with_context(|| format!("Failed to deserialize recipe '{title}'"))?;
        catalog.insert(title, recipe);
    }
    Ok(catalog)
}

// Items and notes travel as one JSON document; client and date are columns
// so downstream calendar queries can filter without parsing documents.
#[derive(Serialize, Deserialize)]
struct OrderDoc {
    items: Vec<OrderItem>,
    notes: Option<String>,
}

/// Insert a materialized order, returning its durable id
pub fn insert_order(conn: &Connection, order: &Order) -> Result<i64> {
    let doc = serde_json::to_string(&OrderDoc {
        items: order.items.clone(),
        notes: order.notes.clone(),
    })
    .context("Failed to serialize order items")?;

    conn.execute(
        "INSERT INTO orders (client_name, event_date, doc) VALUES (?1, ?2, ?3)",
        params![
            order.client_name,
            order.event_date.map(|d| d.to_string()),
            doc
        ],
    )
    .context("Failed to insert order")?;

    let order_id = conn.last_insert_rowid();
    info!("Order stored with ID: {}", order_id);
    Ok(order_id)
}

/// List all stored orders
pub fn list_orders(conn: &Connection) -> Result<Vec<Order>> {
    let mut stmt = conn
        .prepare("SELECT id, client_name, event_date, doc FROM orders ORDER BY id")
        .context("Failed to prepare order select")?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .context("Failed to query orders")?;

    let mut orders = Vec::new();
    for row in rows {
        let (id, client_name, event_date, doc) = row.context("Failed to read order row")?;
        let event_date = match event_date {
            Some(text) => Some(
                NaiveDate::parse_from_str(&text, "%Y-%m-%d")
                    .with_context(|| format!("Invalid event date '{text}' for order {id}"))?,
            ),
            None => None,
        };
        let order_doc: OrderDoc = serde_json::from_str(&doc)
            .with_context(|| format!("Failed to deserialize order {id}"))?;
        orders.push(Order {
            id,
            client_name,
            event_date,
            items: order_doc.items,
            notes: order_doc.notes,
        });
    }
    Ok(orders)
}

/// Sqlite-backed alias store shared across operator sessions
pub struct SqliteAliasStore {
    conn: Mutex<Connection>,
}

impl SqliteAliasStore {
    /// Wrap an open connection whose schema is already initialized
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

impl AliasStore for SqliteAliasStore {
    fn load(&self) -> Result<AliasMapping> {
        let conn = self.conn.lock().expect("alias store lock poisoned");
        load_alias_mapping(&conn)
    }

    fn apply_round(&self, round: &ResolutionRound) -> Result<()> {
        let mut conn = self.conn.lock().expect("alias store lock poisoned");
        apply_resolution_round(&mut conn, round)
    }
}
