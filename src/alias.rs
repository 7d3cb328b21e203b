//! # Alias Resolution Module
//!
//! This module maintains the persisted mapping from raw/normalized product
//! strings to canonical catalog entries, plus an ignore set, and classifies
//! the product keys of an ingestion batch as Known, Unresolved, or Ignored.
//!
//! Decisions are monotonic and idempotent: once a key is resolved or ignored,
//! every later batch containing the same normalized string reuses the
//! decision without re-prompting. All mutation flows through one
//! all-or-nothing resolution round; a round proposing two different targets
//! for the same key is rejected without mutating anything.
//!
//! The store behind the mapping is an injected repository ([`AliasStore`]),
//! shared across operator sessions with last-writer-wins semantics on
//! concurrent commits. No locking or optimistic concurrency is attempted
//! here; that limitation is documented and demonstrated in tests.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use crate::catalog::MenuCatalog;
use crate::errors::PipelineError;
use crate::normalize::normalize;

/// Persisted alias document: raw/normalized string → canonical name, plus an
/// ignore list. An empty-string canonical target is read as the ignore
/// sentinel for compatibility with hand-edited documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AliasMapping {
    /// Normalization key → canonical catalog name
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    /// Normalization keys explicitly marked as never matching the catalog
    #[serde(default)]
    pub ignored: BTreeSet<String>,
}

impl AliasMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a key has an ignore decision recorded
    pub fn is_ignored(&self, key: &str) -> bool {
        self.ignored.contains(key)
            || self.aliases.get(key).map(|c| c.is_empty()).unwrap_or(false)
    }

    /// Canonical target recorded for a key, if any
    pub fn canonical_for(&self, key: &str) -> Option<&str> {
        match self.aliases.get(key) {
            Some(c) if !c.is_empty() => Some(c.as_str()),
            _ => None,
        }
    }

    /// Merge one validated resolution round into the mapping
    pub fn merge_round(&mut self, round: &ResolutionRound) {
        for (key, decision) in &round.decisions {
            match decision {
                ResolutionDecision::MapTo(canonical) => {
                    self.ignored.remove(key);
                    self.aliases.insert(key.clone(), canonical.clone());
                }
                ResolutionDecision::Ignore => {
                    self.aliases.remove(key);
                    self.ignored.insert(key.clone());
                }
            }
        }
    }
}

/// One operator decision for an unresolved key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResolutionDecision {
    /// Map the key to a canonical catalog name
    MapTo(String),
    /// Mark the key as never corresponding to a catalog entry
    Ignore,
}

/// A validated, conflict-free set of decisions for one resolution round.
///
/// Construction validates the whole round up front so that applying it is
/// all-or-nothing: a conflict or an unknown canonical target rejects the
/// round before any mutation happens.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionRound {
    decisions: BTreeMap<String, ResolutionDecision>,
}

impl ResolutionRound {
    /// Validate a set of (raw key, decision) pairs against the catalog.
    ///
    /// Keys are normalized first. Duplicate pairs proposing the same decision
    /// collapse; two different decisions for one key are a
    /// [`PipelineError::MappingConflict`]. A `MapTo` target that is not a
    /// catalog member is a [`PipelineError::Validation`], since materialized
    /// order items must always carry catalog titles.
    pub fn new(
        decisions: &[(String, ResolutionDecision)],
        catalog: &MenuCatalog,
    ) -> Result<Self, PipelineError> {
        let mut validated: BTreeMap<String, ResolutionDecision> = BTreeMap::new();

        for (raw_key, decision) in decisions {
            let key = normalize(raw_key);
            if key.is_empty() {
                return Err(PipelineError::Validation(format!(
                    "decision key '{raw_key}' normalizes to an empty key"
                )));
            }

            let decision = match decision {
                ResolutionDecision::MapTo(target) => {
                    match catalog.canonical_for_key(&normalize(target)) {
                        Some(canonical) => ResolutionDecision::MapTo(canonical.to_string()),
                        None => {
                            return Err(PipelineError::Validation(format!(
                                "canonical target '{target}' for key '{key}' is not a catalog member"
                            )))
                        }
                    }
                }
                ResolutionDecision::Ignore => ResolutionDecision::Ignore,
            };

            if let Some(previous) = validated.get(&key) {
                if *previous != decision {
                    return Err(PipelineError::MappingConflict(format!(
                        "conflicting decisions for key '{key}': {previous:?} vs {decision:?}"
                    )));
                }
            } else {
                validated.insert(key, decision);
            }
        }

        Ok(Self { decisions: validated })
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    /// Iterate the validated (key, decision) pairs in key order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResolutionDecision)> {
        self.decisions.iter()
    }
}

/// Classification of a batch's product keys against catalog and mapping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    /// Normalization key → canonical catalog name
    pub resolved: BTreeMap<String, String>,
    /// Keys explicitly marked as non-catalog text; dropped at materialization
    pub ignored: Vec<String>,
    /// Keys with no decision yet; materialization refuses while any remain
    pub unresolved: Vec<String>,
}

impl Classification {
    pub fn has_unresolved(&self) -> bool {
        !self.unresolved.is_empty()
    }
}

/// Classify product keys as Known / Ignored / Unresolved.
///
/// A key is Known when it is a catalog member (exact match after
/// normalization) or has a recorded alias; Ignored when the ignore set or the
/// empty sentinel covers it; Unresolved otherwise. Unresolved keys must be
/// decided (or the batch abandoned) before any order is materialized.
pub fn classify(
    product_keys: &[String],
    catalog: &MenuCatalog,
    mapping: &AliasMapping,
) -> Classification {
    let mut classification = Classification::default();

    for key in product_keys {
        if mapping.is_ignored(key) {
            debug!("Key '{}' is ignored", key);
            classification.ignored.push(key.clone());
        } else if let Some(canonical) = mapping.canonical_for(key) {
            debug!("Key '{}' resolved via alias to '{}'", key, canonical);
            classification.resolved.insert(key.clone(), canonical.to_string());
        } else if let Some(canonical) = catalog.canonical_for_key(key) {
            debug!("Key '{}' resolved via catalog to '{}'", key, canonical);
            classification.resolved.insert(key.clone(), canonical.to_string());
        } else {
            debug!("Key '{}' is unresolved", key);
            classification.unresolved.push(key.clone());
        }
    }

    info!(
        "Classified {} keys: {} resolved, {} ignored, {} unresolved",
        product_keys.len(),
        classification.resolved.len(),
        classification.ignored.len(),
        classification.unresolved.len()
    );
    classification
}

/// Repository for the shared alias mapping.
///
/// Implementations persist decisions transactionally per resolution round.
/// Concurrent rounds touching the same key are last-writer-wins.
pub trait AliasStore: Send + Sync {
    /// Load the current alias document
    fn load(&self) -> anyhow::Result<AliasMapping>;

    /// Persist one validated resolution round, all-or-nothing
    fn apply_round(&self, round: &ResolutionRound) -> anyhow::Result<()>;
}

/// In-memory alias store for tests and single-process use
#[derive(Debug, Default)]
pub struct InMemoryAliasStore {
    inner: Mutex<AliasMapping>,
}

impl InMemoryAliasStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mapping(mapping: AliasMapping) -> Self {
        Self {
            inner: Mutex::new(mapping),
        }
    }
}

impl AliasStore for InMemoryAliasStore {
    fn load(&self) -> anyhow::Result<AliasMapping> {
        let guard = self.inner.lock().expect("alias store lock poisoned");
        Ok(guard.clone())
    }

    fn apply_round(&self, round: &ResolutionRound) -> anyhow::Result<()> {
        let mut guard = self.inner.lock().expect("alias store lock poisoned");
        guard.merge_round(round);
        Ok(())
    }
}
