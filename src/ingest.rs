//! # Batch Ingestion Module
//!
//! Transport-independent ingestion endpoint for order document batches. A
//! request carries the documents, an optional alias-mapping override (raw
//! JSON), per-client date overrides, and a mode flag.
//!
//! Processing is all-or-nothing per batch: size ceilings are enforced before
//! any document is touched, per-document extraction runs concurrently, and a
//! single corrupt document aborts the whole request without producing a
//! partial matrix.
//!
//! The two-phase protocol is modeled as two separate calls connected by
//! caller-held [`BatchPreview`] state: [`IngestService::preview`] classifies
//! the batch and surfaces unresolved names; once the operator's decisions are
//! recorded through [`IngestService::record_decisions`], a commit call
//! materializes the orders. Abandoning a batch is simply never calling
//! commit; undecided keys leave no alias mutation behind.

use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::alias::{classify, AliasMapping, AliasStore, Classification, ResolutionDecision, ResolutionRound};
use crate::catalog::MenuCatalog;
use crate::errors::PipelineError;
use crate::extract::{parse_line_items, Document, DocumentExtractor};
use crate::materialize::{materialize_matrix, DateOverrides};
use crate::matrix::{build_matrix, ProductMatrix, RawLineItem};
use crate::order::{MissingEventDate, Order, OrderItem};

/// Default per-document size ceiling
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 1024 * 1024; // 1MB per document
/// Default cumulative batch size ceiling
pub const DEFAULT_MAX_BATCH_BYTES: usize = 8 * 1024 * 1024; // 8MB per batch

/// Size limits for one ingestion request
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Maximum size of a single document in bytes
    pub max_document_bytes: usize,
    /// Maximum cumulative size of all documents in one batch
    pub max_batch_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
        }
    }
}

/// Whether a request stops after classification or goes on to materialize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// Classify only; surface unresolved names for operator decisions
    Preview,
    /// Materialize; fails while any name in the batch is unresolved
    Commit,
}

/// One ingestion request, independent of transport
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub documents: Vec<Document>,
    /// Optional alias-mapping override document (raw JSON); merged over the
    /// persisted mapping for this batch only, never stored
    pub mapping_override: Option<String>,
    /// Per-client event date overrides for this batch
    pub date_overrides: DateOverrides,
    pub mode: IngestMode,
}

/// Caller-held state between the preview and commit phases of one batch
#[derive(Debug, Clone)]
pub struct BatchPreview {
    pub matrix: ProductMatrix,
    pub classification: Classification,
}

impl BatchPreview {
    /// Names still needing an operator decision before commit
    pub fn unresolved(&self) -> &[String] {
        &self.classification.unresolved
    }
}

/// Successful commit response body: one object per materialized order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResponse {
    pub client: String,
    pub date: Option<NaiveDate>,
    pub items: Vec<OrderItem>,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            client: order.client_name.clone(),
            date: order.event_date,
            items: order.items.clone(),
        }
    }
}

/// Outcome of a committed batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitResponse {
    pub orders: Vec<OrderResponse>,
    /// Orders still needing a manual event date
    pub missing_dates: Vec<MissingEventDate>,
}

/// Outcome of one ingestion request, by mode
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Preview(BatchPreview),
    Committed(CommitResponse),
}

/// Machine-readable error body for the endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable code from the error taxonomy
    pub error: String,
    /// Human-readable message with retry detail
    pub message: String,
}

impl From<&PipelineError> for ErrorBody {
    fn from(err: &PipelineError) -> Self {
        Self {
            error: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Batch ingestion service. The extractor and the alias store are injected
/// collaborators; the menu catalog is passed per call because it is owned
/// and mutated elsewhere.
pub struct IngestService {
    extractor: Arc<dyn DocumentExtractor>,
    alias_store: Arc<dyn AliasStore>,
    config: IngestConfig,
}

impl IngestService {
    pub fn new(
        extractor: Arc<dyn DocumentExtractor>,
        alias_store: Arc<dyn AliasStore>,
        config: IngestConfig,
    ) -> Self {
        Self {
            extractor,
            alias_store,
            config,
        }
    }

    /// Process one ingestion request according to its mode flag.
    pub async fn ingest(
        &self,
        request: IngestRequest,
        catalog: &MenuCatalog,
    ) -> Result<IngestOutcome, PipelineError> {
        let preview = self
            .preview(
                request.documents,
                request.mapping_override.as_deref(),
                catalog,
            )
            .await?;

        match request.mode {
            IngestMode::Preview => Ok(IngestOutcome::Preview(preview)),
            IngestMode::Commit => {
                let response = self.commit(&preview, &request.date_overrides)?;
                Ok(IngestOutcome::Committed(response))
            }
        }
    }

    /// Phase one: extract, fold, and classify a batch.
    ///
    /// Size ceilings are enforced before any document is parsed. Extraction
    /// and line parsing run concurrently per document; the matrix result is
    /// identical regardless of completion order because accumulation is
    /// commutative.
    pub async fn preview(
        &self,
        documents: Vec<Document>,
        mapping_override: Option<&str>,
        catalog: &MenuCatalog,
    ) -> Result<BatchPreview, PipelineError> {
        self.validate_sizes(&documents)?;
        let mapping = self.effective_mapping(mapping_override)?;

        let line_items = self.extract_batch(documents).await?;
        let matrix = build_matrix(&line_items)?;
        let classification = classify(&matrix.product_keys(), catalog, &mapping);

        if classification.has_unresolved() {
            warn!(
                "Batch preview has {} unresolved product keys",
                classification.unresolved.len()
            );
        }

        Ok(BatchPreview {
            matrix,
            classification,
        })
    }

    /// Record operator decisions for a batch's unresolved keys.
    ///
    /// The round is validated as a whole (conflicts and non-catalog targets
    /// reject it without mutation), persisted transactionally, and the
    /// refreshed classification for the batch is returned so the caller can
    /// proceed straight to commit.
    pub fn record_decisions(
        &self,
        preview: &BatchPreview,
        decisions: &[(String, ResolutionDecision)],
        catalog: &MenuCatalog,
    ) -> Result<BatchPreview, PipelineError> {
        let round = ResolutionRound::new(decisions, catalog)?;
        self.alias_store
            .apply_round(&round)
            .map_err(PipelineError::from)?;
        info!("Recorded {} alias decisions", round.len());

        let mapping = self.alias_store.load().map_err(PipelineError::from)?;
        let classification = classify(&preview.matrix.product_keys(), catalog, &mapping);
        Ok(BatchPreview {
            matrix: preview.matrix.clone(),
            classification,
        })
    }

    /// Phase two: materialize a previewed batch.
    ///
    /// Refuses with [`PipelineError::UnresolvedProduct`] while any key of the
    /// batch is still undecided.
    pub fn commit(
        &self,
        preview: &BatchPreview,
        date_overrides: &DateOverrides,
    ) -> Result<CommitResponse, PipelineError> {
        let batch = materialize_matrix(&preview.matrix, &preview.classification, date_overrides)?;
        Ok(CommitResponse {
            orders: batch.orders.iter().map(OrderResponse::from).collect(),
            missing_dates: batch.missing_dates,
        })
    }

    fn validate_sizes(&self, documents: &[Document]) -> Result<(), PipelineError> {
        let mut batch_total = 0usize;
        for doc in documents {
            if doc.size() > self.config.max_document_bytes {
                return Err(PipelineError::Validation(format!(
                    "document '{}' is {} bytes, exceeding the {} byte per-document ceiling",
                    doc.name,
                    doc.size(),
                    self.config.max_document_bytes
                )));
            }
            batch_total += doc.size();
        }
        if batch_total > self.config.max_batch_bytes {
            return Err(PipelineError::Validation(format!(
                "batch is {} bytes across {} documents, exceeding the {} byte batch ceiling",
                batch_total,
                documents.len(),
                self.config.max_batch_bytes
            )));
        }
        Ok(())
    }

    // Stored mapping with the per-batch override merged on top. Override
    // entries win for the duration of the batch and are never persisted.
    fn effective_mapping(
        &self,
        mapping_override: Option<&str>,
    ) -> Result<AliasMapping, PipelineError> {
        let mut mapping = self.alias_store.load().map_err(PipelineError::from)?;

        if let Some(raw) = mapping_override {
            let override_doc: AliasMapping = serde_json::from_str(raw).map_err(|e| {
                PipelineError::Validation(format!("alias-mapping override is not valid JSON: {e}"))
            })?;
            debug!(
                "Applying mapping override: {} aliases, {} ignored",
                override_doc.aliases.len(),
                override_doc.ignored.len()
            );
            mapping.aliases.extend(override_doc.aliases);
            mapping.ignored.extend(override_doc.ignored);
        }

        Ok(mapping)
    }

    // Extract and parse all documents of a batch concurrently. Any failure
    // aborts the whole batch; no partial matrix escapes.
    async fn extract_batch(
        &self,
        documents: Vec<Document>,
    ) -> Result<Vec<RawLineItem>, PipelineError> {
        debug!("Extracting batch of {} documents", documents.len());

        let mut handles = Vec::with_capacity(documents.len());
        for doc in documents {
            let extractor = Arc::clone(&self.extractor);
            handles.push(tokio::task::spawn_blocking(
                move || -> Result<Vec<RawLineItem>, PipelineError> {
                    let text = extractor.extract_text(&doc)?;
                    parse_line_items(&doc.name, &text)
                },
            ));
        }

        let mut line_items = Vec::new();
        let mut first_error: Option<PipelineError> = None;
        for handle in handles {
            let result = handle.await.map_err(|e| {
                PipelineError::Parse(format!("extraction task failed: {e}"))
            })?;
            match result {
                Ok(items) => line_items.extend(items),
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        info!("Extracted {} line items from batch", line_items.len());
        Ok(line_items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::InMemoryAliasStore;
    use crate::extract::Utf8TextExtractor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn catalog() -> MenuCatalog {
        MenuCatalog::new(["Choco Cake", "Lemon Tart"])
    }

    fn service() -> IngestService {
        IngestService::new(
            Arc::new(Utf8TextExtractor),
            Arc::new(InMemoryAliasStore::new()),
            IngestConfig::default(),
        )
    }

    fn doc(name: &str, text: &str) -> Document {
        Document::new(name, text.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_preview_classifies_batch() {
        let docs = vec![
            doc("d1", "A ; Choco Cake ; 2\nA ; Mystery Pie ; 1"),
            doc("d2", "B ; lemon tart ; 3"),
        ];
        let preview = service().preview(docs, None, &catalog()).await.unwrap();

        assert_eq!(preview.unresolved(), &["mystery pie".to_string()]);
        assert_eq!(preview.matrix.cell("choco cake", "A"), Some(2.0));
        assert_eq!(preview.matrix.cell("lemon tart", "B"), Some(3.0));
    }

    #[tokio::test]
    async fn test_oversized_document_rejected_before_extraction() {
        // Counting extractor proves no document is touched after rejection
        struct CountingExtractor(AtomicUsize);
        impl DocumentExtractor for CountingExtractor {
            fn extract_text(&self, doc: &Document) -> Result<String, PipelineError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Utf8TextExtractor.extract_text(doc)
            }
        }

        let extractor = Arc::new(CountingExtractor(AtomicUsize::new(0)));
        let service = IngestService::new(
            Arc::clone(&extractor) as Arc<dyn DocumentExtractor>,
            Arc::new(InMemoryAliasStore::new()),
            IngestConfig {
                max_document_bytes: 16,
                max_batch_bytes: 1024,
            },
        );

        let docs = vec![
            doc("small", "A ; x ; 1"),
            doc("huge", "A ; Choco Cake ; 2\nA ; Choco Cake ; 2\n"),
        ];
        let result = service.preview(docs, None, &catalog()).await;

        match result {
            Err(PipelineError::Validation(msg)) => {
                assert!(msg.contains("huge"));
                assert!(msg.contains("per-document ceiling"));
            }
            other => panic!("expected Validation, got {other:?}"),
        }
        assert_eq!(extractor.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_batch_ceiling_rejected() {
        let service = IngestService::new(
            Arc::new(Utf8TextExtractor),
            Arc::new(InMemoryAliasStore::new()),
            IngestConfig {
                max_document_bytes: 64,
                max_batch_bytes: 60,
            },
        );
        let docs = vec![
            doc("d1", "A ; Choco Cake ; 2\nA ; Lemon Tart ; 60"),
            doc("d2", "B ; Choco Cake ; 1\nB ; Lemon Tart ; 22"),
        ];
        let result = service.preview(docs, None, &catalog()).await;
        match result {
            Err(PipelineError::Validation(msg)) => assert!(msg.contains("batch ceiling")),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_corrupt_document_aborts_whole_batch() {
        let docs = vec![
            doc("good", "A ; Choco Cake ; 2"),
            Document::new("bad", vec![0xff, 0xfe, 0x00]),
        ];
        let result = service().preview(docs, None, &catalog()).await;
        match result {
            Err(PipelineError::Parse(msg)) => assert!(msg.contains("bad")),
            other => panic!("expected Parse, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_commit_refuses_unresolved() {
        let service = service();
        let docs = vec![doc("d1", "A ; Mystery Pie ; 1")];
        let preview = service.preview(docs, None, &catalog()).await.unwrap();

        let result = service.commit(&preview, &DateOverrides::new());
        assert!(matches!(result, Err(PipelineError::UnresolvedProduct(_))));
    }

    #[tokio::test]
    async fn test_two_phase_resolution_then_commit() {
        let service = service();
        let docs = vec![doc(
            "d1",
            "A ; Chocolate Cake ; 2\nA ; chocolate  cake ; 1",
        )];
        let preview = service.preview(docs, None, &catalog()).await.unwrap();
        assert_eq!(preview.unresolved(), &["chocolate cake".to_string()]);

        let preview = service
            .record_decisions(
                &preview,
                &[(
                    "chocolate cake".to_string(),
                    ResolutionDecision::MapTo("Choco Cake".to_string()),
                )],
                &catalog(),
            )
            .unwrap();
        assert!(preview.unresolved().is_empty());

        let response = service.commit(&preview, &DateOverrides::new()).unwrap();
        assert_eq!(response.orders.len(), 1);
        assert_eq!(response.orders[0].items.len(), 1);
        assert_eq!(response.orders[0].items[0].title, "Choco Cake");
        assert_eq!(response.orders[0].items[0].qty, 3.0);
    }

    #[tokio::test]
    async fn test_conflicting_decisions_leave_no_mutation() {
        let store = Arc::new(InMemoryAliasStore::new());
        let service = IngestService::new(
            Arc::new(Utf8TextExtractor),
            Arc::clone(&store) as Arc<dyn AliasStore>,
            IngestConfig::default(),
        );
        let docs = vec![doc("d1", "A ; Mystery Pie ; 1")];
        let preview = service.preview(docs, None, &catalog()).await.unwrap();

        let decisions = vec![
            (
                "mystery pie".to_string(),
                ResolutionDecision::MapTo("Choco Cake".to_string()),
            ),
            ("mystery pie".to_string(), ResolutionDecision::Ignore),
        ];
        let result = service.record_decisions(&preview, &decisions, &catalog());
        assert!(matches!(result, Err(PipelineError::MappingConflict(_))));

        let mapping = store.load().unwrap();
        assert!(mapping.aliases.is_empty());
        assert!(mapping.ignored.is_empty());
    }

    #[tokio::test]
    async fn test_mapping_override_applies_without_persisting() {
        let store = Arc::new(InMemoryAliasStore::new());
        let service = IngestService::new(
            Arc::new(Utf8TextExtractor),
            Arc::clone(&store) as Arc<dyn AliasStore>,
            IngestConfig::default(),
        );
        let override_json = r#"{"aliases": {"chocolate cake": "Choco Cake"}}"#;
        let docs = vec![doc("d1", "A ; Chocolate Cake ; 2")];

        let preview = service
            .preview(docs, Some(override_json), &catalog())
            .await
            .unwrap();
        assert!(preview.unresolved().is_empty());

        // Override never reaches the store
        assert!(store.load().unwrap().aliases.is_empty());
    }

    #[tokio::test]
    async fn test_non_json_override_rejected() {
        let docs = vec![doc("d1", "A ; Choco Cake ; 1")];
        let result = service().preview(docs, Some("not json"), &catalog()).await;
        match result {
            Err(PipelineError::Validation(msg)) => assert!(msg.contains("override")),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_commit_mode_end_to_end() {
        let request = IngestRequest {
            documents: vec![doc("d1", "A ; Choco Cake ; 2")],
            mapping_override: None,
            date_overrides: {
                let mut dates = DateOverrides::new();
                dates.insert("A".to_string(), NaiveDate::from_ymd_opt(2026, 9, 1).unwrap());
                dates
            },
            mode: IngestMode::Commit,
        };

        let outcome = service().ingest(request, &catalog()).await.unwrap();
        match outcome {
            IngestOutcome::Committed(response) => {
                assert_eq!(response.orders.len(), 1);
                assert_eq!(response.orders[0].client, "A");
                assert_eq!(
                    response.orders[0].date,
                    NaiveDate::from_ymd_opt(2026, 9, 1)
                );
                assert!(response.missing_dates.is_empty());

                // Response serializes to the documented array-of-orders shape
                let json = serde_json::to_value(&response.orders).unwrap();
                assert!(json.is_array());
                assert_eq!(json[0]["client"], "A");
                assert_eq!(json[0]["items"][0]["title"], "Choco Cake");
            }
            other => panic!("expected Committed, got {other:?}"),
        }
    }

    #[test]
    fn test_error_body_shape() {
        let err = PipelineError::Validation("too big".to_string());
        let body = ErrorBody::from(&err);
        assert_eq!(body.error, "validation_error");

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "validation_error");
        assert!(json["message"].as_str().unwrap().contains("too big"));
    }
}
