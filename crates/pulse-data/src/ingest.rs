//! Upload ingestion: parse → normalize → persist.

use std::sync::Arc;

use pulse_core::models::{AggregateView, FileKind, HealthRecord, RowWarning, UploadBatch};
use pulse_core::settings::DEFAULT_PREVIEW_LIMIT;
use pulse_core::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregator::summarize;
use crate::analysis::{analyze, AnalysisReport};
use crate::normalizer::normalize;
use crate::parser::parse;
use crate::store::{NewBatch, RecordStore, StoreSnapshot};

/// Result of a successful ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub record_count: usize,
    pub preview_records: Vec<HealthRecord>,
    pub batch_id: String,
    pub warnings: Vec<RowWarning>,
}

/// Coordinates the pipeline over a shared [`RecordStore`].
///
/// Cheap to share behind an `Arc`; all state lives in the store.
pub struct IngestService {
    store: Arc<dyn RecordStore>,
    preview_limit: usize,
}

impl IngestService {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            preview_limit: DEFAULT_PREVIEW_LIMIT,
        }
    }

    pub fn with_preview_limit(mut self, limit: usize) -> Self {
        self.preview_limit = limit;
        self
    }

    /// Ingest one uploaded file.
    ///
    /// The file type is decided from `file_name` before any content is read.
    /// Nothing is stored when the type is unsupported or the content cannot
    /// be parsed; an upload with zero records still creates an empty batch.
    pub fn ingest(&self, content: &[u8], file_name: &str) -> Result<IngestOutcome> {
        let kind = FileKind::from_file_name(file_name)?;
        let rows = parse(content, kind)?;
        let normalized = normalize(rows);

        for w in &normalized.warnings {
            warn!(file = file_name, row = w.row, kind = ?w.kind, "{}", w.message);
        }

        let batch = NewBatch::new(file_name, content.len() as u64);
        let batch_id = self.store.append(&batch, &normalized.records)?;

        let record_count = normalized.records.len();
        info!(
            file = file_name,
            %kind,
            records = record_count,
            warnings = normalized.warnings.len(),
            batch = %batch_id,
            "ingested upload"
        );

        let mut preview_records = normalized.records;
        preview_records.truncate(self.preview_limit);

        Ok(IngestOutcome {
            record_count,
            preview_records,
            batch_id,
            warnings: normalized.warnings,
        })
    }

    pub fn all_records(&self) -> Result<Vec<HealthRecord>> {
        self.store.all_records()
    }

    pub fn list_batches(&self) -> Result<Vec<UploadBatch>> {
        self.store.list_batches()
    }

    /// Records and batch metadata from the same read of the store.
    pub fn snapshot(&self) -> Result<StoreSnapshot> {
        self.store.snapshot()
    }

    /// Summary readings and per-device rows over everything stored.
    pub fn summary(&self) -> Result<AggregateView> {
        Ok(summarize(&self.store.all_records()?))
    }

    pub fn analysis(&self) -> Result<AnalysisReport> {
        Ok(analyze(&self.store.all_records()?))
    }
}
