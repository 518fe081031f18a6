//! Ingestion pipeline for wearable heart-rate exports.
//!
//! Uploaded CSV/JSON files are parsed into untyped rows, normalized into
//! [`HealthRecord`](pulse_core::models::HealthRecord)s, appended to a
//! [`RecordStore`](store::RecordStore) as one batch, and aggregated on demand
//! into summary readings, per-device status rows and an analysis report.

pub mod aggregator;
pub mod analysis;
pub mod ingest;
pub mod normalizer;
pub mod parser;
pub mod store;

pub use ingest::{IngestOutcome, IngestService};
pub use pulse_core as core;
