//! Route handlers.
//!
//! Store access is synchronous file I/O, so every handler hands its work to
//! the blocking pool rather than running it on the async executor.

use axum::extract::{Multipart, State};
use axum::Json;
use chrono::Utc;
use pulse_core::models::{AggregateView, HealthRecord, UploadBatch};
use pulse_data::analysis::AnalysisReport;
use pulse_data::{IngestOutcome, IngestService};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::AppState;

/// Multipart field carrying the uploaded file.
pub const UPLOAD_FIELD: &str = "file";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataResponse {
    pub total_records: usize,
    pub batch_count: usize,
    pub records: Vec<HealthRecord>,
}

/// Run `f` against the ingestion service on the blocking pool.
async fn run_blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&IngestService) -> pulse_core::Result<T> + Send + 'static,
{
    let service = state.service.clone();
    tokio::task::spawn_blocking(move || f(service.as_ref()))
        .await
        .map_err(|e| ApiError::Internal(format!("worker task failed: {}", e)))?
        .map_err(ApiError::from)
}

#[tracing::instrument(skip_all)]
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestOutcome>, ApiError> {
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        if upload.is_some() {
            return Err(ApiError::BadUpload(format!(
                "Multiple `{}` fields in one upload; send one file per request",
                UPLOAD_FIELD
            )));
        }
        let file_name = match field.file_name() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => {
                return Err(ApiError::BadUpload(format!(
                    "The `{}` field has no file name; cannot determine the file type",
                    UPLOAD_FIELD
                )))
            }
        };
        let data = field.bytes().await?;
        upload = Some((file_name, data.to_vec()));
    }

    let (file_name, content) = upload.ok_or_else(|| {
        ApiError::BadUpload(format!("No `{}` field found in multipart data", UPLOAD_FIELD))
    })?;
    tracing::debug!(file = %file_name, bytes = content.len(), "received upload");

    let outcome = run_blocking(&state, move |svc| svc.ingest(&content, &file_name)).await?;
    Ok(Json(outcome))
}

pub async fn data(State(state): State<AppState>) -> Result<Json<DataResponse>, ApiError> {
    let snapshot = run_blocking(&state, IngestService::snapshot).await?;

    Ok(Json(DataResponse {
        total_records: snapshot.records.len(),
        batch_count: snapshot.batches.len(),
        records: snapshot.records,
    }))
}

pub async fn summary(State(state): State<AppState>) -> Result<Json<AggregateView>, ApiError> {
    run_blocking(&state, IngestService::summary).await.map(Json)
}

pub async fn batches(State(state): State<AppState>) -> Result<Json<Vec<UploadBatch>>, ApiError> {
    run_blocking(&state, IngestService::list_batches).await.map(Json)
}

pub async fn analysis(State(state): State<AppState>) -> Result<Json<AnalysisReport>, ApiError> {
    run_blocking(&state, IngestService::analysis).await.map(Json)
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now(),
    }))
}
