//! HTTP route handlers for the index service API.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::IndexServiceError;
use crate::index::VectorIndex;
use crate::metrics::MetricsSnapshot;
use crate::server::AppState;
use crate::service::{IndexService, RemoveOutcome, SearchResults, SearchTarget};

/// Result count used when a search request leaves `count` out.
pub const DEFAULT_COUNT: usize = 10;

// --- Request/Response types ---

#[derive(Debug, Serialize, Deserialize)]
pub struct AddRequest {
    pub id: i64,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveRequest {
    pub id: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    pub id: Option<i64>,
    pub key: Option<String>,
    pub count: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SearchByEmbeddingRequest {
    pub embedding: Vec<f32>,
    pub count: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportRequest {
    pub embs_path: String,
    pub ids_path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RestoreRequest {
    pub save_path: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SimpleResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TotalResponse {
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DimensionResponse {
    pub dim: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Status code a service error is reported with.
pub fn status_of(err: &IndexServiceError) -> StatusCode {
    match err {
        e if e.is_precondition() => StatusCode::BAD_REQUEST,
        IndexServiceError::StorageFetch { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// --- Router ---

pub fn create_router<I: VectorIndex + 'static>(state: Arc<AppState<I>>) -> Router {
    Router::new()
        .route("/total", get(total::<I>))
        .route("/dimension", get(dimension::<I>))
        .route("/add", post(add::<I>))
        .route("/remove", post(remove::<I>))
        .route("/search", post(search::<I>))
        .route("/search_by_embedding", post(search_by_embedding::<I>))
        .route("/import", post(import::<I>))
        .route("/restore", post(restore::<I>))
        .route("/health", get(health::<I>))
        .route("/metrics", get(get_metrics::<I>))
        .with_state(state)
}

/// Run one service call on the blocking pool once a worker permit is free.
///
/// The permit moves into the blocking task, so a call whose client has gone
/// away still runs to completion and keeps its slot until then.
async fn run_blocking<I, T, F>(state: &Arc<AppState<I>>, call: F) -> Result<T, ApiError>
where
    I: VectorIndex + 'static,
    T: Send + 'static,
    F: FnOnce(&IndexService<I>) -> crate::error::Result<T> + Send + 'static,
{
    let permit = state
        .workers
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| api_error(StatusCode::SERVICE_UNAVAILABLE, "worker pool closed"))?;
    let service = state.service.clone();

    let result = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        call(&service)
    })
    .await
    .map_err(|e| {
        error!("service call panicked: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "service call failed")
    })?;

    result.map_err(|e| {
        if let Ok(mut metrics) = state.metrics.write() {
            metrics.record_failure();
        }
        let status = status_of(&e);
        if status.is_server_error() {
            error!("{}", e);
        }
        api_error(status, e.to_string())
    })
}

// --- Handlers ---

async fn total<I: VectorIndex + 'static>(
    State(state): State<Arc<AppState<I>>>,
) -> Result<Json<TotalResponse>, ApiError> {
    let count = run_blocking(&state, |service| service.total()).await?;
    Ok(Json(TotalResponse { count }))
}

async fn dimension<I: VectorIndex + 'static>(
    State(state): State<Arc<AppState<I>>>,
) -> Json<DimensionResponse> {
    Json(DimensionResponse {
        dim: state.service.dimension(),
    })
}

async fn add<I: VectorIndex + 'static>(
    State(state): State<Arc<AppState<I>>>,
    Json(req): Json<AddRequest>,
) -> Result<Json<SimpleResponse>, ApiError> {
    let id = run_blocking(&state, move |service| service.add(req.id, req.embedding)).await?;

    if let Ok(mut metrics) = state.metrics.write() {
        metrics.record_add();
    }

    Ok(Json(SimpleResponse {
        message: format!("Added, {}!", id),
    }))
}

async fn remove<I: VectorIndex + 'static>(
    State(state): State<Arc<AppState<I>>>,
    Json(req): Json<RemoveRequest>,
) -> Result<Json<SimpleResponse>, ApiError> {
    let id = req.id;
    let outcome = run_blocking(&state, move |service| service.remove(id)).await?;

    if let Ok(mut metrics) = state.metrics.write() {
        metrics.record_remove();
    }

    let message = match outcome {
        RemoveOutcome::Removed => format!("Removed, {}!", id),
        RemoveOutcome::NotPresent => format!("Not existed, {}!", id),
    };
    Ok(Json(SimpleResponse { message }))
}

async fn search<I: VectorIndex + 'static>(
    State(state): State<Arc<AppState<I>>>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResults>, ApiError> {
    let target = SearchTarget::from_request(req.id, req.key);
    let count = req.count.unwrap_or(DEFAULT_COUNT);

    let start = Instant::now();
    let results = run_blocking(&state, move |service| service.search(&target, count)).await?;

    if let Ok(mut metrics) = state.metrics.write() {
        metrics.record_search(start.elapsed());
    }

    Ok(Json(results))
}

async fn search_by_embedding<I: VectorIndex + 'static>(
    State(state): State<Arc<AppState<I>>>,
    Json(req): Json<SearchByEmbeddingRequest>,
) -> Result<Json<SearchResults>, ApiError> {
    let count = req.count.unwrap_or(DEFAULT_COUNT);

    let start = Instant::now();
    let results = run_blocking(&state, move |service| {
        service.search_by_embedding(req.embedding, count)
    })
    .await?;

    if let Ok(mut metrics) = state.metrics.write() {
        metrics.record_search(start.elapsed());
    }

    Ok(Json(results))
}

async fn import<I: VectorIndex + 'static>(
    State(state): State<Arc<AppState<I>>>,
    Json(req): Json<ImportRequest>,
) -> Result<Json<SimpleResponse>, ApiError> {
    let message = format!("Imported, {}, {}!", req.embs_path, req.ids_path);
    run_blocking(&state, move |service| {
        service.import(&req.embs_path, &req.ids_path)
    })
    .await?;

    if let Ok(mut metrics) = state.metrics.write() {
        metrics.record_import();
    }

    Ok(Json(SimpleResponse { message }))
}

async fn restore<I: VectorIndex + 'static>(
    State(state): State<Arc<AppState<I>>>,
    Json(req): Json<RestoreRequest>,
) -> Result<Json<SimpleResponse>, ApiError> {
    let message = format!("Restored, {}!", req.save_path);
    run_blocking(&state, move |service| service.restore(&req.save_path)).await?;

    if let Ok(mut metrics) = state.metrics.write() {
        metrics.record_restore();
    }

    Ok(Json(SimpleResponse { message }))
}

async fn health<I: VectorIndex + 'static>(
    State(state): State<Arc<AppState<I>>>,
) -> (StatusCode, Json<HealthResponse>) {
    if state.health.is_serving() {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: "SERVING".to_string(),
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "NOT_SERVING".to_string(),
            }),
        )
    }
}

async fn get_metrics<I: VectorIndex + 'static>(
    State(state): State<Arc<AppState<I>>>,
) -> Result<Json<MetricsSnapshot>, ApiError> {
    let metrics = state
        .metrics
        .read()
        .map_err(|_| api_error(StatusCode::INTERNAL_SERVER_ERROR, "Lock poisoned"))?;
    Ok(Json(metrics.snapshot()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(&IndexServiceError::KeysNotLoaded),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(&IndexServiceError::DimensionMismatch {
                expected: 4,
                actual: 3
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(&IndexServiceError::StorageFetch {
                path: "s3://b/k".into(),
                reason: "not found".into()
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(&IndexServiceError::Persistence {
                path: "/x".into(),
                reason: "denied".into()
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
