use crate::campaign_client::CampaignClient;
use crate::errors::AppError;
use crate::export::ProgressCallback;
use crate::models::*;
use crate::rate_limit::QuotaInfo;
use crate::reporter::ReportedError;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::json;
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Client for the remote campaign service (live or demo).
    pub client: Arc<CampaignClient>,
}

/// Health check endpoint.
///
/// Returns the service status, version and whether the client runs in
/// demo mode.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "campaign-export",
            "version": env!("CARGO_PKG_VERSION"),
            "mode": if state.client.is_demo() { "demo" } else { "live" },
        })),
    )
}

/// GET /api/v1/campaigns
///
/// Lists campaigns, served from cache unless `refresh=true`.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `params` - Query parameters (`refresh`).
///
/// # Returns
///
/// * `Result<Json<Vec<Campaign>>, AppError>` - The campaigns or a classified error.
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CampaignListQuery>,
) -> Result<Json<Vec<Campaign>>, AppError> {
    tracing::info!("GET /campaigns - refresh: {}", params.refresh);

    let campaigns = state.client.list_campaigns(params.refresh).await?;
    Ok(Json(campaigns))
}

/// DELETE /api/v1/campaigns
pub async fn invalidate_campaigns(State(state): State<Arc<AppState>>) -> StatusCode {
    state.client.invalidate_campaigns().await;
    StatusCode::NO_CONTENT
}

/// POST /api/v1/campaigns/:id/duplicates
///
/// Returns which of the given emails already exist in the campaign.
pub async fn check_duplicates(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<String>,
    Json(payload): Json<DuplicateCheckRequest>,
) -> Result<Json<DuplicateCheckResponse>, AppError> {
    tracing::info!(
        "POST /campaigns/{}/duplicates - {} emails",
        campaign_id,
        payload.emails.len()
    );

    let existing = state
        .client
        .check_duplicates(&payload.emails, &campaign_id)
        .await?;

    Ok(Json(DuplicateCheckResponse {
        campaign_id,
        checked: payload.emails.len(),
        existing,
    }))
}

/// POST /api/v1/campaigns/:id/exports
///
/// Runs a batch export and returns the final [`ExportResult`]. Per-item
/// failures are part of a 200 response; a run that could not start answers
/// with the status of its pipeline error.
pub async fn export_items(
    State(state): State<Arc<AppState>>,
    Path(campaign_id): Path<String>,
    Json(payload): Json<ExportRequest>,
) -> (StatusCode, Json<ExportResult>) {
    tracing::info!(
        "POST /campaigns/{}/exports - {} items",
        campaign_id,
        payload.items.len()
    );

    let progress: ProgressCallback = Arc::new(|snapshot: &ExportResult| {
        tracing::debug!(
            "Export {} progress: {}/{} ({} ok, {} failed, {} skipped)",
            snapshot.run_id,
            snapshot.resolved(),
            snapshot.total,
            snapshot.succeeded,
            snapshot.failed,
            snapshot.skipped
        );
    });

    let result = state
        .client
        .submit_batch(payload.items, &campaign_id, Some(progress))
        .await;

    let status = match (&result.status, &result.pipeline_error) {
        (ExportStatus::Failed, Some(err)) => err.status_code(),
        _ => StatusCode::OK,
    };

    tracing::info!(
        "Export {} finished: {:?}, {} succeeded, {} failed, {} skipped",
        result.run_id,
        result.status,
        result.succeeded,
        result.failed,
        result.skipped
    );

    (status, Json(result))
}

/// GET /api/v1/quota
pub async fn quota(State(state): State<Arc<AppState>>) -> Json<QuotaInfo> {
    Json(state.client.quota())
}

/// GET /api/v1/errors
///
/// Recent reported errors, oldest first, with their presentation hint.
pub async fn recent_errors(State(state): State<Arc<AppState>>) -> Json<Vec<ReportedError>> {
    Json(state.client.reporter().recent())
}

/// DELETE /api/v1/errors
pub async fn clear_errors(State(state): State<Arc<AppState>>) -> StatusCode {
    state.client.reporter().clear();
    StatusCode::NO_CONTENT
}
