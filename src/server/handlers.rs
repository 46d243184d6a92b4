//! HTTP request handlers.

use crate::db::ReadingProgress;
use crate::error::{AppError, Result};
use crate::server::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, header},
};
use serde::{Deserialize, Serialize};

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Liveness probe.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// SYNC API
// ============================================================================

/// Progress update request.
#[derive(Debug, Deserialize)]
pub struct ProgressUpdateRequest {
    chapter_number: Option<i64>,
    position: Option<i64>,
}

/// Completion request.
#[derive(Debug, Deserialize)]
pub struct CompletedRequest {
    completed: bool,
}

/// List the user's progress, most recent first.
pub async fn sync_list_progress(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ReadingProgress>>> {
    let user_id = get_authenticated_user(&state, &headers)?;
    let records = state.progress.list_progress(&user_id).await?;
    Ok(Json(records))
}

/// Get reading progress (`null` if the work was never read).
pub async fn sync_get_progress(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(work_id): Path<String>,
) -> Result<Json<Option<ReadingProgress>>> {
    let user_id = get_authenticated_user(&state, &headers)?;
    let progress = state.progress.get_progress(&user_id, &work_id).await?;
    Ok(Json(progress))
}

/// Update reading progress.
pub async fn sync_update_progress(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(work_id): Path<String>,
    Json(req): Json<ProgressUpdateRequest>,
) -> Result<Json<ReadingProgress>> {
    let user_id = get_authenticated_user(&state, &headers)?;
    let chapter_number = req
        .chapter_number
        .ok_or_else(|| AppError::Validation("chapter_number is required".to_string()))?;

    let progress = state
        .progress
        .record_progress(&user_id, &work_id, chapter_number, req.position.unwrap_or(0))
        .await?;
    Ok(Json(progress))
}

/// Set or clear the completion flag.
pub async fn sync_set_completed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(work_id): Path<String>,
    Json(req): Json<CompletedRequest>,
) -> Result<Json<ReadingProgress>> {
    let user_id = get_authenticated_user(&state, &headers)?;
    let progress = state
        .progress
        .mark_completed(&user_id, &work_id, req.completed)
        .await?;
    Ok(Json(progress))
}

// ============================================================================
// HELPERS
// ============================================================================

/// Extract token from Authorization header.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

/// Get authenticated user ID from token.
fn get_authenticated_user(state: &AppState, headers: &HeaderMap) -> Result<String> {
    let token = extract_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

    state
        .auth
        .validate_token(&token)?
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".to_string()))
}
