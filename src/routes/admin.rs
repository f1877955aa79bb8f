use axum::extract::{Json, Path, State};
use serde::Deserialize;
use uuid::Uuid;

use super::documents::{to_version_response, DocumentVersionResponse};
use crate::auth::AuthenticatedUser;
use crate::error::AppResult;
use crate::state::AppState;
use crate::workflow::{admin, VersionStatus};

#[derive(Deserialize)]
pub struct ForceStatusRequest {
    pub status: String,
}

#[derive(Deserialize)]
pub struct ForceVersionRequest {
    pub version: String,
}

#[derive(Deserialize)]
pub struct ForceDocumentNumberRequest {
    pub document_number: String,
}

#[derive(Deserialize)]
pub struct ForceProductionRequest {
    pub is_production: bool,
    pub version: Option<String>,
}

pub async fn force_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(version_id): Path<Uuid>,
    Json(payload): Json<ForceStatusRequest>,
) -> AppResult<Json<DocumentVersionResponse>> {
    let target: VersionStatus = payload.status.parse()?;
    let mut conn = state.db()?;
    let updated = admin::force_status(&mut conn, &user.actor(), version_id, target)?;
    Ok(Json(to_version_response(updated)))
}

pub async fn force_version(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(version_id): Path<Uuid>,
    Json(payload): Json<ForceVersionRequest>,
) -> AppResult<Json<DocumentVersionResponse>> {
    let mut conn = state.db()?;
    let updated = admin::force_version(&mut conn, &user.actor(), version_id, &payload.version)?;
    Ok(Json(to_version_response(updated)))
}

pub async fn force_document_number(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(version_id): Path<Uuid>,
    Json(payload): Json<ForceDocumentNumberRequest>,
) -> AppResult<Json<DocumentVersionResponse>> {
    let mut conn = state.db()?;
    let updated = admin::force_document_number(
        &mut conn,
        &user.actor(),
        version_id,
        &payload.document_number,
    )?;
    Ok(Json(to_version_response(updated)))
}

pub async fn force_production(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(version_id): Path<Uuid>,
    Json(payload): Json<ForceProductionRequest>,
) -> AppResult<Json<DocumentVersionResponse>> {
    let mut conn = state.db()?;
    let updated = admin::force_production(
        &mut conn,
        &user.actor(),
        version_id,
        payload.is_production,
        payload.version.as_deref(),
    )?;
    Ok(Json(to_version_response(updated)))
}
