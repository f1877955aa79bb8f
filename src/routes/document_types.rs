use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::documents::to_iso;
use crate::auth::AuthenticatedUser;
use crate::error::AppResult;
use crate::models::DocumentType;
use crate::state::AppState;
use crate::workflow::document_types;

#[derive(Deserialize)]
pub struct DocumentTypeListQuery {
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Deserialize)]
pub struct CreateDocumentTypeRequest {
    pub prefix: String,
    pub name: String,
}

#[derive(Deserialize)]
pub struct UpdateDocumentTypeRequest {
    pub is_active: bool,
}

#[derive(Serialize)]
pub struct DocumentTypeResponse {
    pub id: Uuid,
    pub prefix: String,
    pub name: String,
    pub next_number: i32,
    pub is_active: bool,
    pub created_at: String,
}

impl From<DocumentType> for DocumentTypeResponse {
    fn from(doc_type: DocumentType) -> Self {
        Self {
            id: doc_type.id,
            prefix: doc_type.prefix,
            name: doc_type.name,
            next_number: doc_type.next_number,
            is_active: doc_type.is_active,
            created_at: to_iso(doc_type.created_at),
        }
    }
}

pub async fn list_document_types(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<DocumentTypeListQuery>,
) -> AppResult<Json<Vec<DocumentTypeResponse>>> {
    let mut conn = state.db()?;
    let types =
        document_types::list_document_types(&mut conn, &user.actor(), params.include_inactive)?;
    Ok(Json(types.into_iter().map(Into::into).collect()))
}

pub async fn create_document_type(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateDocumentTypeRequest>,
) -> AppResult<(StatusCode, Json<DocumentTypeResponse>)> {
    let mut conn = state.db()?;
    let created = document_types::create_document_type(
        &mut conn,
        &user.actor(),
        &payload.prefix,
        &payload.name,
    )?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

pub async fn update_document_type(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(type_id): Path<Uuid>,
    Json(payload): Json<UpdateDocumentTypeRequest>,
) -> AppResult<Json<DocumentTypeResponse>> {
    let mut conn = state.db()?;
    let updated = document_types::set_document_type_active(
        &mut conn,
        &user.actor(),
        type_id,
        payload.is_active,
    )?;
    Ok(Json(updated.into()))
}
