use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{Approver, Attachment, AuditEvent, DocumentVersion};
use crate::state::AppState;
use crate::workflow::documents::{self as engine, NewDocumentInput, VersionFilter};
use crate::workflow::VersionStatus;

#[derive(Deserialize)]
pub struct DocumentListQuery {
    pub status: Option<String>,
    pub document_type_id: Option<Uuid>,
    pub is_production: Option<bool>,
    pub project_code: Option<String>,
    pub query: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Deserialize)]
pub struct CreateDocumentRequest {
    pub document_type_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub project_code: Option<String>,
    #[serde(default)]
    pub is_production: bool,
}

#[derive(Serialize, Clone)]
pub struct DocumentVersionResponse {
    pub id: Uuid,
    pub document_type_id: Uuid,
    pub document_number: String,
    pub version: String,
    pub status: String,
    pub is_production: bool,
    pub title: String,
    pub description: Option<String>,
    pub project_code: Option<String>,
    pub created_by: Uuid,
    pub released_by: Option<Uuid>,
    pub released_at: Option<String>,
    pub promoted_from_document_number: Option<String>,
    pub promoted_from_version_id: Option<Uuid>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize)]
pub struct DocumentDetailResponse {
    pub document_number: String,
    pub is_production: bool,
    pub released_version_id: Option<Uuid>,
    pub versions: Vec<DocumentVersionResponse>,
}

#[derive(Serialize, Clone)]
pub struct ApproverResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub comments: Option<String>,
    pub action_date: Option<String>,
}

#[derive(Serialize, Clone)]
pub struct AttachmentResponse {
    pub id: Uuid,
    pub filename: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub checksum: String,
    pub uploaded_by: Uuid,
    pub created_at: String,
}

#[derive(Serialize, Clone)]
pub struct AuditEventResponse {
    pub id: Uuid,
    pub document_version_id: Option<Uuid>,
    pub document_number: String,
    pub action: String,
    pub severity: String,
    pub performed_by: Option<Uuid>,
    pub details: Value,
    pub created_at: String,
}

pub async fn list_documents(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<DocumentListQuery>,
) -> AppResult<Json<Vec<DocumentVersionResponse>>> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<VersionStatus>)
        .transpose()?;
    let filter = VersionFilter {
        status,
        document_type_id: params.document_type_id,
        is_production: params.is_production,
        project_code: params.project_code,
        search: params.query,
        limit: params.limit,
        offset: params.offset,
    };

    let mut conn = state.db()?;
    let versions = engine::list_versions(&mut conn, &user.actor(), &filter)?;
    Ok(Json(versions.into_iter().map(to_version_response).collect()))
}

pub async fn create_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateDocumentRequest>,
) -> AppResult<(StatusCode, Json<DocumentVersionResponse>)> {
    let mut conn = state.db()?;
    let created = engine::create_document(
        &mut conn,
        &user.actor(),
        NewDocumentInput {
            document_type_id: payload.document_type_id,
            title: payload.title,
            description: payload.description,
            project_code: payload.project_code,
            is_production: payload.is_production,
        },
    )?;
    Ok((StatusCode::CREATED, Json(to_version_response(created))))
}

pub async fn get_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_number): Path<String>,
) -> AppResult<Json<DocumentDetailResponse>> {
    let mut conn = state.db()?;
    let lineage = engine::load_lineage(&mut conn, &user.actor(), &document_number)?;
    let first = lineage.first().ok_or_else(AppError::not_found)?;

    let released_version_id = lineage
        .iter()
        .find(|version| version.status == VersionStatus::Released.as_str())
        .map(|version| version.id);

    Ok(Json(DocumentDetailResponse {
        document_number: first.document_number.clone(),
        is_production: first.is_production,
        released_version_id,
        versions: lineage.into_iter().map(to_version_response).collect(),
    }))
}

pub async fn create_version(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_number): Path<String>,
) -> AppResult<(StatusCode, Json<DocumentVersionResponse>)> {
    let mut conn = state.db()?;
    let created =
        engine::create_new_version(&mut conn, &user.actor(), &state.labeler, &document_number)?;
    Ok((StatusCode::CREATED, Json(to_version_response(created))))
}

pub async fn get_document_audit(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_number): Path<String>,
) -> AppResult<Json<Vec<AuditEventResponse>>> {
    let mut conn = state.db()?;
    let events = engine::load_document_audit_trail(&mut conn, &user.actor(), &document_number)?;
    Ok(Json(events.into_iter().map(to_audit_response).collect()))
}

pub(crate) fn to_version_response(version: DocumentVersion) -> DocumentVersionResponse {
    DocumentVersionResponse {
        id: version.id,
        document_type_id: version.document_type_id,
        document_number: version.document_number,
        version: version.version,
        status: version.status,
        is_production: version.is_production,
        title: version.title,
        description: version.description,
        project_code: version.project_code,
        created_by: version.created_by,
        released_by: version.released_by,
        released_at: version.released_at.map(to_iso),
        promoted_from_document_number: version.promoted_from_document_number,
        promoted_from_version_id: version.promoted_from_version_id,
        created_at: to_iso(version.created_at),
        updated_at: to_iso(version.updated_at),
    }
}

pub(crate) fn to_approver_response(approver: Approver) -> ApproverResponse {
    ApproverResponse {
        id: approver.id,
        user_id: approver.user_id,
        status: approver.status,
        comments: approver.comments,
        action_date: approver.action_date.map(to_iso),
    }
}

pub(crate) fn to_attachment_response(attachment: Attachment) -> AttachmentResponse {
    AttachmentResponse {
        id: attachment.id,
        filename: attachment.filename,
        content_type: attachment.content_type,
        size_bytes: attachment.size_bytes,
        checksum: attachment.checksum,
        uploaded_by: attachment.uploaded_by,
        created_at: to_iso(attachment.created_at),
    }
}

pub(crate) fn to_audit_response(event: AuditEvent) -> AuditEventResponse {
    AuditEventResponse {
        id: event.id,
        document_version_id: event.document_version_id,
        document_number: event.document_number,
        action: event.action,
        severity: event.severity,
        performed_by: event.performed_by,
        details: event.details,
        created_at: to_iso(event.created_at),
    }
}

pub(crate) fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}
