use axum::extract::{Json, Multipart, Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{error, info};
use uuid::Uuid;

use super::documents::{
    to_approver_response, to_attachment_response, to_audit_response, to_version_response,
    ApproverResponse, AttachmentResponse, AuditEventResponse, DocumentVersionResponse,
};
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::storage::{attachment_key, remove_objects};
use crate::utils::json::FieldPatch;
use crate::workflow::approvals::{self, ApprovalSummary, Decision};
use crate::workflow::deletion::{self, DeletionCheck};
use crate::workflow::documents::{self as engine, AttachmentInput, VersionChanges};
use crate::workflow::promotion::{self, PromotionStrategy};
use crate::workflow::status;

#[derive(Serialize)]
pub struct ApprovalStateResponse {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub fully_approved: bool,
    pub has_rejection: bool,
}

impl From<ApprovalSummary> for ApprovalStateResponse {
    fn from(summary: ApprovalSummary) -> Self {
        Self {
            total: summary.total,
            pending: summary.pending,
            approved: summary.approved,
            rejected: summary.rejected,
            fully_approved: summary.is_fully_approved(),
            has_rejection: summary.has_rejection(),
        }
    }
}

#[derive(Serialize)]
pub struct VersionDetailResponse {
    #[serde(flatten)]
    pub version: DocumentVersionResponse,
    pub approvers: Vec<ApproverResponse>,
    pub approval: ApprovalStateResponse,
}

#[derive(Deserialize)]
pub struct AssignApproversRequest {
    pub user_ids: Vec<Uuid>,
}

#[derive(Deserialize, Default)]
pub struct SubmitRequest {
    #[serde(default)]
    pub approver_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct DecisionRequest {
    pub decision: Decision,
    pub comment: Option<String>,
}

#[derive(Serialize)]
pub struct DecisionResponse {
    pub version: DocumentVersionResponse,
    pub approver: ApproverResponse,
    pub released: bool,
}

#[derive(Deserialize, Default)]
pub struct PromoteRequest {
    pub strategy: Option<PromotionStrategy>,
}

#[derive(Serialize)]
pub struct PromoteResponse {
    pub version: DocumentVersionResponse,
    pub strategy: Option<PromotionStrategy>,
    pub replaced_version_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct AttachmentDownloadResponse {
    pub url: String,
    pub expires_in: u64,
}

pub async fn get_version(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(version_id): Path<Uuid>,
) -> AppResult<Json<VersionDetailResponse>> {
    let mut conn = state.db()?;
    let version = engine::load_version(&mut conn, &user.actor(), version_id)?;
    let approver_rows = approvals::load_approvers(&mut conn, version.id)?;
    let summary = ApprovalSummary::from_rows(&approver_rows)?;

    Ok(Json(VersionDetailResponse {
        version: to_version_response(version),
        approvers: approver_rows.into_iter().map(to_approver_response).collect(),
        approval: summary.into(),
    }))
}

pub async fn update_version(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(version_id): Path<Uuid>,
    Json(body): Json<Value>,
) -> AppResult<Json<DocumentVersionResponse>> {
    let title = FieldPatch::read(&body, "title")
        .and_then(|patch| patch.into_required("title"))
        .map_err(AppError::bad_request)?;
    let description = nullable_change(&body, "description")?;
    let project_code = nullable_change(&body, "project_code")?;

    let mut conn = state.db()?;
    let updated = engine::update_draft(
        &mut conn,
        &user.actor(),
        version_id,
        VersionChanges {
            title,
            description,
            project_code,
        },
    )?;
    Ok(Json(to_version_response(updated)))
}

fn nullable_change(body: &Value, field: &str) -> AppResult<Option<Option<String>>> {
    FieldPatch::read(body, field)
        .map(FieldPatch::into_change)
        .map_err(AppError::bad_request)
}

pub async fn delete_version(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(version_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let deleted = {
        let mut conn = state.db()?;
        deletion::delete(&mut conn, &user.actor(), version_id)?
    };
    remove_objects(state.storage.as_ref(), &deleted.storage_keys).await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn check_deletable(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(version_id): Path<Uuid>,
) -> AppResult<Json<DeletionCheck>> {
    let mut conn = state.db()?;
    Ok(Json(deletion::can_delete(&mut conn, &user.actor(), version_id)?))
}

pub async fn assign_approvers(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(version_id): Path<Uuid>,
    Json(payload): Json<AssignApproversRequest>,
) -> AppResult<Json<Vec<ApproverResponse>>> {
    let mut conn = state.db()?;
    let rows = approvals::assign(&mut conn, &user.actor(), version_id, &payload.user_ids)?;
    Ok(Json(rows.into_iter().map(to_approver_response).collect()))
}

pub async fn remove_approver(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((version_id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    approvals::unassign(&mut conn, &user.actor(), version_id, user_id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn submit_version(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(version_id): Path<Uuid>,
    Json(payload): Json<SubmitRequest>,
) -> AppResult<Json<DocumentVersionResponse>> {
    let mut conn = state.db()?;
    let submitted =
        status::submit_for_approval(&mut conn, &user.actor(), version_id, &payload.approver_ids)?;
    Ok(Json(to_version_response(submitted)))
}

pub async fn record_decision(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(version_id): Path<Uuid>,
    Json(payload): Json<DecisionRequest>,
) -> AppResult<Json<DecisionResponse>> {
    let mut conn = state.db()?;
    let outcome = approvals::decide(
        &mut conn,
        &user.actor(),
        version_id,
        payload.decision,
        payload.comment.as_deref(),
    )?;
    Ok(Json(DecisionResponse {
        version: to_version_response(outcome.version),
        approver: to_approver_response(outcome.approver),
        released: outcome.released,
    }))
}

pub async fn release_version(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(version_id): Path<Uuid>,
) -> AppResult<Json<DocumentVersionResponse>> {
    let mut conn = state.db()?;
    let released = status::release_directly(&mut conn, &user.actor(), version_id)?;
    Ok(Json(to_version_response(released)))
}

pub async fn promote_version(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(version_id): Path<Uuid>,
    Json(payload): Json<PromoteRequest>,
) -> AppResult<(StatusCode, Json<PromoteResponse>)> {
    let outcome = {
        let mut conn = state.db()?;
        promotion::promote(&mut conn, &user.actor(), version_id, payload.strategy)?
    };
    remove_objects(state.storage.as_ref(), &outcome.storage_keys).await;

    Ok((
        StatusCode::CREATED,
        Json(PromoteResponse {
            version: to_version_response(outcome.version),
            strategy: outcome.strategy,
            replaced_version_id: outcome.replaced_version_id,
        }),
    ))
}

pub async fn get_version_audit(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(version_id): Path<Uuid>,
) -> AppResult<Json<Vec<AuditEventResponse>>> {
    let mut conn = state.db()?;
    let events = engine::load_audit_trail(&mut conn, &user.actor(), version_id)?;
    Ok(Json(events.into_iter().map(to_audit_response).collect()))
}

pub async fn list_attachments(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(version_id): Path<Uuid>,
) -> AppResult<Json<Vec<AttachmentResponse>>> {
    let mut conn = state.db()?;
    let rows = engine::list_attachments(&mut conn, &user.actor(), version_id)?;
    Ok(Json(rows.into_iter().map(to_attachment_response).collect()))
}

pub async fn upload_attachment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(version_id): Path<Uuid>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<AttachmentResponse>)> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut original_name: Option<String> = None;
    let mut content_type: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        if field.name() != Some("file") {
            continue;
        }
        original_name = field.file_name().map(|name| name.to_string());
        content_type = field.content_type().map(|mime| mime.to_string());
        let data = field.bytes().await.map_err(|err| {
            error!(error = %err, "failed to read attachment bytes");
            AppError::bad_request(format!("failed to read file bytes: {err}"))
        })?;
        file_bytes = Some(data.to_vec());
    }

    let bytes = file_bytes.ok_or_else(|| AppError::bad_request("file field is required"))?;
    if bytes.is_empty() {
        return Err(AppError::bad_request("file field must not be empty"));
    }
    let filename = original_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AppError::bad_request("filename is required"))?;
    let content_type = content_type.or_else(|| {
        mime_guess::from_path(&filename)
            .first()
            .map(|mime| mime.essence_str().to_string())
    });

    let actor = user.actor();
    {
        // Fail before uploading when the version cannot take attachments.
        let mut conn = state.db()?;
        let version = engine::load_version(&mut conn, &actor, version_id)?;
        actor.ensure_owner_or_admin(&version, "attach files to this version")?;
    }

    let checksum = hex::encode(Sha256::digest(&bytes));
    let size_bytes = bytes.len() as i64;
    let s3_key = attachment_key(actor.tenant_id, version_id, Uuid::new_v4());

    state
        .storage
        .put_object(
            &s3_key,
            bytes,
            content_type.clone(),
            attachment_content_disposition(&filename),
        )
        .await
        .map_err(|err| {
            error!(error = %err, key = %s3_key, "failed to store attachment");
            AppError::internal(format!("failed to store attachment: {err}"))
        })?;

    let recorded = {
        let mut conn = state.db()?;
        engine::add_attachment(
            &mut conn,
            &actor,
            version_id,
            AttachmentInput {
                filename,
                content_type,
                s3_key: s3_key.clone(),
                size_bytes,
                checksum,
            },
        )
    };
    let attachment = match recorded {
        Ok(attachment) => attachment,
        Err(err) => {
            remove_objects(state.storage.as_ref(), &[s3_key]).await;
            return Err(err.into());
        }
    };

    info!(
        attachment_id = %attachment.id,
        version_id = %version_id,
        size_bytes,
        "attachment uploaded"
    );
    Ok((StatusCode::CREATED, Json(to_attachment_response(attachment))))
}

pub async fn download_attachment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((version_id, attachment_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<AttachmentDownloadResponse>> {
    let attachment = {
        let mut conn = state.db()?;
        engine::find_attachment(&mut conn, &user.actor(), version_id, attachment_id)?
    };

    let expiry = state.config.attachment_url_expiry();
    let url = state
        .storage
        .presign_get_object(&attachment.s3_key, expiry)
        .await
        .map_err(|err| AppError::internal(format!("failed to generate attachment URL: {err}")))?;

    Ok(Json(AttachmentDownloadResponse {
        url,
        expires_in: expiry.as_secs(),
    }))
}

fn attachment_content_disposition(filename: &str) -> Option<String> {
    if filename.is_empty() {
        return None;
    }

    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    Some(format!(
        "attachment; filename=\"{sanitized}\"; filename*=UTF-8''{encoded}"
    ))
}
