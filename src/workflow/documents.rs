use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::labels::{sort_by_label, VersionLabeler};
use super::sequence;
use super::{
    find_version, label_race, lock_lineage, lock_version, Actor, EngineError, EngineResult,
    VersionStatus,
};
use crate::audit::{self, AuditRecord};
use crate::models::{Attachment, AuditEvent, DocumentVersion, NewAttachment, NewDocumentVersion};
use crate::schema::{attachments, document_versions};

const MAX_TITLE_LEN: usize = 255;
// Rows inserted by a concurrent writer are invisible to the lineage lock, so
// each attempt can lose to at most the writers that were already waiting.
const MAX_LABEL_ATTEMPTS: usize = 5;
const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, Clone)]
pub struct NewDocumentInput {
    pub document_type_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub project_code: Option<String>,
    pub is_production: bool,
}

/// Field edits for a draft. `None` leaves a field alone; `Some(None)` clears
/// a nullable field.
#[derive(Debug, Clone, Default)]
pub struct VersionChanges {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub project_code: Option<Option<String>>,
}

impl VersionChanges {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.project_code.is_none()
    }
}

#[derive(AsChangeset)]
#[diesel(table_name = document_versions)]
struct VersionChangeset<'a> {
    title: Option<&'a str>,
    description: Option<Option<&'a str>>,
    project_code: Option<Option<&'a str>>,
    updated_at: chrono::NaiveDateTime,
}

#[derive(Debug, Clone, Default)]
pub struct VersionFilter {
    pub status: Option<VersionStatus>,
    pub document_type_id: Option<Uuid>,
    pub is_production: Option<bool>,
    pub project_code: Option<String>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct AttachmentInput {
    pub filename: String,
    pub content_type: Option<String>,
    pub s3_key: String,
    pub size_bytes: i64,
    pub checksum: String,
}

pub fn validate_title(title: &str) -> EngineResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(EngineError::InvalidInput("title must not be empty".to_string()));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(EngineError::InvalidInput(format!(
            "title must be at most {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(title.to_string())
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn insert_version(
    conn: &mut PgConnection,
    new_version: &NewDocumentVersion,
) -> EngineResult<DocumentVersion> {
    diesel::insert_into(document_versions::table)
        .values(new_version)
        .get_result(conn)
        .map_err(label_race)
}

/// Creates a document: allocates its number and inserts the first draft.
///
/// The number is committed before the version row is written. A failure after
/// allocation leaves a gap in the sequence.
pub fn create_document(
    conn: &mut PgConnection,
    actor: &Actor,
    input: NewDocumentInput,
) -> EngineResult<DocumentVersion> {
    let title = validate_title(&input.title)?;
    let allocation = sequence::allocate(conn, actor, input.document_type_id)?;

    let new_version = NewDocumentVersion {
        id: Uuid::new_v4(),
        tenant_id: actor.tenant_id,
        document_type_id: allocation.document_type_id,
        document_number: allocation.document_number.clone(),
        version: VersionLabeler::first(input.is_production),
        status: VersionStatus::Draft.as_str().to_string(),
        is_production: input.is_production,
        title,
        description: normalize_optional(input.description),
        project_code: normalize_optional(input.project_code),
        created_by: actor.user_id,
        promoted_from_document_number: None,
        promoted_from_version_id: None,
    };

    let created = conn.transaction(|conn| {
        let created = insert_version(conn, &new_version)?;
        AuditRecord::for_version(&created, audit::ACTION_CREATED)
            .performed_by(Some(actor.user_id))
            .details(json!({
                "title": created.title,
                "is_production": created.is_production,
            }))
            .write(conn)?;
        Ok::<_, EngineError>(created)
    })?;

    info!(
        version_id = %created.id,
        document_number = %created.document_number,
        version = %created.version,
        "document created"
    );
    Ok(created)
}

/// Adds the next version to an existing document as a fresh draft.
pub fn create_new_version(
    conn: &mut PgConnection,
    actor: &Actor,
    labeler: &VersionLabeler,
    document_number: &str,
) -> EngineResult<DocumentVersion> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match try_create_new_version(conn, actor, labeler, document_number) {
            Err(EngineError::ConcurrencyConflict) if attempt < MAX_LABEL_ATTEMPTS => {
                warn!(document_number, attempt, "version label conflicted, retrying");
            }
            other => return other,
        }
    }
}

fn try_create_new_version(
    conn: &mut PgConnection,
    actor: &Actor,
    labeler: &VersionLabeler,
    document_number: &str,
) -> EngineResult<DocumentVersion> {
    conn.transaction(|conn| {
        let lineage = lock_lineage(conn, actor.tenant_id, document_number)?;
        let Some(latest) = lineage.last() else {
            return Err(EngineError::NotFound("document"));
        };

        let label = labeler.next(Some(&latest.version), latest.is_production)?;
        let new_version = NewDocumentVersion {
            id: Uuid::new_v4(),
            tenant_id: actor.tenant_id,
            document_type_id: latest.document_type_id,
            document_number: latest.document_number.clone(),
            version: label,
            status: VersionStatus::Draft.as_str().to_string(),
            is_production: latest.is_production,
            title: latest.title.clone(),
            description: latest.description.clone(),
            project_code: latest.project_code.clone(),
            created_by: actor.user_id,
            promoted_from_document_number: None,
            promoted_from_version_id: None,
        };
        let created = insert_version(conn, &new_version)?;

        AuditRecord::for_version(&created, audit::ACTION_VERSION_CREATED)
            .performed_by(Some(actor.user_id))
            .details(json!({ "previous_version": latest.version }))
            .write(conn)?;

        info!(
            version_id = %created.id,
            document_number = %created.document_number,
            version = %created.version,
            "version created"
        );
        Ok(created)
    })
}

pub fn update_draft(
    conn: &mut PgConnection,
    actor: &Actor,
    version_id: Uuid,
    changes: VersionChanges,
) -> EngineResult<DocumentVersion> {
    conn.transaction(|conn| {
        let version = lock_version(conn, actor, version_id)?;
        actor.ensure_owner_or_admin(&version, "edit this version")?;
        let current = version.current_status()?;
        if current != VersionStatus::Draft {
            return Err(EngineError::InvalidState(format!(
                "only draft versions can be edited, {} {} is {current}",
                version.document_number, version.version
            )));
        }
        if changes.is_empty() {
            return Ok(version);
        }

        let title = changes.title.as_deref().map(validate_title).transpose()?;
        let description = changes.description.map(normalize_optional);
        let project_code = changes.project_code.map(normalize_optional);

        let changeset = VersionChangeset {
            title: title.as_deref(),
            description: description.as_ref().map(|value| value.as_deref()),
            project_code: project_code.as_ref().map(|value| value.as_deref()),
            updated_at: Utc::now().naive_utc(),
        };
        let updated: DocumentVersion = diesel::update(document_versions::table.find(version.id))
            .set(&changeset)
            .get_result(conn)?;

        AuditRecord::for_version(&updated, audit::ACTION_UPDATED)
            .performed_by(Some(actor.user_id))
            .details(json!({
                "title": title,
                "description": description,
                "project_code": project_code,
            }))
            .write(conn)?;
        Ok(updated)
    })
}

pub fn load_version(
    conn: &mut PgConnection,
    actor: &Actor,
    version_id: Uuid,
) -> EngineResult<DocumentVersion> {
    find_version(conn, actor, version_id)
}

/// Every version of a document, oldest label first.
pub fn load_lineage(
    conn: &mut PgConnection,
    actor: &Actor,
    document_number: &str,
) -> EngineResult<Vec<DocumentVersion>> {
    let mut rows: Vec<DocumentVersion> = document_versions::table
        .filter(document_versions::tenant_id.eq(actor.tenant_id))
        .filter(document_versions::document_number.eq(document_number))
        .load(conn)?;
    if rows.is_empty() {
        return Err(EngineError::NotFound("document"));
    }
    sort_by_label(&mut rows);
    Ok(rows)
}

pub fn list_versions(
    conn: &mut PgConnection,
    actor: &Actor,
    filter: &VersionFilter,
) -> EngineResult<Vec<DocumentVersion>> {
    let mut query = document_versions::table
        .filter(document_versions::tenant_id.eq(actor.tenant_id))
        .into_boxed();

    if let Some(status) = filter.status {
        query = query.filter(document_versions::status.eq(status.as_str()));
    }
    if let Some(type_id) = filter.document_type_id {
        query = query.filter(document_versions::document_type_id.eq(type_id));
    }
    if let Some(is_production) = filter.is_production {
        query = query.filter(document_versions::is_production.eq(is_production));
    }
    if let Some(project_code) = filter.project_code.as_deref() {
        query = query.filter(document_versions::project_code.eq(project_code.to_string()));
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search.replace('%', "\\%").replace('_', "\\_"));
        query = query.filter(
            document_versions::title
                .ilike(pattern.clone())
                .or(document_versions::document_number.ilike(pattern)),
        );
    }

    let limit = filter
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = filter.offset.unwrap_or(0).max(0);

    Ok(query
        .order((
            document_versions::document_number.asc(),
            document_versions::created_at.asc(),
        ))
        .limit(limit)
        .offset(offset)
        .load(conn)?)
}

pub fn load_audit_trail(
    conn: &mut PgConnection,
    actor: &Actor,
    version_id: Uuid,
) -> EngineResult<Vec<AuditEvent>> {
    let version = find_version(conn, actor, version_id)?;
    Ok(audit::load_for_version(conn, actor.tenant_id, version.id)?)
}

pub fn load_document_audit_trail(
    conn: &mut PgConnection,
    actor: &Actor,
    document_number: &str,
) -> EngineResult<Vec<AuditEvent>> {
    Ok(audit::load_for_document(conn, actor.tenant_id, document_number)?)
}

/// Records an uploaded file against a draft. The object is already in
/// storage; a failure here leaves it for the caller to remove.
pub fn add_attachment(
    conn: &mut PgConnection,
    actor: &Actor,
    version_id: Uuid,
    input: AttachmentInput,
) -> EngineResult<Attachment> {
    conn.transaction(|conn| {
        let version = lock_version(conn, actor, version_id)?;
        actor.ensure_owner_or_admin(&version, "attach files to this version")?;
        let current = version.current_status()?;
        if current != VersionStatus::Draft {
            return Err(EngineError::InvalidState(format!(
                "attachments can only be added to draft versions, {} {} is {current}",
                version.document_number, version.version
            )));
        }

        let new_attachment = NewAttachment {
            id: Uuid::new_v4(),
            tenant_id: version.tenant_id,
            document_version_id: version.id,
            filename: input.filename,
            content_type: input.content_type,
            s3_key: input.s3_key,
            size_bytes: input.size_bytes,
            checksum: input.checksum,
            uploaded_by: actor.user_id,
        };
        let attachment: Attachment = diesel::insert_into(attachments::table)
            .values(&new_attachment)
            .get_result(conn)?;

        AuditRecord::for_version(&version, audit::ACTION_ATTACHMENT_ADDED)
            .performed_by(Some(actor.user_id))
            .details(json!({
                "attachment_id": attachment.id,
                "filename": attachment.filename,
                "size_bytes": attachment.size_bytes,
            }))
            .write(conn)?;
        Ok(attachment)
    })
}

pub fn list_attachments(
    conn: &mut PgConnection,
    actor: &Actor,
    version_id: Uuid,
) -> EngineResult<Vec<Attachment>> {
    let version = find_version(conn, actor, version_id)?;
    Ok(attachments::table
        .filter(attachments::document_version_id.eq(version.id))
        .order(attachments::created_at.asc())
        .load(conn)?)
}

pub fn find_attachment(
    conn: &mut PgConnection,
    actor: &Actor,
    version_id: Uuid,
    attachment_id: Uuid,
) -> EngineResult<Attachment> {
    attachments::table
        .filter(attachments::id.eq(attachment_id))
        .filter(attachments::document_version_id.eq(version_id))
        .filter(attachments::tenant_id.eq(actor.tenant_id))
        .first(conn)
        .optional()?
        .ok_or(EngineError::NotFound("attachment"))
}
