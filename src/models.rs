use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = tenants)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tenants)]
pub struct NewTenant {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub role: String,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = document_types)]
pub struct DocumentType {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub prefix: String,
    pub name: String,
    pub next_number: i32,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document_types)]
pub struct NewDocumentType {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub prefix: String,
    pub name: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = document_versions)]
#[diesel(belongs_to(DocumentType, foreign_key = document_type_id))]
pub struct DocumentVersion {
    pub id: Uuid,
    pub tenant_id: Uuid,
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
    pub released_at: Option<NaiveDateTime>,
    pub promoted_from_document_number: Option<String>,
    pub promoted_from_version_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = document_versions)]
pub struct NewDocumentVersion {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub document_type_id: Uuid,
    pub document_number: String,
    pub version: String,
    pub status: String,
    pub is_production: bool,
    pub title: String,
    pub description: Option<String>,
    pub project_code: Option<String>,
    pub created_by: Uuid,
    pub promoted_from_document_number: Option<String>,
    pub promoted_from_version_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = approvers)]
#[diesel(belongs_to(DocumentVersion, foreign_key = document_version_id))]
pub struct Approver {
    pub id: Uuid,
    pub document_version_id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub comments: Option<String>,
    pub action_date: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = approvers)]
pub struct NewApprover {
    pub id: Uuid,
    pub document_version_id: Uuid,
    pub user_id: Uuid,
    pub status: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = attachments)]
#[diesel(belongs_to(DocumentVersion, foreign_key = document_version_id))]
pub struct Attachment {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub document_version_id: Uuid,
    pub filename: String,
    pub content_type: Option<String>,
    pub s3_key: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub uploaded_by: Uuid,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = attachments)]
pub struct NewAttachment {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub document_version_id: Uuid,
    pub filename: String,
    pub content_type: Option<String>,
    pub s3_key: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub uploaded_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = audit_events)]
pub struct AuditEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub document_version_id: Option<Uuid>,
    pub document_number: String,
    pub action: String,
    pub severity: String,
    pub performed_by: Option<Uuid>,
    pub details: serde_json::Value,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = audit_events)]
pub struct NewAuditEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub document_version_id: Option<Uuid>,
    pub document_number: String,
    pub action: String,
    pub severity: String,
    pub performed_by: Option<Uuid>,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: NaiveDateTime,
}
