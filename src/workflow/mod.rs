//! Version and approval workflow for controlled documents.
//!
//! Every operation takes the acting user's [`Actor`] and a PostgreSQL
//! connection, runs as a single transaction and only ever touches rows that
//! belong to the actor's tenant. Rows from other tenants are reported as
//! missing.

use std::fmt;
use std::str::FromStr;

use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;
use uuid::Uuid;

use crate::jobs::JobQueueError;
use crate::models::{Approver, DocumentVersion};
use crate::schema::document_versions;

pub mod admin;
pub mod approvals;
pub mod deletion;
pub mod document_types;
pub mod documents;
pub mod labels;
pub mod obsolescence;
pub mod promotion;
pub mod sequence;
pub mod status;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_MEMBER: &str = "member";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => ROLE_ADMIN,
            Role::Member => ROLE_MEMBER,
        }
    }

    /// Unknown role names grant no elevated rights.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case(ROLE_ADMIN) {
            Role::Admin
        } else {
            Role::Member
        }
    }
}

/// The user on whose behalf an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: Uuid, tenant_id: Uuid, role: Role) -> Self {
        Self {
            user_id,
            tenant_id,
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn ensure_admin(&self, action: &str) -> EngineResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(EngineError::PermissionDenied(format!(
                "only tenant administrators may {action}"
            )))
        }
    }

    pub fn ensure_owner_or_admin(&self, version: &DocumentVersion, action: &str) -> EngineResult<()> {
        if self.is_admin() || version.created_by == self.user_id {
            Ok(())
        } else {
            Err(EngineError::PermissionDenied(format!(
                "only the creator of {} {} or a tenant administrator may {action}",
                version.document_number, version.version
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionStatus {
    Draft,
    InApproval,
    Released,
    Obsolete,
}

impl VersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::Draft => "draft",
            VersionStatus::InApproval => "in_approval",
            VersionStatus::Released => "released",
            VersionStatus::Obsolete => "obsolete",
        }
    }

    pub fn is_durable(&self) -> bool {
        matches!(self, VersionStatus::Released | VersionStatus::Obsolete)
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VersionStatus {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(VersionStatus::Draft),
            "in_approval" | "in approval" | "inapproval" => Ok(VersionStatus::InApproval),
            "released" => Ok(VersionStatus::Released),
            "obsolete" => Ok(VersionStatus::Obsolete),
            other => Err(EngineError::InvalidInput(format!(
                "unknown version status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApproverStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApproverStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApproverStatus::Pending => "pending",
            ApproverStatus::Approved => "approved",
            ApproverStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for ApproverStatus {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ApproverStatus::Pending),
            "approved" => Ok(ApproverStatus::Approved),
            "rejected" => Ok(ApproverStatus::Rejected),
            other => Err(EngineError::InvalidInput(format!(
                "unknown approver status '{other}'"
            ))),
        }
    }
}

impl DocumentVersion {
    pub fn current_status(&self) -> EngineResult<VersionStatus> {
        self.status.parse()
    }
}

impl Approver {
    pub fn decision(&self) -> EngineResult<ApproverStatus> {
        self.status.parse()
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("illegal transition from {from} to {to}: {reason}")]
    IllegalTransition {
        from: VersionStatus,
        to: VersionStatus,
        reason: String,
    },
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("user {0} is already an approver of this version")]
    DuplicateApprover(Uuid),
    #[error(
        "draft production version {document_number} ({existing}) already exists for this prototype; \
         choose the discard or convert strategy"
    )]
    ConflictRequiresStrategy {
        existing: Uuid,
        document_number: String,
    },
    #[error("deletion not allowed: {0}")]
    DeletionNotAllowed(String),
    #[error("document type {0} is inactive")]
    Inactive(String),
    #[error("sequence exhausted: {0}")]
    SequenceExhausted(String),
    #[error("concurrent modification detected, retry the operation")]
    ConcurrencyConflict,
    #[error("{0}")]
    InvalidInput(String),
    #[error("failed to enqueue notification: {0}")]
    Queue(#[from] JobQueueError),
    #[error("database error: {0}")]
    Database(DieselError),
}

impl From<DieselError> for EngineError {
    fn from(value: DieselError) -> Self {
        match value {
            DieselError::NotFound => EngineError::NotFound("record"),
            DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => {
                EngineError::ConcurrencyConflict
            }
            other => EngineError::Database(other),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

pub(crate) fn illegal(from: VersionStatus, to: VersionStatus, reason: impl Into<String>) -> EngineError {
    EngineError::IllegalTransition {
        from,
        to,
        reason: reason.into(),
    }
}

/// Maps a unique violation on `(tenant_id, document_number, version)` to a
/// retryable conflict; two writers raced for the same label.
pub(crate) fn label_race(err: DieselError) -> EngineError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            EngineError::ConcurrencyConflict
        }
        other => EngineError::from(other),
    }
}

pub(crate) fn find_version(
    conn: &mut PgConnection,
    actor: &Actor,
    version_id: Uuid,
) -> EngineResult<DocumentVersion> {
    document_versions::table
        .filter(document_versions::id.eq(version_id))
        .filter(document_versions::tenant_id.eq(actor.tenant_id))
        .first(conn)
        .optional()?
        .ok_or(EngineError::NotFound("document version"))
}

/// Loads a version and holds its row lock until the surrounding transaction
/// ends.
pub(crate) fn lock_version(
    conn: &mut PgConnection,
    actor: &Actor,
    version_id: Uuid,
) -> EngineResult<DocumentVersion> {
    document_versions::table
        .filter(document_versions::id.eq(version_id))
        .filter(document_versions::tenant_id.eq(actor.tenant_id))
        .for_update()
        .first(conn)
        .optional()?
        .ok_or(EngineError::NotFound("document version"))
}

/// All versions sharing `document_number`, locked and ordered by label.
pub(crate) fn lock_lineage(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    document_number: &str,
) -> EngineResult<Vec<DocumentVersion>> {
    let mut rows: Vec<DocumentVersion> = document_versions::table
        .filter(document_versions::tenant_id.eq(tenant_id))
        .filter(document_versions::document_number.eq(document_number))
        .for_update()
        .load(conn)?;
    labels::sort_by_label(&mut rows);
    Ok(rows)
}

pub(crate) fn set_status(
    conn: &mut PgConnection,
    version: &DocumentVersion,
    to: VersionStatus,
) -> EngineResult<DocumentVersion> {
    let updated = diesel::update(document_versions::table.find(version.id))
        .set((
            document_versions::status.eq(to.as_str()),
            document_versions::updated_at.eq(chrono::Utc::now().naive_utc()),
        ))
        .get_result(conn)?;
    Ok(updated)
}
