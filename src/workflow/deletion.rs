//! Deletion rules for draft versions.
//!
//! A draft that is the only version of its document can always go. A draft
//! with siblings can only go once the lineage has something permanent, that
//! is a released or obsolete sibling.

use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::{find_version, lock_lineage, lock_version, Actor, EngineError, EngineResult, VersionStatus};
use crate::audit::{self, AuditRecord};
use crate::models::DocumentVersion;
use crate::schema::{approvers, attachments, document_versions};

const PERMANENCE_RULE: &str =
    "a draft with sibling versions can only be deleted once another version has been released";

/// Decides deletion from the statuses of the *other* versions in the lineage.
pub fn permits_deletion(siblings: &[VersionStatus]) -> bool {
    siblings.is_empty() || siblings.iter().any(VersionStatus::is_durable)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionCheck {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DeletionCheck {
    fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    fn refused(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug)]
pub struct DeletedVersion {
    pub version: DocumentVersion,
    /// Object storage keys of the removed attachments; delete them after commit.
    pub storage_keys: Vec<String>,
}

fn evaluate(
    actor: &Actor,
    version: &DocumentVersion,
    lineage: &[DocumentVersion],
) -> EngineResult<DeletionCheck> {
    if !actor.is_admin() && version.created_by != actor.user_id {
        return Ok(DeletionCheck::refused(
            "only the creator or a tenant administrator may delete this version",
        ));
    }

    let current = version.current_status()?;
    if current != VersionStatus::Draft {
        return Ok(DeletionCheck::refused(format!(
            "only draft versions can be deleted, {} {} is {current}",
            version.document_number, version.version
        )));
    }

    let siblings = lineage
        .iter()
        .filter(|row| row.id != version.id)
        .map(DocumentVersion::current_status)
        .collect::<EngineResult<Vec<_>>>()?;
    if permits_deletion(&siblings) {
        Ok(DeletionCheck::allowed())
    } else {
        Ok(DeletionCheck::refused(PERMANENCE_RULE))
    }
}

/// Reports whether `delete` would succeed without changing anything.
pub fn can_delete(
    conn: &mut PgConnection,
    actor: &Actor,
    version_id: Uuid,
) -> EngineResult<DeletionCheck> {
    let version = find_version(conn, actor, version_id)?;
    let lineage: Vec<DocumentVersion> = document_versions::table
        .filter(document_versions::tenant_id.eq(version.tenant_id))
        .filter(document_versions::document_number.eq(&version.document_number))
        .load(conn)?;
    evaluate(actor, &version, &lineage)
}

pub fn delete(
    conn: &mut PgConnection,
    actor: &Actor,
    version_id: Uuid,
) -> EngineResult<DeletedVersion> {
    conn.transaction(|conn| {
        let version = lock_version(conn, actor, version_id)?;
        delete_locked(conn, actor, version)
    })
}

/// Deletes an already locked version; shared with the promotion discard path.
pub(crate) fn delete_locked(
    conn: &mut PgConnection,
    actor: &Actor,
    version: DocumentVersion,
) -> EngineResult<DeletedVersion> {
    actor.ensure_owner_or_admin(&version, "delete this version")?;

    let lineage = lock_lineage(conn, version.tenant_id, &version.document_number)?;
    let check = evaluate(actor, &version, &lineage)?;
    if !check.allowed {
        return Err(EngineError::DeletionNotAllowed(
            check.reason.unwrap_or_else(|| PERMANENCE_RULE.to_string()),
        ));
    }

    let storage_keys: Vec<String> = attachments::table
        .filter(attachments::document_version_id.eq(version.id))
        .select(attachments::s3_key)
        .load(conn)?;

    audit::detach_version(conn, version.id)?;
    diesel::delete(approvers::table.filter(approvers::document_version_id.eq(version.id)))
        .execute(conn)?;
    diesel::delete(attachments::table.filter(attachments::document_version_id.eq(version.id)))
        .execute(conn)?;
    diesel::delete(document_versions::table.find(version.id)).execute(conn)?;

    AuditRecord::new(version.tenant_id, version.document_number.clone(), audit::ACTION_DELETED)
        .performed_by(Some(actor.user_id))
        .details(json!({
            "version": version.version,
            "deleted_version_id": version.id,
            "attachments": storage_keys.len(),
        }))
        .write(conn)?;

    info!(
        version_id = %version.id,
        document_number = %version.document_number,
        version = %version.version,
        "version deleted"
    );
    Ok(DeletedVersion {
        version,
        storage_keys,
    })
}
