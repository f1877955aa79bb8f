//! Turning a released prototype into a production lineage.
//!
//! A prototype may already have an unreleased production draft from an
//! earlier promotion. The caller then has to say what happens to it:
//! `discard` deletes it and starts a fresh lineage, `convert` refreshes it in
//! place from the current prototype.

use std::str::FromStr;

use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::approvals;
use super::deletion::{self, DeletedVersion};
use super::documents::insert_version;
use super::labels::VersionLabeler;
use super::sequence;
use super::{find_version, lock_version, Actor, EngineError, EngineResult, VersionStatus};
use crate::audit::{self, AuditRecord};
use crate::models::{DocumentVersion, NewDocumentVersion};
use crate::schema::document_versions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromotionStrategy {
    Discard,
    Convert,
}

impl PromotionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromotionStrategy::Discard => "discard",
            PromotionStrategy::Convert => "convert",
        }
    }
}

impl FromStr for PromotionStrategy {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "discard" => Ok(PromotionStrategy::Discard),
            "convert" => Ok(PromotionStrategy::Convert),
            other => Err(EngineError::InvalidInput(format!(
                "unknown promotion strategy '{other}'"
            ))),
        }
    }
}

#[derive(Debug)]
pub struct PromotionOutcome {
    /// The production draft that now represents the prototype.
    pub version: DocumentVersion,
    pub strategy: Option<PromotionStrategy>,
    /// The stale draft that was deleted or converted.
    pub replaced_version_id: Option<Uuid>,
    /// Storage keys of attachments removed with a discarded draft.
    pub storage_keys: Vec<String>,
}

fn ensure_promotable(source: &DocumentVersion) -> EngineResult<()> {
    let status = source.current_status()?;
    if source.is_production {
        return Err(EngineError::InvalidState(format!(
            "{} {} is already a production version",
            source.document_number, source.version
        )));
    }
    if status != VersionStatus::Released {
        return Err(EngineError::InvalidState(format!(
            "only released prototypes can be promoted, {} {} is {status}",
            source.document_number, source.version
        )));
    }
    Ok(())
}

fn find_stale_draft(
    conn: &mut PgConnection,
    source: &DocumentVersion,
    lock: bool,
) -> EngineResult<Option<DocumentVersion>> {
    let query = document_versions::table
        .filter(document_versions::tenant_id.eq(source.tenant_id))
        .filter(document_versions::promoted_from_document_number.eq(&source.document_number))
        .filter(document_versions::is_production.eq(true))
        .filter(document_versions::status.eq(VersionStatus::Draft.as_str()))
        .order(document_versions::created_at.desc());

    let found = if lock {
        query.for_update().first(conn).optional()?
    } else {
        query.first(conn).optional()?
    };
    Ok(found)
}

/// Promotes a released prototype to production.
///
/// Without a strategy an existing production draft for the same prototype is
/// reported as [`EngineError::ConflictRequiresStrategy`] so the caller can
/// choose and call again.
pub fn promote(
    conn: &mut PgConnection,
    actor: &Actor,
    version_id: Uuid,
    strategy: Option<PromotionStrategy>,
) -> EngineResult<PromotionOutcome> {
    let source = find_version(conn, actor, version_id)?;
    actor.ensure_owner_or_admin(&source, "promote this version")?;
    ensure_promotable(&source)?;

    let stale = find_stale_draft(conn, &source, false)?;
    match (stale, strategy) {
        (Some(stale), None) => Err(EngineError::ConflictRequiresStrategy {
            existing: stale.id,
            document_number: stale.document_number,
        }),
        (Some(stale), Some(PromotionStrategy::Convert)) => convert(conn, actor, &source, stale.id),
        (stale, strategy) => promote_fresh(conn, actor, &source, stale.map(|s| s.id), strategy),
    }
}

fn promote_fresh(
    conn: &mut PgConnection,
    actor: &Actor,
    source: &DocumentVersion,
    discard: Option<Uuid>,
    strategy: Option<PromotionStrategy>,
) -> EngineResult<PromotionOutcome> {
    let allocation = sequence::allocate(conn, actor, source.document_type_id)?;

    conn.transaction(|conn| {
        let source = lock_version(conn, actor, source.id)?;
        ensure_promotable(&source)?;

        let mut storage_keys = Vec::new();
        let mut replaced_version_id = None;
        if let Some(stale_id) = discard {
            let stale = lock_version(conn, actor, stale_id)?;
            let DeletedVersion {
                version,
                storage_keys: keys,
            } = deletion::delete_locked(conn, actor, stale)?;
            replaced_version_id = Some(version.id);
            storage_keys = keys;
        }

        if let Some(other) = find_stale_draft(conn, &source, true)? {
            return Err(EngineError::ConflictRequiresStrategy {
                existing: other.id,
                document_number: other.document_number,
            });
        }

        let new_version = NewDocumentVersion {
            id: Uuid::new_v4(),
            tenant_id: source.tenant_id,
            document_type_id: allocation.document_type_id,
            document_number: allocation.document_number.clone(),
            version: VersionLabeler::first(true),
            status: VersionStatus::Draft.as_str().to_string(),
            is_production: true,
            title: source.title.clone(),
            description: source.description.clone(),
            project_code: source.project_code.clone(),
            created_by: actor.user_id,
            promoted_from_document_number: Some(source.document_number.clone()),
            promoted_from_version_id: Some(source.id),
        };
        let created = insert_version(conn, &new_version)?;

        AuditRecord::for_version(&source, audit::ACTION_PROMOTED_TO_PRODUCTION)
            .performed_by(Some(actor.user_id))
            .details(json!({
                "production_document_number": created.document_number,
                "production_version_id": created.id,
                "strategy": strategy.map(|s| s.as_str()),
            }))
            .write(conn)?;
        AuditRecord::for_version(&created, audit::ACTION_PROMOTED)
            .performed_by(Some(actor.user_id))
            .details(json!({
                "source_document_number": source.document_number,
                "source_version": source.version,
                "source_version_id": source.id,
                "replaced_version_id": replaced_version_id,
            }))
            .write(conn)?;

        info!(
            source_document_number = %source.document_number,
            source_version = %source.version,
            document_number = %created.document_number,
            version_id = %created.id,
            "prototype promoted to production"
        );
        Ok(PromotionOutcome {
            version: created,
            strategy,
            replaced_version_id,
            storage_keys,
        })
    })
}

fn convert(
    conn: &mut PgConnection,
    actor: &Actor,
    source: &DocumentVersion,
    stale_id: Uuid,
) -> EngineResult<PromotionOutcome> {
    conn.transaction(|conn| {
        let source = lock_version(conn, actor, source.id)?;
        ensure_promotable(&source)?;

        let stale = lock_version(conn, actor, stale_id)?;
        actor.ensure_owner_or_admin(&stale, "convert this production draft")?;
        let status = stale.current_status()?;
        if status != VersionStatus::Draft {
            return Err(EngineError::InvalidState(format!(
                "{} {} is no longer a draft, it is {status}",
                stale.document_number, stale.version
            )));
        }

        let converted: DocumentVersion = diesel::update(document_versions::table.find(stale.id))
            .set((
                document_versions::title.eq(&source.title),
                document_versions::description.eq(&source.description),
                document_versions::project_code.eq(&source.project_code),
                document_versions::promoted_from_document_number
                    .eq(Some(&source.document_number)),
                document_versions::promoted_from_version_id.eq(Some(source.id)),
                document_versions::updated_at.eq(Utc::now().naive_utc()),
            ))
            .get_result(conn)?;
        let reset = approvals::reset_to_pending(conn, converted.id)?;

        AuditRecord::for_version(&source, audit::ACTION_PROMOTED_TO_PRODUCTION)
            .performed_by(Some(actor.user_id))
            .details(json!({
                "production_document_number": converted.document_number,
                "production_version_id": converted.id,
                "strategy": PromotionStrategy::Convert.as_str(),
            }))
            .write(conn)?;
        AuditRecord::for_version(&converted, audit::ACTION_PROMOTION_CONVERTED)
            .performed_by(Some(actor.user_id))
            .details(json!({
                "source_document_number": source.document_number,
                "source_version": source.version,
                "source_version_id": source.id,
                "approvers_reset": reset,
            }))
            .write(conn)?;

        info!(
            source_document_number = %source.document_number,
            version_id = %converted.id,
            document_number = %converted.document_number,
            "production draft converted from prototype"
        );
        Ok(PromotionOutcome {
            version: converted,
            strategy: Some(PromotionStrategy::Convert),
            replaced_version_id: Some(stale_id),
            storage_keys: Vec::new(),
        })
    })
}
