use diesel::pg::PgConnection;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::labels::VersionLabeler;
use super::status::{self, Trigger, TransitionContext};
use super::{set_status, EngineResult, VersionStatus};
use crate::audit::{self, AuditRecord};
use crate::models::DocumentVersion;

/// Obsoletes the immediate predecessor of `released` when that predecessor is
/// itself released. Older versions are left alone.
///
/// The predecessor is the closest remaining lower label in `lineage`, so a
/// deleted draft between two versions does not break the chain. Runs inside
/// the releasing transaction; the caller already holds the lineage row locks.
pub fn on_released(
    conn: &mut PgConnection,
    released: &DocumentVersion,
    lineage: &[DocumentVersion],
    performed_by: Option<Uuid>,
) -> EngineResult<Option<DocumentVersion>> {
    let siblings = || lineage.iter().filter(|row| row.id != released.id);
    let Some(previous_label) = VersionLabeler::predecessor(
        &released.version,
        siblings().map(|row| row.version.as_str()),
    )?
    else {
        return Ok(None);
    };
    let Some(predecessor) = siblings().find(|row| row.version == previous_label) else {
        return Ok(None);
    };
    let from = predecessor.current_status()?;
    if from != VersionStatus::Released {
        return Ok(None);
    }

    status::check(
        from,
        VersionStatus::Obsolete,
        Trigger::Superseded,
        &TransitionContext::default(),
    )?;
    let obsoleted = set_status(conn, predecessor, VersionStatus::Obsolete)?;

    AuditRecord::for_version(&obsoleted, audit::ACTION_OBSOLETED)
        .performed_by(performed_by)
        .details(json!({
            "superseded_by_version_id": released.id,
            "superseded_by_version": released.version,
        }))
        .write(conn)?;

    info!(
        version_id = %obsoleted.id,
        document_number = %obsoleted.document_number,
        version = %obsoleted.version,
        superseded_by = %released.version,
        "version obsoleted"
    );
    Ok(Some(obsoleted))
}
