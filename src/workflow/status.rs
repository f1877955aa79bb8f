//! The transition table and the operations that move versions through it.
//!
//! | from        | to          | trigger           | precondition                    |
//! |-------------|-------------|-------------------|---------------------------------|
//! | draft       | in_approval | submit            | an approver, or production      |
//! | draft       | released    | release directly  | prototype without approvers     |
//! | in_approval | released    | approval complete | every approver approved         |
//! | in_approval | draft       | rejection         | an approver rejected            |
//! | released    | obsolete    | superseded        | immediate successor released    |

use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::approvals::{self, ApprovalSummary};
use super::labels::VersionLabeler;
use super::{
    illegal, lock_lineage, lock_version, obsolescence, set_status, Actor, EngineResult,
    VersionStatus,
};
use crate::audit::{self, AuditRecord};
use crate::models::DocumentVersion;
use crate::notifications::{self, Notification};
use crate::schema::document_versions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Submit,
    ReleaseDirect,
    ApprovalCompleted,
    Rejection,
    Superseded,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionContext {
    pub is_production: bool,
    pub approvers: ApprovalSummary,
}

/// Decides whether `from → to` is legal for the given trigger.
pub fn check(
    from: VersionStatus,
    to: VersionStatus,
    trigger: Trigger,
    context: &TransitionContext,
) -> EngineResult<()> {
    use VersionStatus::*;

    match (from, to, trigger) {
        (Draft, InApproval, Trigger::Submit) => {
            if context.approvers.total == 0 && !context.is_production {
                return Err(illegal(
                    from,
                    to,
                    "prototype versions need at least one approver to be submitted",
                ));
            }
            Ok(())
        }
        (Draft, Released, Trigger::ReleaseDirect) => {
            if context.is_production {
                return Err(illegal(
                    from,
                    to,
                    "production versions must be approved before release",
                ));
            }
            if context.approvers.total > 0 {
                return Err(illegal(
                    from,
                    to,
                    "versions with approvers must be submitted for approval",
                ));
            }
            Ok(())
        }
        (InApproval, Released, Trigger::ApprovalCompleted) => {
            if !context.approvers.is_fully_approved() {
                return Err(illegal(from, to, "not every approver has approved"));
            }
            Ok(())
        }
        (InApproval, Draft, Trigger::Rejection) => {
            if !context.approvers.has_rejection() {
                return Err(illegal(from, to, "no approver has rejected"));
            }
            Ok(())
        }
        (Released, Obsolete, Trigger::Superseded) => Ok(()),
        _ => Err(illegal(from, to, "transition is not permitted")),
    }
}

/// Moves a draft into approval, optionally attaching more approvers first.
/// Every approver starts the new cycle as pending.
///
/// A production version may enter approval with nobody assigned; it then
/// waits there until approvers are added with [`approvals::assign`].
pub fn submit_for_approval(
    conn: &mut PgConnection,
    actor: &Actor,
    version_id: Uuid,
    approver_ids: &[Uuid],
) -> EngineResult<DocumentVersion> {
    conn.transaction(|conn| {
        let version = lock_version(conn, actor, version_id)?;
        actor.ensure_owner_or_admin(&version, "submit this version for approval")?;

        let from = version.current_status()?;
        if from != VersionStatus::Draft {
            return Err(illegal(
                from,
                VersionStatus::InApproval,
                "only draft versions can be submitted",
            ));
        }

        if !approver_ids.is_empty() {
            approvals::add_approvers(conn, actor, &version, approver_ids)?;
        }
        approvals::reset_to_pending(conn, version.id)?;

        let rows = approvals::load_approvers(conn, version.id)?;
        let context = TransitionContext {
            is_production: version.is_production,
            approvers: ApprovalSummary::from_rows(&rows)?,
        };
        check(from, VersionStatus::InApproval, Trigger::Submit, &context)?;

        let submitted = set_status(conn, &version, VersionStatus::InApproval)?;
        let approver_ids: Vec<Uuid> = rows.iter().map(|row| row.user_id).collect();

        AuditRecord::for_version(&submitted, audit::ACTION_SUBMITTED)
            .performed_by(Some(actor.user_id))
            .details(json!({ "approvers": approver_ids }))
            .write(conn)?;
        for approver_id in approver_ids {
            notifications::enqueue(
                conn,
                &Notification::ApproverAssigned {
                    document: (&submitted).into(),
                    approver_id,
                },
            )?;
        }

        info!(
            version_id = %submitted.id,
            document_number = %submitted.document_number,
            version = %submitted.version,
            "version submitted for approval"
        );
        Ok(submitted)
    })
}

/// Releases a prototype draft that has no approvers.
pub fn release_directly(
    conn: &mut PgConnection,
    actor: &Actor,
    version_id: Uuid,
) -> EngineResult<DocumentVersion> {
    conn.transaction(|conn| {
        let version = lock_version(conn, actor, version_id)?;
        actor.ensure_owner_or_admin(&version, "release this version")?;

        let context = TransitionContext {
            is_production: version.is_production,
            approvers: approvals::summarize(conn, version.id)?,
        };
        check(
            version.current_status()?,
            VersionStatus::Released,
            Trigger::ReleaseDirect,
            &context,
        )?;

        release(conn, &version, actor.user_id)
    })
}

/// Marks `version` released and supersedes its predecessor. Must run inside
/// the caller's transaction with the version row locked.
pub(crate) fn release(
    conn: &mut PgConnection,
    version: &DocumentVersion,
    released_by: Uuid,
) -> EngineResult<DocumentVersion> {
    let from = version.current_status()?;
    let lineage = lock_lineage(conn, version.tenant_id, &version.document_number)?;
    let predecessor = VersionLabeler::predecessor(
        &version.version,
        lineage
            .iter()
            .filter(|sibling| sibling.id != version.id)
            .map(|sibling| sibling.version.as_str()),
    )?;

    let blocking = lineage.iter().find(|sibling| {
        sibling.id != version.id
            && sibling.status == VersionStatus::Released.as_str()
            && Some(sibling.version.as_str()) != predecessor
    });
    if let Some(blocking) = blocking {
        return Err(illegal(
            from,
            VersionStatus::Released,
            format!(
                "{} {} is released and is not the immediate predecessor of {}",
                blocking.document_number, blocking.version, version.version
            ),
        ));
    }

    // The predecessor is demoted before this row flips so the partial unique
    // index on released rows never sees two of them.
    let obsoleted = obsolescence::on_released(conn, version, &lineage, Some(released_by))?;

    let now = Utc::now().naive_utc();
    let released: DocumentVersion = diesel::update(document_versions::table.find(version.id))
        .set((
            document_versions::status.eq(VersionStatus::Released.as_str()),
            document_versions::released_by.eq(Some(released_by)),
            document_versions::released_at.eq(Some(now)),
            document_versions::updated_at.eq(now),
        ))
        .get_result(conn)?;

    AuditRecord::for_version(&released, audit::ACTION_RELEASED)
        .performed_by(Some(released_by))
        .details(json!({
            "previous_status": from.as_str(),
            "obsoleted_version_id": obsoleted.as_ref().map(|v| v.id),
        }))
        .write(conn)?;
    notifications::enqueue(
        conn,
        &Notification::DocumentReleased {
            document: (&released).into(),
            released_by,
        },
    )?;

    info!(
        version_id = %released.id,
        document_number = %released.document_number,
        version = %released.version,
        "version released"
    );
    Ok(released)
}
