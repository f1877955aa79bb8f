use std::collections::HashSet;

use chrono::Utc;
use diesel::dsl::count_star;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use super::status::{self, Trigger, TransitionContext};
use super::{lock_version, set_status, Actor, ApproverStatus, EngineError, EngineResult, VersionStatus};
use crate::audit::{self, AuditRecord};
use crate::models::{Approver, DocumentVersion, NewApprover};
use crate::notifications::{self, Notification};
use crate::schema::{approvers, users};

/// Counts of approver decisions for one version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApprovalSummary {
    pub total: usize,
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
}

impl ApprovalSummary {
    pub fn from_statuses(statuses: impl IntoIterator<Item = ApproverStatus>) -> Self {
        statuses
            .into_iter()
            .fold(ApprovalSummary::default(), |mut summary, status| {
                summary.total += 1;
                match status {
                    ApproverStatus::Pending => summary.pending += 1,
                    ApproverStatus::Approved => summary.approved += 1,
                    ApproverStatus::Rejected => summary.rejected += 1,
                }
                summary
            })
    }

    pub fn from_rows(rows: &[Approver]) -> EngineResult<Self> {
        let statuses = rows
            .iter()
            .map(Approver::decision)
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(Self::from_statuses(statuses))
    }

    /// A rejection outranks any number of approvals.
    pub fn is_fully_approved(&self) -> bool {
        self.total > 0 && self.approved == self.total && !self.has_rejection()
    }

    pub fn has_rejection(&self) -> bool {
        self.rejected > 0
    }
}

pub fn is_fully_approved(rows: &[Approver]) -> EngineResult<bool> {
    Ok(ApprovalSummary::from_rows(rows)?.is_fully_approved())
}

pub fn has_rejection(rows: &[Approver]) -> EngineResult<bool> {
    Ok(ApprovalSummary::from_rows(rows)?.has_rejection())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
}

#[derive(Debug)]
pub struct DecisionOutcome {
    pub version: DocumentVersion,
    pub approver: Approver,
    pub released: bool,
}

pub fn load_approvers(conn: &mut PgConnection, version_id: Uuid) -> EngineResult<Vec<Approver>> {
    Ok(approvers::table
        .filter(approvers::document_version_id.eq(version_id))
        .order(approvers::created_at.asc())
        .load(conn)?)
}

pub fn summarize(conn: &mut PgConnection, version_id: Uuid) -> EngineResult<ApprovalSummary> {
    let rows = load_approvers(conn, version_id)?;
    ApprovalSummary::from_rows(&rows)
}

/// Attaches approvers to a draft, or to a production version that entered
/// approval with nobody assigned. In the second case the new approvers are
/// notified straight away.
pub fn assign(
    conn: &mut PgConnection,
    actor: &Actor,
    version_id: Uuid,
    user_ids: &[Uuid],
) -> EngineResult<Vec<Approver>> {
    conn.transaction(|conn| {
        let version = lock_version(conn, actor, version_id)?;
        actor.ensure_owner_or_admin(&version, "assign approvers")?;
        add_approvers(conn, actor, &version, user_ids)?;

        if version.current_status()? == VersionStatus::InApproval {
            for approver_id in user_ids {
                notifications::enqueue(
                    conn,
                    &Notification::ApproverAssigned {
                        document: (&version).into(),
                        approver_id: *approver_id,
                    },
                )?;
            }
        }
        load_approvers(conn, version.id)
    })
}

/// Whether approvers may be added to `version` right now.
pub fn accepts_approvers(
    status: VersionStatus,
    is_production: bool,
    current: &ApprovalSummary,
) -> bool {
    match status {
        VersionStatus::Draft => true,
        VersionStatus::InApproval => is_production && current.total == 0,
        VersionStatus::Released | VersionStatus::Obsolete => false,
    }
}

/// Inserts pending approver rows; the caller holds the version lock.
pub(crate) fn add_approvers(
    conn: &mut PgConnection,
    actor: &Actor,
    version: &DocumentVersion,
    user_ids: &[Uuid],
) -> EngineResult<()> {
    let current = version.current_status()?;
    if !accepts_approvers(current, version.is_production, &summarize(conn, version.id)?) {
        return Err(EngineError::InvalidState(format!(
            "approvers can only be added to drafts or to production versions awaiting their first approvers, {} {} is {current}",
            version.document_number, version.version
        )));
    }
    if user_ids.is_empty() {
        return Err(EngineError::InvalidInput(
            "at least one approver is required".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for user_id in user_ids {
        if !seen.insert(*user_id) {
            return Err(EngineError::DuplicateApprover(*user_id));
        }
    }

    let already_assigned: Vec<Uuid> = approvers::table
        .filter(approvers::document_version_id.eq(version.id))
        .filter(approvers::user_id.eq_any(user_ids))
        .select(approvers::user_id)
        .load(conn)?;
    if let Some(existing) = already_assigned.first() {
        return Err(EngineError::DuplicateApprover(*existing));
    }

    let known_users: i64 = users::table
        .filter(users::id.eq_any(user_ids))
        .filter(users::tenant_id.eq(actor.tenant_id))
        .select(count_star())
        .first(conn)?;
    if known_users != user_ids.len() as i64 {
        return Err(EngineError::NotFound("approver user"));
    }

    let rows: Vec<NewApprover> = user_ids
        .iter()
        .map(|user_id| NewApprover {
            id: Uuid::new_v4(),
            document_version_id: version.id,
            user_id: *user_id,
            status: ApproverStatus::Pending.as_str().to_string(),
        })
        .collect();
    diesel::insert_into(approvers::table)
        .values(&rows)
        .execute(conn)?;

    AuditRecord::for_version(version, audit::ACTION_APPROVERS_ASSIGNED)
        .performed_by(Some(actor.user_id))
        .details(json!({ "approvers": user_ids }))
        .write(conn)?;

    info!(
        version_id = %version.id,
        document_number = %version.document_number,
        count = user_ids.len(),
        "assigned approvers"
    );
    Ok(())
}

pub fn unassign(
    conn: &mut PgConnection,
    actor: &Actor,
    version_id: Uuid,
    user_id: Uuid,
) -> EngineResult<()> {
    conn.transaction(|conn| {
        let version = lock_version(conn, actor, version_id)?;
        actor.ensure_owner_or_admin(&version, "remove approvers")?;
        let current = version.current_status()?;
        if current != VersionStatus::Draft {
            return Err(EngineError::InvalidState(format!(
                "approvers can only be removed while the version is draft, it is {current}"
            )));
        }

        let removed = diesel::delete(
            approvers::table
                .filter(approvers::document_version_id.eq(version.id))
                .filter(approvers::user_id.eq(user_id)),
        )
        .execute(conn)?;
        if removed == 0 {
            return Err(EngineError::NotFound("approver"));
        }

        AuditRecord::for_version(&version, audit::ACTION_APPROVER_REMOVED)
            .performed_by(Some(actor.user_id))
            .details(json!({ "approver": user_id }))
            .write(conn)?;
        Ok(())
    })
}

/// Starts a fresh approval cycle: every approver is pending again.
pub(crate) fn reset_to_pending(conn: &mut PgConnection, version_id: Uuid) -> EngineResult<usize> {
    Ok(
        diesel::update(approvers::table.filter(approvers::document_version_id.eq(version_id)))
            .set((
                approvers::status.eq(ApproverStatus::Pending.as_str()),
                approvers::comments.eq(None::<String>),
                approvers::action_date.eq(None::<chrono::NaiveDateTime>),
            ))
            .execute(conn)?,
    )
}

/// Records the acting user's decision on a version awaiting approval.
///
/// A rejection sends the version back to draft. The approval that completes
/// the set releases the version in the same transaction; the version row lock
/// makes sure only one concurrent decision can do that.
pub fn decide(
    conn: &mut PgConnection,
    actor: &Actor,
    version_id: Uuid,
    decision: Decision,
    comment: Option<&str>,
) -> EngineResult<DecisionOutcome> {
    let comment = comment.map(str::trim).filter(|c| !c.is_empty());

    conn.transaction(|conn| {
        let version = lock_version(conn, actor, version_id)?;
        if decision == Decision::Rejected && comment.is_none() {
            return Err(EngineError::InvalidInput(
                "a comment is required when rejecting".to_string(),
            ));
        }
        let current = version.current_status()?;
        if current != VersionStatus::InApproval {
            return Err(EngineError::InvalidState(format!(
                "{} {} is not awaiting approval, it is {current}",
                version.document_number, version.version
            )));
        }

        let row: Approver = approvers::table
            .filter(approvers::document_version_id.eq(version.id))
            .filter(approvers::user_id.eq(actor.user_id))
            .first(conn)
            .optional()?
            .ok_or(EngineError::NotFound("approver assignment"))?;
        if row.decision()? != ApproverStatus::Pending {
            return Err(EngineError::InvalidState(
                "a decision has already been recorded for this approval cycle".to_string(),
            ));
        }

        let new_status = match decision {
            Decision::Approved => ApproverStatus::Approved,
            Decision::Rejected => ApproverStatus::Rejected,
        };
        let approver: Approver = diesel::update(approvers::table.find(row.id))
            .set((
                approvers::status.eq(new_status.as_str()),
                approvers::comments.eq(comment),
                approvers::action_date.eq(Some(Utc::now().naive_utc())),
            ))
            .get_result(conn)?;

        let summary = summarize(conn, version.id)?;
        let context = TransitionContext {
            is_production: version.is_production,
            approvers: summary,
        };

        match decision {
            Decision::Rejected => {
                let reason = comment.unwrap_or_default().to_string();
                status::check(current, VersionStatus::Draft, Trigger::Rejection, &context)?;
                let reverted = set_status(conn, &version, VersionStatus::Draft)?;

                AuditRecord::for_version(&reverted, audit::ACTION_REJECTED)
                    .performed_by(Some(actor.user_id))
                    .details(json!({ "reason": reason, "rejected_by": actor.user_id }))
                    .write(conn)?;
                notifications::enqueue(
                    conn,
                    &Notification::DocumentRejected {
                        document: (&reverted).into(),
                        recipient_id: reverted.created_by,
                        rejected_by: actor.user_id,
                        comment: reason,
                    },
                )?;

                info!(
                    version_id = %reverted.id,
                    document_number = %reverted.document_number,
                    "version rejected and returned to draft"
                );
                Ok(DecisionOutcome {
                    version: reverted,
                    approver,
                    released: false,
                })
            }
            Decision::Approved => {
                AuditRecord::for_version(&version, audit::ACTION_APPROVED)
                    .performed_by(Some(actor.user_id))
                    .details(json!({ "comment": comment }))
                    .write(conn)?;

                if !summary.is_fully_approved() {
                    return Ok(DecisionOutcome {
                        version,
                        approver,
                        released: false,
                    });
                }

                status::check(current, VersionStatus::Released, Trigger::ApprovalCompleted, &context)?;
                notifications::enqueue(
                    conn,
                    &Notification::ApprovalCompleted {
                        document: (&version).into(),
                        recipient_id: version.created_by,
                    },
                )?;
                let released = status::release(conn, &version, actor.user_id)?;
                Ok(DecisionOutcome {
                    version: released,
                    approver,
                    released: true,
                })
            }
        }
    })
}
