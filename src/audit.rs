//! Append-only audit trail.
//!
//! Events are written on the caller's connection so they commit or roll back
//! with the change they describe. Rows are never updated except to detach
//! them from a deleted version.

use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::{AuditEvent, DocumentVersion, NewAuditEvent};
use crate::schema::audit_events;

pub const ACTION_CREATED: &str = "created";
pub const ACTION_VERSION_CREATED: &str = "version_created";
pub const ACTION_UPDATED: &str = "updated";
pub const ACTION_APPROVERS_ASSIGNED: &str = "approvers_assigned";
pub const ACTION_APPROVER_REMOVED: &str = "approver_removed";
pub const ACTION_SUBMITTED: &str = "submitted";
pub const ACTION_APPROVED: &str = "approved";
pub const ACTION_REJECTED: &str = "rejected";
pub const ACTION_RELEASED: &str = "released";
pub const ACTION_OBSOLETED: &str = "obsoleted";
pub const ACTION_PROMOTED: &str = "promoted";
pub const ACTION_PROMOTED_TO_PRODUCTION: &str = "promoted_to_production";
pub const ACTION_PROMOTION_CONVERTED: &str = "promotion_converted";
pub const ACTION_DELETED: &str = "deleted";
pub const ACTION_ATTACHMENT_ADDED: &str = "attachment_added";
pub const ACTION_ADMIN_OVERRIDE: &str = "admin_override";
pub const ACTION_ADMIN_OVERRIDE_ATTEMPTED: &str = "admin_override_attempted";

pub const SEVERITY_INFO: &str = "info";
pub const SEVERITY_HIGH: &str = "high";

#[derive(Debug, Clone)]
pub struct AuditRecord {
    tenant_id: Uuid,
    document_version_id: Option<Uuid>,
    document_number: String,
    action: &'static str,
    severity: &'static str,
    performed_by: Option<Uuid>,
    details: Value,
}

impl AuditRecord {
    pub fn new(tenant_id: Uuid, document_number: impl Into<String>, action: &'static str) -> Self {
        Self {
            tenant_id,
            document_version_id: None,
            document_number: document_number.into(),
            action,
            severity: SEVERITY_INFO,
            performed_by: None,
            details: json!({}),
        }
    }

    pub fn for_version(version: &DocumentVersion, action: &'static str) -> Self {
        let mut record = Self::new(version.tenant_id, version.document_number.clone(), action);
        record.document_version_id = Some(version.id);
        record.details = json!({ "version": version.version });
        record
    }

    /// `None` attributes the event to the system.
    pub fn performed_by(mut self, user_id: Option<Uuid>) -> Self {
        self.performed_by = user_id;
        self
    }

    /// Merges object fields into the event details.
    pub fn details(mut self, details: Value) -> Self {
        match (&mut self.details, details) {
            (Value::Object(existing), Value::Object(extra)) => existing.extend(extra),
            (slot, other) => *slot = other,
        }
        self
    }

    pub fn high_severity(mut self) -> Self {
        self.severity = SEVERITY_HIGH;
        self
    }

    pub fn write(self, conn: &mut PgConnection) -> QueryResult<()> {
        let event = NewAuditEvent {
            id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            document_version_id: self.document_version_id,
            document_number: self.document_number,
            action: self.action.to_string(),
            severity: self.severity.to_string(),
            performed_by: self.performed_by,
            details: self.details,
        };
        diesel::insert_into(audit_events::table)
            .values(&event)
            .execute(conn)?;
        Ok(())
    }
}

/// Keeps a deleted version's history by clearing the link instead of the rows.
pub fn detach_version(conn: &mut PgConnection, version_id: Uuid) -> QueryResult<usize> {
    diesel::update(audit_events::table.filter(audit_events::document_version_id.eq(version_id)))
        .set(audit_events::document_version_id.eq(None::<Uuid>))
        .execute(conn)
}

pub fn load_for_version(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    version_id: Uuid,
) -> QueryResult<Vec<AuditEvent>> {
    audit_events::table
        .filter(audit_events::tenant_id.eq(tenant_id))
        .filter(audit_events::document_version_id.eq(version_id))
        .order(audit_events::created_at.asc())
        .load(conn)
}

pub fn load_for_document(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    document_number: &str,
) -> QueryResult<Vec<AuditEvent>> {
    audit_events::table
        .filter(audit_events::tenant_id.eq(tenant_id))
        .filter(audit_events::document_number.eq(document_number))
        .order(audit_events::created_at.asc())
        .load(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_merge_into_defaults() {
        let record = AuditRecord::new(Uuid::nil(), "FORM-00001", ACTION_RELEASED)
            .details(json!({ "version": "vA" }))
            .details(json!({ "released_by": "someone" }));
        assert_eq!(record.details["version"], "vA");
        assert_eq!(record.details["released_by"], "someone");
        assert_eq!(record.severity, SEVERITY_INFO);
    }

    #[test]
    fn high_severity_is_sticky() {
        let record = AuditRecord::new(Uuid::nil(), "FORM-00001", ACTION_ADMIN_OVERRIDE)
            .high_severity()
            .details(json!({ "field": "status" }));
        assert_eq!(record.severity, SEVERITY_HIGH);
    }
}
