//! Administrative corrections that bypass the transition table.
//!
//! Overrides still keep the data consistent: labels stay well formed,
//! `(tenant, document number, version)` stays unique and a lineage never ends
//! up with two released versions. Every override is audited with high
//! severity, refused ones included.

use chrono::Utc;
use diesel::dsl::count_star;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use super::labels::{ensure_scheme, VersionLabel};
use super::{
    find_version, label_race, lock_lineage, lock_version, Actor, EngineError, EngineResult,
    VersionStatus,
};
use crate::audit::{self, AuditRecord};
use crate::models::DocumentVersion;
use crate::schema::document_versions;

const FIELD_STATUS: &str = "status";
const FIELD_VERSION: &str = "version";
const FIELD_DOCUMENT_NUMBER: &str = "document_number";
const FIELD_PRODUCTION: &str = "is_production";

struct Applied {
    from: Value,
    to: Value,
    version: DocumentVersion,
}

/// Checks the `PREFIX-NNNNN` shape of a document number.
pub fn validate_document_number(value: &str) -> EngineResult<String> {
    let value = value.trim();
    let valid = match value.split_once('-') {
        Some((prefix, digits)) => {
            (2..=10).contains(&prefix.len())
                && prefix.bytes().all(|b| b.is_ascii_uppercase())
                && digits.len() == 5
                && digits.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    };
    if valid {
        Ok(value.to_string())
    } else {
        Err(EngineError::InvalidInput(format!(
            "document number '{value}' must look like PREFIX-00001"
        )))
    }
}

fn apply_override<F>(
    conn: &mut PgConnection,
    actor: &Actor,
    version_id: Uuid,
    field: &'static str,
    requested: Value,
    apply: F,
) -> EngineResult<DocumentVersion>
where
    F: FnOnce(&mut PgConnection, DocumentVersion) -> EngineResult<Applied>,
{
    let result = conn.transaction(|conn| {
        actor.ensure_admin("override document versions")?;
        let version = lock_version(conn, actor, version_id)?;
        let Applied { from, to, version } = apply(conn, version)?;

        AuditRecord::for_version(&version, audit::ACTION_ADMIN_OVERRIDE)
            .high_severity()
            .performed_by(Some(actor.user_id))
            .details(json!({ "field": field, "from": from, "to": to }))
            .write(conn)?;

        info!(
            version_id = %version.id,
            document_number = %version.document_number,
            field,
            from = %from,
            to = %to,
            "administrative override applied"
        );
        Ok(version)
    });

    if let Err(err) = &result {
        record_attempt(conn, actor, version_id, field, &requested, err);
    }
    result
}

/// Writes the refused override on its own once the transaction has rolled
/// back. Failures here are logged and otherwise ignored.
fn record_attempt(
    conn: &mut PgConnection,
    actor: &Actor,
    version_id: Uuid,
    field: &'static str,
    requested: &Value,
    err: &EngineError,
) {
    warn!(
        version_id = %version_id,
        user_id = %actor.user_id,
        field,
        error = %err,
        "administrative override refused"
    );

    let version = match find_version(conn, actor, version_id) {
        Ok(version) => version,
        Err(_) => return,
    };
    let written = AuditRecord::for_version(&version, audit::ACTION_ADMIN_OVERRIDE_ATTEMPTED)
        .high_severity()
        .performed_by(Some(actor.user_id))
        .details(json!({
            "field": field,
            "requested": requested,
            "error": err.to_string(),
        }))
        .write(conn);
    if let Err(audit_err) = written {
        warn!(version_id = %version_id, error = %audit_err, "failed to audit refused override");
    }
}

fn released_sibling(lineage: &[DocumentVersion], exclude: Uuid) -> Option<&DocumentVersion> {
    lineage
        .iter()
        .find(|row| row.id != exclude && row.status == VersionStatus::Released.as_str())
}

pub fn force_status(
    conn: &mut PgConnection,
    actor: &Actor,
    version_id: Uuid,
    to: VersionStatus,
) -> EngineResult<DocumentVersion> {
    apply_override(conn, actor, version_id, FIELD_STATUS, json!(to.as_str()), |conn, version| {
        let from = version.current_status()?;
        if from == to {
            return Err(EngineError::InvalidInput(format!(
                "{} {} is already {to}",
                version.document_number, version.version
            )));
        }

        let now = Utc::now().naive_utc();
        let updated: DocumentVersion = if to == VersionStatus::Released {
            let lineage = lock_lineage(conn, version.tenant_id, &version.document_number)?;
            if let Some(other) = released_sibling(&lineage, version.id) {
                return Err(EngineError::InvalidState(format!(
                    "{} {} is already released; obsolete it first",
                    other.document_number, other.version
                )));
            }
            diesel::update(document_versions::table.find(version.id))
                .set((
                    document_versions::status.eq(to.as_str()),
                    document_versions::released_by.eq(Some(actor.user_id)),
                    document_versions::released_at.eq(Some(now)),
                    document_versions::updated_at.eq(now),
                ))
                .get_result(conn)?
        } else {
            diesel::update(document_versions::table.find(version.id))
                .set((
                    document_versions::status.eq(to.as_str()),
                    document_versions::updated_at.eq(now),
                ))
                .get_result(conn)?
        };

        Ok(Applied {
            from: json!(from.as_str()),
            to: json!(to.as_str()),
            version: updated,
        })
    })
}

fn ensure_label_free(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    document_number: &str,
    label: &str,
    exclude: Uuid,
) -> EngineResult<()> {
    let taken: i64 = document_versions::table
        .filter(document_versions::tenant_id.eq(tenant_id))
        .filter(document_versions::document_number.eq(document_number))
        .filter(document_versions::version.eq(label))
        .filter(document_versions::id.ne(exclude))
        .select(count_star())
        .first(conn)?;
    if taken > 0 {
        return Err(EngineError::InvalidInput(format!(
            "{document_number} {label} already exists"
        )));
    }
    Ok(())
}

pub fn force_version(
    conn: &mut PgConnection,
    actor: &Actor,
    version_id: Uuid,
    label: &str,
) -> EngineResult<DocumentVersion> {
    let label = label.trim().to_string();
    apply_override(conn, actor, version_id, FIELD_VERSION, json!(label), |conn, version| {
        let parsed = VersionLabel::parse(&label)?;
        ensure_scheme(&parsed, version.is_production)?;
        if version.version == label {
            return Err(EngineError::InvalidInput(format!(
                "{} is already labelled {label}",
                version.document_number
            )));
        }
        ensure_label_free(conn, version.tenant_id, &version.document_number, &label, version.id)?;

        let updated: DocumentVersion = diesel::update(document_versions::table.find(version.id))
            .set((
                document_versions::version.eq(&label),
                document_versions::updated_at.eq(Utc::now().naive_utc()),
            ))
            .get_result(conn)
            .map_err(label_race)?;

        Ok(Applied {
            from: json!(version.version),
            to: json!(label),
            version: updated,
        })
    })
}

pub fn force_document_number(
    conn: &mut PgConnection,
    actor: &Actor,
    version_id: Uuid,
    document_number: &str,
) -> EngineResult<DocumentVersion> {
    let requested = document_number.trim().to_string();
    apply_override(
        conn,
        actor,
        version_id,
        FIELD_DOCUMENT_NUMBER,
        json!(requested),
        |conn, version| {
            let target = validate_document_number(&requested)?;
            if version.document_number == target {
                return Err(EngineError::InvalidInput(format!(
                    "version already belongs to {target}"
                )));
            }
            ensure_label_free(conn, version.tenant_id, &target, &version.version, version.id)?;

            let target_lineage = lock_lineage(conn, version.tenant_id, &target)?;
            if version.status == VersionStatus::Released.as_str() {
                if let Some(other) = released_sibling(&target_lineage, version.id) {
                    return Err(EngineError::InvalidState(format!(
                        "{} {} is already released",
                        other.document_number, other.version
                    )));
                }
            }
            if let Some(other) = target_lineage.first() {
                if other.is_production != version.is_production {
                    return Err(EngineError::InvalidInput(format!(
                        "{target} is a {} lineage",
                        if other.is_production { "production" } else { "prototype" }
                    )));
                }
            }

            let updated: DocumentVersion =
                diesel::update(document_versions::table.find(version.id))
                    .set((
                        document_versions::document_number.eq(&target),
                        document_versions::updated_at.eq(Utc::now().naive_utc()),
                    ))
                    .get_result(conn)
                    .map_err(label_race)?;

            Ok(Applied {
                from: json!(version.document_number),
                to: json!(target),
                version: updated,
            })
        },
    )
}

/// Flips the production flag. The current label, or `relabel` when given,
/// has to belong to the new family.
pub fn force_production(
    conn: &mut PgConnection,
    actor: &Actor,
    version_id: Uuid,
    is_production: bool,
    relabel: Option<&str>,
) -> EngineResult<DocumentVersion> {
    let relabel = relabel.map(|label| label.trim().to_string());
    let requested = json!({ "is_production": is_production, "version": relabel });
    apply_override(conn, actor, version_id, FIELD_PRODUCTION, requested, |conn, version| {
        if version.is_production == is_production {
            return Err(EngineError::InvalidInput(format!(
                "{} {} already has is_production = {is_production}",
                version.document_number, version.version
            )));
        }

        let label = relabel.clone().unwrap_or_else(|| version.version.clone());
        let parsed = VersionLabel::parse(&label)?;
        ensure_scheme(&parsed, is_production)?;
        if label != version.version {
            ensure_label_free(conn, version.tenant_id, &version.document_number, &label, version.id)?;
        }

        let updated: DocumentVersion = diesel::update(document_versions::table.find(version.id))
            .set((
                document_versions::is_production.eq(is_production),
                document_versions::version.eq(&label),
                document_versions::updated_at.eq(Utc::now().naive_utc()),
            ))
            .get_result(conn)
            .map_err(label_race)?;

        Ok(Applied {
            from: json!({ "is_production": version.is_production, "version": version.version }),
            to: json!({ "is_production": is_production, "version": label }),
            version: updated,
        })
    })
}
