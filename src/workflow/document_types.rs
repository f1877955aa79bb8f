use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use tracing::info;
use uuid::Uuid;

use super::{Actor, EngineError, EngineResult};
use crate::models::{DocumentType, NewDocumentType};
use crate::schema::document_types;

pub fn validate_prefix(prefix: &str) -> EngineResult<String> {
    let prefix = prefix.trim();
    let valid = (2..=10).contains(&prefix.len()) && prefix.bytes().all(|b| b.is_ascii_uppercase());
    if valid {
        Ok(prefix.to_string())
    } else {
        Err(EngineError::InvalidInput(
            "prefix must be 2 to 10 uppercase letters".to_string(),
        ))
    }
}

pub fn create_document_type(
    conn: &mut PgConnection,
    actor: &Actor,
    prefix: &str,
    name: &str,
) -> EngineResult<DocumentType> {
    actor.ensure_admin("create document types")?;
    let prefix = validate_prefix(prefix)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::InvalidInput("name must not be empty".to_string()));
    }

    let new_type = NewDocumentType {
        id: Uuid::new_v4(),
        tenant_id: actor.tenant_id,
        prefix,
        name: name.to_string(),
    };

    let created: DocumentType = diesel::insert_into(document_types::table)
        .values(&new_type)
        .get_result(conn)
        .map_err(|err| match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                EngineError::InvalidInput(format!(
                    "prefix {} is already in use",
                    new_type.prefix
                ))
            }
            other => EngineError::from(other),
        })?;

    info!(document_type_id = %created.id, prefix = %created.prefix, "created document type");
    Ok(created)
}

pub fn list_document_types(
    conn: &mut PgConnection,
    actor: &Actor,
    include_inactive: bool,
) -> EngineResult<Vec<DocumentType>> {
    let mut query = document_types::table
        .filter(document_types::tenant_id.eq(actor.tenant_id))
        .into_boxed();
    if !include_inactive {
        query = query.filter(document_types::is_active.eq(true));
    }
    Ok(query.order(document_types::prefix.asc()).load(conn)?)
}

pub fn set_document_type_active(
    conn: &mut PgConnection,
    actor: &Actor,
    document_type_id: Uuid,
    is_active: bool,
) -> EngineResult<DocumentType> {
    actor.ensure_admin("change document types")?;
    let updated: Option<DocumentType> = diesel::update(
        document_types::table
            .filter(document_types::id.eq(document_type_id))
            .filter(document_types::tenant_id.eq(actor.tenant_id)),
    )
    .set((
        document_types::is_active.eq(is_active),
        document_types::updated_at.eq(Utc::now().naive_utc()),
    ))
    .get_result(conn)
    .optional()?;

    let updated = updated.ok_or(EngineError::NotFound("document type"))?;
    info!(document_type_id = %updated.id, is_active, "updated document type");
    Ok(updated)
}
