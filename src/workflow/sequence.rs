use chrono::Utc;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use tracing::{info, warn};
use uuid::Uuid;

use super::{Actor, EngineError, EngineResult};
use crate::models::DocumentType;
use crate::schema::document_types;

pub const NUMBER_WIDTH: usize = 5;
pub const MAX_NUMBER: i32 = 99_999;
const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub document_type_id: Uuid,
    pub prefix: String,
    pub number: i32,
    pub document_number: String,
}

pub fn format_document_number(prefix: &str, number: i32) -> String {
    format!("{prefix}-{number:0width$}", width = NUMBER_WIDTH)
}

/// Takes the next number from a document type's counter.
///
/// The counter moves in a single `UPDATE … RETURNING` statement that commits
/// on its own, so a number handed out here is never handed out again, even if
/// the caller's later work fails. Only serialization conflicts are retried.
pub fn allocate(
    conn: &mut PgConnection,
    actor: &Actor,
    document_type_id: Uuid,
) -> EngineResult<Allocation> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match try_allocate(conn, actor, document_type_id) {
            Err(EngineError::ConcurrencyConflict) if attempt < MAX_ATTEMPTS => {
                warn!(
                    document_type_id = %document_type_id,
                    attempt,
                    "document number allocation conflicted, retrying"
                );
            }
            other => return other,
        }
    }
}

fn try_allocate(
    conn: &mut PgConnection,
    actor: &Actor,
    document_type_id: Uuid,
) -> EngineResult<Allocation> {
    let bumped: Option<(String, i32)> = diesel::update(
        document_types::table
            .filter(document_types::id.eq(document_type_id))
            .filter(document_types::tenant_id.eq(actor.tenant_id))
            .filter(document_types::is_active.eq(true))
            .filter(document_types::next_number.le(MAX_NUMBER)),
    )
    .set((
        document_types::next_number.eq(document_types::next_number + 1),
        document_types::updated_at.eq(Utc::now().naive_utc()),
    ))
    .returning((document_types::prefix, document_types::next_number))
    .get_result(conn)
    .optional()?;

    if let Some((prefix, next_number)) = bumped {
        let number = next_number - 1;
        let document_number = format_document_number(&prefix, number);
        info!(
            document_type_id = %document_type_id,
            document_number = %document_number,
            "allocated document number"
        );
        return Ok(Allocation {
            document_type_id,
            prefix,
            number,
            document_number,
        });
    }

    let existing: Option<DocumentType> = document_types::table
        .filter(document_types::id.eq(document_type_id))
        .filter(document_types::tenant_id.eq(actor.tenant_id))
        .first(conn)
        .optional()?;

    match existing {
        None => Err(EngineError::NotFound("document type")),
        Some(doc_type) if !doc_type.is_active => Err(EngineError::Inactive(doc_type.prefix)),
        Some(doc_type) => Err(EngineError::SequenceExhausted(format!(
            "document type {} has used all {MAX_NUMBER} numbers",
            doc_type.prefix
        ))),
    }
}
