mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, id_of, read_json, TestApp, TestUser};
use serde_json::{json, Value};
use uuid::Uuid;

async fn override_field(
    app: &TestApp,
    user: &TestUser,
    version_id: Uuid,
    field: &str,
    payload: Value,
) -> Result<(StatusCode, Value)> {
    let response = app
        .post_json(
            &format!("/api/admin/versions/{version_id}/{field}"),
            &payload,
            Some(&user.token),
        )
        .await?;
    read_json(response).await
}

#[tokio::test]
async fn overrides_require_admin_and_are_audited() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let tenant_id = app.insert_tenant("Acme").await?;
    let admin = app.user(tenant_id, "admin", "admin").await?;
    let owner = app.user(tenant_id, "owner", "member").await?;

    let type_id = app.create_document_type(&admin, "FORM").await?;
    let created = app.create_document(&owner, type_id, "Calibration log", false).await?;
    let version_id = id_of(&created)?;
    let (status, _) = app.release(&owner, version_id).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        override_field(&app, &owner, version_id, "status", json!({ "status": "draft" })).await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
    assert_eq!(app.version(&owner, version_id).await?["status"], "released");

    let (status, body) =
        override_field(&app, &admin, version_id, "status", json!({ "status": "released" }))
            .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) =
        override_field(&app, &admin, version_id, "status", json!({ "status": "draft" })).await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "draft");

    let events = app.audit_events("FORM-00001").await?;
    let attempts: Vec<_> = events
        .iter()
        .filter(|event| event.action == "admin_override_attempted")
        .collect();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].performed_by, Some(owner.id));
    assert_eq!(attempts[0].severity, "high");
    assert_eq!(attempts[0].details["field"], "status");
    assert_eq!(attempts[0].details["requested"], "draft");

    let applied = events
        .iter()
        .find(|event| event.action == "admin_override")
        .expect("override audit");
    assert_eq!(applied.severity, "high");
    assert_eq!(applied.performed_by, Some(admin.id));
    assert_eq!(applied.details["from"], "released");
    assert_eq!(applied.details["to"], "draft");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn overrides_keep_labels_and_lineages_consistent() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let tenant_id = app.insert_tenant("Acme").await?;
    let admin = app.user(tenant_id, "admin", "admin").await?;
    let owner = app.user(tenant_id, "owner", "member").await?;

    let type_id = app.create_document_type(&admin, "FORM").await?;
    let first = app.create_document(&owner, type_id, "Pest control", false).await?;
    let first_id = id_of(&first)?;
    let (status, _) = app.release(&owner, first_id).await?;
    assert_eq!(status, StatusCode::OK);
    let second = app.new_version(&owner, "FORM-00001").await?;
    let second_id = id_of(&second)?;

    let (status, body) =
        override_field(&app, &admin, second_id, "version", json!({ "version": "v2" })).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) =
        override_field(&app, &admin, second_id, "version", json!({ "version": "vA" })).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) =
        override_field(&app, &admin, second_id, "version", json!({ "version": "vD" })).await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["version"], "vD");

    // forcing a second released version into the lineage is refused
    let (status, body) =
        override_field(&app, &admin, second_id, "status", json!({ "status": "released" }))
            .await?;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    let (status, body) = override_field(
        &app,
        &admin,
        second_id,
        "document-number",
        json!({ "document_number": "FORM-7" }),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) = override_field(
        &app,
        &admin,
        second_id,
        "document-number",
        json!({ "document_number": "FORM-00042" }),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["document_number"], "FORM-00042");

    let (status, body) = override_field(
        &app,
        &admin,
        second_id,
        "production",
        json!({ "is_production": true }),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) = override_field(
        &app,
        &admin,
        second_id,
        "production",
        json!({ "is_production": true, "version": "v1" }),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["is_production"], true);
    assert_eq!(body["version"], "v1");

    let next = app.new_version(&owner, "FORM-00042").await?;
    assert_eq!(next["version"], "v2");
    assert_eq!(next["is_production"], true);

    app.cleanup().await?;
    Ok(())
}
