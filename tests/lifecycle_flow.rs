mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::http::StatusCode;
use common::{acquire_db_lock, id_of, read_json, TestApp};
use doccontrol::notifications::{Notification, NotificationSink};
use doccontrol::{default_handlers, Worker};
use serde_json::{json, Value};
use tokio::sync::Mutex;

fn actions(events: &Value) -> Vec<String> {
    events
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|event| event["action"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn prototype_form_lifecycle() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let tenant_id = app.insert_tenant("Acme").await?;
    let admin = app.user(tenant_id, "admin", "admin").await?;
    let owner = app.user(tenant_id, "owner", "member").await?;
    let reviewer_a = app.user(tenant_id, "reviewer-a", "member").await?;
    let reviewer_b = app.user(tenant_id, "reviewer-b", "member").await?;

    let form_type = app.create_document_type(&admin, "FORM").await?;

    let first = app
        .create_document(&owner, form_type, "Incoming inspection form", false)
        .await?;
    assert_eq!(first["document_number"], "FORM-00001");
    assert_eq!(first["version"], "vA");
    assert_eq!(first["status"], "draft");
    let first_id = id_of(&first)?;

    let (status, released) = app.release(&owner, first_id).await?;
    assert_eq!(status, StatusCode::OK, "{released}");
    assert_eq!(released["status"], "released");
    assert_eq!(released["released_by"], json!(owner.id));

    let second = app.new_version(&owner, "FORM-00001").await?;
    assert_eq!(second["version"], "vB");
    assert_eq!(second["status"], "draft");
    assert_eq!(second["title"], "Incoming inspection form");
    let second_id = id_of(&second)?;

    let (status, submitted) = app
        .submit(&owner, second_id, &[reviewer_a.id, reviewer_b.id])
        .await?;
    assert_eq!(status, StatusCode::OK, "{submitted}");
    assert_eq!(submitted["status"], "in_approval");

    let (status, outcome) = app.decide(&reviewer_a, second_id, "approved", None).await?;
    assert_eq!(status, StatusCode::OK, "{outcome}");
    assert_eq!(outcome["released"], false);
    assert_eq!(outcome["version"]["status"], "in_approval");

    let (status, outcome) = app
        .decide(&reviewer_b, second_id, "approved", Some("looks good"))
        .await?;
    assert_eq!(status, StatusCode::OK, "{outcome}");
    assert_eq!(outcome["released"], true);
    assert_eq!(outcome["version"]["status"], "released");
    assert_eq!(outcome["version"]["released_by"], json!(reviewer_b.id));

    let first_now = app.version(&owner, first_id).await?;
    assert_eq!(first_now["status"], "obsolete");

    let response = app.get("/api/documents/FORM-00001", Some(&owner.token)).await?;
    let (status, detail) = read_json(response).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["released_version_id"], json!(second_id));
    assert_eq!(detail["versions"].as_array().map(Vec::len), Some(2));

    let response = app
        .get("/api/documents/FORM-00001/audit", Some(&owner.token))
        .await?;
    let (status, events) = read_json(response).await?;
    assert_eq!(status, StatusCode::OK);
    let recorded = actions(&events);
    for expected in [
        "created",
        "released",
        "version_created",
        "submitted",
        "approved",
        "obsoleted",
    ] {
        assert!(
            recorded.iter().any(|action| action == expected),
            "missing {expected} in {recorded:?}"
        );
    }
    assert_eq!(
        recorded.iter().filter(|action| *action == "released").count(),
        2
    );

    let obsoleted = app
        .audit_events("FORM-00001")
        .await?
        .into_iter()
        .find(|event| event.action == "obsoleted")
        .expect("obsoleted event");
    assert_eq!(obsoleted.document_version_id, Some(first_id));
    assert_eq!(obsoleted.details["superseded_by_version"], "vB");

    let jobs = app.jobs_by_type("deliver-notification").await?;
    let kinds: Vec<&str> = jobs
        .iter()
        .filter_map(|job| job.payload["kind"].as_str())
        .collect();
    assert_eq!(
        kinds.iter().filter(|kind| **kind == "approver_assigned").count(),
        2
    );
    assert!(kinds.contains(&"approval_completed"));
    assert_eq!(
        kinds.iter().filter(|kind| **kind == "document_released").count(),
        2
    );

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn release_and_submission_guards() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let tenant_id = app.insert_tenant("Acme").await?;
    let admin = app.user(tenant_id, "admin", "admin").await?;
    let owner = app.user(tenant_id, "owner", "member").await?;
    let stranger = app.user(tenant_id, "stranger", "member").await?;
    let reviewer = app.user(tenant_id, "reviewer", "member").await?;

    let sop_type = app.create_document_type(&admin, "SOP").await?;

    let production = app
        .create_document(&owner, sop_type, "Cleaning procedure", true)
        .await?;
    assert_eq!(production["version"], "v1");
    let production_id = id_of(&production)?;

    let (status, body) = app.release(&owner, production_id).await?;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    let (status, body) = app.submit(&stranger, production_id, &[reviewer.id]).await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");

    let prototype = app
        .create_document(&owner, sop_type, "Draft procedure", false)
        .await?;
    assert_eq!(prototype["document_number"], "SOP-00002");
    let prototype_id = id_of(&prototype)?;

    let (status, body) = app.release(&stranger, prototype_id).await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "{body}");

    // prototypes have the direct release path, so submitting needs an approver
    let (status, body) = app.submit(&owner, prototype_id, &[]).await?;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    let (status, body) = app.submit(&owner, prototype_id, &[reviewer.id]).await?;
    assert_eq!(status, StatusCode::OK, "{body}");

    // a version with approvers goes through the approval path only
    let (status, body) = app.release(&owner, prototype_id).await?;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    let response = app
        .patch_json(
            &format!("/api/versions/{prototype_id}"),
            &json!({ "title": "Renamed" }),
            Some(&owner.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let (status, body) = app.decide(&stranger, prototype_id, "approved", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND, "{body}");

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn inactive_document_types_refuse_new_documents() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let tenant_id = app.insert_tenant("Acme").await?;
    let admin = app.user(tenant_id, "admin", "admin").await?;
    let member = app.user(tenant_id, "member", "member").await?;

    let response = app
        .post_json(
            "/api/document-types",
            &json!({ "prefix": "WI", "name": "Work instructions" }),
            Some(&member.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .post_json(
            "/api/document-types",
            &json!({ "prefix": "wi", "name": "Work instructions" }),
            Some(&admin.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let type_id = app.create_document_type(&admin, "WI").await?;
    let response = app
        .patch_json(
            &format!("/api/document-types/{type_id}"),
            &json!({ "is_active": false }),
            Some(&admin.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .post_json(
            "/api/documents",
            &json!({ "document_type_id": type_id, "title": "Nope" }),
            Some(&member.token),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = app.get("/api/document-types", Some(&member.token)).await?;
    let (_, listed) = read_json(response).await?;
    assert_eq!(listed.as_array().map(Vec::len), Some(0));

    let response = app
        .get("/api/document-types?include_inactive=true", Some(&member.token))
        .await?;
    let (_, listed) = read_json(response).await?;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    app.cleanup().await?;
    Ok(())
}

#[derive(Default)]
struct RecordingSink {
    delivered: Mutex<Vec<Notification>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, notification: &Notification) -> Result<()> {
        self.delivered.lock().await.push(notification.clone());
        Ok(())
    }
}

#[tokio::test]
async fn worker_delivers_queued_notifications() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let tenant_id = app.insert_tenant("Acme").await?;
    let admin = app.user(tenant_id, "admin", "admin").await?;
    let owner = app.user(tenant_id, "owner", "member").await?;
    let reviewer = app.user(tenant_id, "reviewer", "member").await?;

    let type_id = app.create_document_type(&admin, "FORM").await?;
    let created = app.create_document(&owner, type_id, "Checklist", false).await?;
    let version_id = id_of(&created)?;
    let (status, _) = app.submit(&owner, version_id, &[reviewer.id]).await?;
    assert_eq!(status, StatusCode::OK);

    let sink = Arc::new(RecordingSink::default());
    let worker = Worker::new(
        app.state.pool.clone(),
        default_handlers(sink.clone()),
        Duration::from_millis(10),
    );
    while worker.tick().await? {}

    let delivered = sink.delivered.lock().await;
    assert_eq!(delivered.len(), 1);
    match &delivered[0] {
        Notification::ApproverAssigned {
            document,
            approver_id,
        } => {
            assert_eq!(*approver_id, reviewer.id);
            assert_eq!(document.version_id, version_id);
        }
        other => panic!("unexpected notification {other:?}"),
    }
    drop(delivered);

    let jobs = app.jobs_by_type("deliver-notification").await?;
    assert!(jobs.iter().all(|job| job.status == "succeeded"));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn successive_releases_obsolete_only_the_predecessor() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let tenant_id = app.insert_tenant("Acme").await?;
    let admin = app.user(tenant_id, "admin", "admin").await?;
    let owner = app.user(tenant_id, "owner", "member").await?;
    let type_id = app.create_document_type(&admin, "FORM").await?;

    let mut ids = Vec::new();
    let first = app.create_document(&owner, type_id, "Sampling plan", false).await?;
    ids.push(id_of(&first)?);
    let (status, _) = app.release(&owner, ids[0]).await?;
    assert_eq!(status, StatusCode::OK);

    for _ in 0..2 {
        let next = app.new_version(&owner, "FORM-00001").await?;
        let next_id = id_of(&next)?;
        let (status, body) = app.release(&owner, next_id).await?;
        assert_eq!(status, StatusCode::OK, "{body}");
        ids.push(next_id);
    }

    let mut statuses = Vec::new();
    for id in &ids {
        statuses.push(app.version(&owner, *id).await?["status"].clone());
    }
    assert_eq!(statuses, vec![json!("obsolete"), json!("obsolete"), json!("released")]);

    let obsoleted: Vec<_> = app
        .audit_events("FORM-00001")
        .await?
        .into_iter()
        .filter(|event| event.action == "obsoleted")
        .collect();
    assert_eq!(obsoleted.len(), 2);
    assert_eq!(obsoleted[0].document_version_id, Some(ids[0]));
    assert_eq!(obsoleted[1].document_version_id, Some(ids[1]));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn sibling_drafts_release_in_label_order() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let tenant_id = app.insert_tenant("Acme").await?;
    let admin = app.user(tenant_id, "admin", "admin").await?;
    let owner = app.user(tenant_id, "owner", "member").await?;

    let type_id = app.create_document_type(&admin, "WI").await?;
    let first = app.create_document(&owner, type_id, "Press setup", false).await?;
    let first_id = id_of(&first)?;
    let (status, _) = app.release(&owner, first_id).await?;
    assert_eq!(status, StatusCode::OK);

    let second_id = id_of(&app.new_version(&owner, "WI-00001").await?)?;
    let third_id = id_of(&app.new_version(&owner, "WI-00001").await?)?;

    // vB still sits between vA and vC
    let (status, body) = app.release(&owner, third_id).await?;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert_eq!(app.version(&owner, first_id).await?["status"], "released");

    let (status, body) = app.release(&owner, second_id).await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(app.version(&owner, first_id).await?["status"], "obsolete");

    let (status, body) = app.release(&owner, third_id).await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(app.version(&owner, second_id).await?["status"], "obsolete");
    assert_eq!(app.version(&owner, third_id).await?["status"], "released");

    app.cleanup().await?;
    Ok(())
}
