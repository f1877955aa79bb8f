//! Fire-and-forget signals for the notification collaborator.
//!
//! The workflow enqueues a [`Notification`] inside its own transaction; the
//! worker binary later hands each one to a [`NotificationSink`]. Delivery
//! timing and recipient preferences belong to the sink.

use anyhow::{Context, Result};
use async_trait::async_trait;
use diesel::pg::PgConnection;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::jobs::{enqueue_job, JobQueueResult, JOB_DELIVER_NOTIFICATION};
use crate::models::DocumentVersion;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub tenant_id: Uuid,
    pub version_id: Uuid,
    pub document_number: String,
    pub version: String,
    pub title: String,
}

impl From<&DocumentVersion> for DocumentRef {
    fn from(version: &DocumentVersion) -> Self {
        Self {
            tenant_id: version.tenant_id,
            version_id: version.id,
            document_number: version.document_number.clone(),
            version: version.version.clone(),
            title: version.title.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    ApproverAssigned {
        document: DocumentRef,
        approver_id: Uuid,
    },
    DocumentRejected {
        document: DocumentRef,
        recipient_id: Uuid,
        rejected_by: Uuid,
        comment: String,
    },
    ApprovalCompleted {
        document: DocumentRef,
        recipient_id: Uuid,
    },
    DocumentReleased {
        document: DocumentRef,
        released_by: Uuid,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::ApproverAssigned { .. } => "approver_assigned",
            Notification::DocumentRejected { .. } => "document_rejected",
            Notification::ApprovalCompleted { .. } => "approval_completed",
            Notification::DocumentReleased { .. } => "document_released",
        }
    }

    pub fn document(&self) -> &DocumentRef {
        match self {
            Notification::ApproverAssigned { document, .. }
            | Notification::DocumentRejected { document, .. }
            | Notification::ApprovalCompleted { document, .. }
            | Notification::DocumentReleased { document, .. } => document,
        }
    }
}

pub fn enqueue(conn: &mut PgConnection, notification: &Notification) -> JobQueueResult<()> {
    let payload = serde_json::to_value(notification)?;
    enqueue_job(conn, JOB_DELIVER_NOTIFICATION, payload, None)?;
    Ok(())
}

#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn deliver(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log; used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &Notification) -> Result<()> {
        let document = notification.document();
        info!(
            kind = notification.kind(),
            tenant_id = %document.tenant_id,
            document_number = %document.document_number,
            version = %document.version,
            "notification"
        );
        Ok(())
    }
}

/// Posts each notification as JSON to an HTTP endpoint.
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn deliver(&self, notification: &Notification) -> Result<()> {
        self.client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .context("failed to reach notification webhook")?
            .error_for_status()
            .context("notification webhook rejected the request")?;
        Ok(())
    }
}
