use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{JobExecution, JobHandler};
use crate::jobs::{retry_delay, JOB_DELIVER_NOTIFICATION, MAX_ATTEMPTS};
use crate::models::Job;
use crate::notifications::{Notification, NotificationSink};

pub struct DeliverNotificationJob {
    sink: Arc<dyn NotificationSink>,
}

impl DeliverNotificationJob {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl JobHandler for DeliverNotificationJob {
    fn job_type(&self) -> &'static str {
        JOB_DELIVER_NOTIFICATION
    }

    async fn handle(&self, job: Job) -> JobExecution {
        let notification: Notification = match serde_json::from_value(job.payload) {
            Ok(notification) => notification,
            Err(err) => {
                return JobExecution::Failed {
                    error: format!("invalid notification payload: {err}"),
                }
            }
        };

        debug!(
            job_id = %job.id,
            kind = notification.kind(),
            document_number = %notification.document().document_number,
            "delivering notification"
        );

        match self.sink.deliver(&notification).await {
            Ok(()) => JobExecution::Success,
            Err(err) if job.attempts < MAX_ATTEMPTS => JobExecution::Retry {
                delay: retry_delay(job.attempts),
                error: format!("{err:#}"),
            },
            Err(err) => JobExecution::Failed {
                error: format!("giving up after {} attempts: {err:#}", job.attempts),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::anyhow;
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::notifications::DocumentRef;

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<Notification>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn deliver(&self, notification: &Notification) -> anyhow::Result<()> {
            if self.fail {
                return Err(anyhow!("endpoint unavailable"));
            }
            self.delivered.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    fn job_for(notification: &Notification, attempts: i32) -> Job {
        let now = Utc::now().naive_utc();
        Job {
            id: Uuid::new_v4(),
            job_type: JOB_DELIVER_NOTIFICATION.to_string(),
            payload: serde_json::to_value(notification).unwrap(),
            status: "processing".to_string(),
            attempts,
            run_after: now,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn released() -> Notification {
        Notification::DocumentReleased {
            document: DocumentRef {
                tenant_id: Uuid::nil(),
                version_id: Uuid::nil(),
                document_number: "FORM-00001".to_string(),
                version: "vA".to_string(),
                title: "Safety Checklist".to_string(),
            },
            released_by: Uuid::nil(),
        }
    }

    #[tokio::test]
    async fn delivers_through_the_sink() {
        let sink = Arc::new(RecordingSink::default());
        let handler = DeliverNotificationJob::new(sink.clone());
        let result = handler.handle(job_for(&released(), 1)).await;
        assert!(matches!(result, JobExecution::Success));
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retries_then_gives_up() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let handler = DeliverNotificationJob::new(sink);
        let early = handler.handle(job_for(&released(), 1)).await;
        assert!(matches!(early, JobExecution::Retry { .. }));
        let last = handler.handle(job_for(&released(), MAX_ATTEMPTS)).await;
        assert!(matches!(last, JobExecution::Failed { .. }));
    }

    #[tokio::test]
    async fn malformed_payloads_fail_immediately() {
        let handler = DeliverNotificationJob::new(Arc::new(RecordingSink::default()));
        let mut job = job_for(&released(), 1);
        job.payload = serde_json::json!({ "kind": "unknown" });
        assert!(matches!(
            handler.handle(job).await,
            JobExecution::Failed { .. }
        ));
    }
}
