//! The digest queue capability.

use async_trait::async_trait;
use formflow_core::types::{DbId, Timestamp};
use formflow_db::models::notification::{CreatePendingNotification, DueNotification};
use formflow_db::repositories::PendingNotificationRepo;
use formflow_db::DbPool;

/// Durable store of notifications waiting for their digest.
///
/// Only the scheduler enqueues and only the digest dispatcher marks sent.
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// Queue a batch atomically.
    async fn enqueue(&self, batch: &[CreatePendingNotification]) -> Result<(), sqlx::Error>;

    /// Unsent entries scheduled at or before `now`.
    async fn due(&self, now: Timestamp) -> Result<Vec<DueNotification>, sqlx::Error>;

    /// Mark a whole dispatch group sent in one write.
    async fn mark_sent(&self, ids: &[DbId]) -> Result<u64, sqlx::Error>;
}

/// Postgres-backed queue over `pending_notifications`.
#[derive(Clone)]
pub struct PgNotificationQueue {
    pool: DbPool,
}

impl PgNotificationQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationQueue for PgNotificationQueue {
    async fn enqueue(&self, batch: &[CreatePendingNotification]) -> Result<(), sqlx::Error> {
        let ids = PendingNotificationRepo::create_batch(&self.pool, batch).await?;
        tracing::debug!(count = ids.len(), "Notifications queued for digest");
        Ok(())
    }

    async fn due(&self, now: Timestamp) -> Result<Vec<DueNotification>, sqlx::Error> {
        PendingNotificationRepo::list_due(&self.pool, now).await
    }

    async fn mark_sent(&self, ids: &[DbId]) -> Result<u64, sqlx::Error> {
        PendingNotificationRepo::mark_sent(&self.pool, ids).await
    }
}

/// In-memory queue and recording mailer shared by this crate's tests.
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;
    use crate::delivery::{DeliveryError, Mailer};
    use crate::messages::OutboundMessage;

    #[derive(Default)]
    pub struct MemoryQueue {
        pub entries: Mutex<Vec<(DueNotification, bool)>>,
        pub fail_enqueue: bool,
        pub next_id: Mutex<DbId>,
        /// How many upcoming `mark_sent` calls fail.
        pub fail_mark_sent: Mutex<usize>,
    }

    impl MemoryQueue {
        pub fn push(&self, item: DueNotification) {
            self.entries.lock().unwrap().push((item, false));
        }

        pub fn sent_ids(&self) -> Vec<DbId> {
            self.entries
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, sent)| *sent)
                .map(|(n, _)| n.id)
                .collect()
        }

        pub fn len(&self) -> usize {
            self.entries.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl NotificationQueue for MemoryQueue {
        async fn enqueue(&self, batch: &[CreatePendingNotification]) -> Result<(), sqlx::Error> {
            if self.fail_enqueue {
                return Err(sqlx::Error::PoolTimedOut);
            }
            let mut next = self.next_id.lock().unwrap();
            let mut entries = self.entries.lock().unwrap();
            for item in batch {
                *next += 1;
                entries.push((
                    DueNotification {
                        id: *next,
                        notification_type: item.kind.as_str().to_string(),
                        recipient_email: item.recipient_email.clone(),
                        scheduled_for: item.scheduled_for,
                        workflow_id: item.workflow_id,
                        form_name: "Form".to_string(),
                        submission_id: item.submission_id,
                        approval_task_id: item.approval_task_id,
                        step_name: None,
                        submitter_name: None,
                        submitted_at: None,
                    },
                    false,
                ));
            }
            Ok(())
        }

        async fn due(&self, now: Timestamp) -> Result<Vec<DueNotification>, sqlx::Error> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .iter()
                .filter(|(n, sent)| !*sent && n.scheduled_for <= now)
                .map(|(n, _)| n.clone())
                .collect())
        }

        async fn mark_sent(&self, ids: &[DbId]) -> Result<u64, sqlx::Error> {
            {
                let mut failures = self.fail_mark_sent.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(sqlx::Error::PoolTimedOut);
                }
            }
            let mut marked = 0;
            for (n, sent) in self.entries.lock().unwrap().iter_mut() {
                if ids.contains(&n.id) && !*sent {
                    *sent = true;
                    marked += 1;
                }
            }
            Ok(marked)
        }
    }

    /// Records every message; fails for addresses in `failing`.
    #[derive(Default)]
    pub struct RecordingMailer {
        pub sent: Mutex<Vec<OutboundMessage>>,
        pub failing: Vec<String>,
    }

    impl RecordingMailer {
        pub fn failing_for(address: &str) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                failing: vec![address.to_string()],
            }
        }

        pub fn messages(&self) -> Vec<OutboundMessage> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, message: &OutboundMessage) -> Result<(), DeliveryError> {
            if self.failing.contains(&message.to) {
                return Err(DeliveryError::Unavailable("connection refused".to_string()));
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }
}
