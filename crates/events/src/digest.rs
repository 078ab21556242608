//! Digest dispatcher.
//!
//! [`DigestDispatcher`] runs as a background task, periodically collecting
//! queued notifications whose scheduled time has passed and sending one
//! digest per (recipient, notification type, workflow). A group is marked
//! sent only after its digest was delivered; failed groups stay queued and
//! are retried on the next tick. A failure on one group never stops the
//! others.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use formflow_core::types::{DbId, Timestamp};
use formflow_db::models::notification::DueNotification;
use tokio_util::sync::CancellationToken;

use crate::delivery::Mailer;
use crate::messages::MessageRenderer;
use crate::queue::NotificationQueue;

/// Default polling period when none is configured.
pub const DEFAULT_DIGEST_INTERVAL: Duration = Duration::from_secs(3600);

/// Counts from one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DigestReport {
    pub digests_sent: usize,
    pub notifications_marked: u64,
    /// Groups left queued because the send or the mark-sent write failed.
    pub groups_failed: usize,
}

// ---------------------------------------------------------------------------
// DigestDispatcher
// ---------------------------------------------------------------------------

/// Background service that flushes due digest notifications.
pub struct DigestDispatcher {
    queue: Arc<dyn NotificationQueue>,
    mailer: Arc<dyn Mailer>,
    renderer: Arc<MessageRenderer>,
    interval: Duration,
}

impl DigestDispatcher {
    pub fn new(
        queue: Arc<dyn NotificationQueue>,
        mailer: Arc<dyn Mailer>,
        renderer: Arc<MessageRenderer>,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            mailer,
            renderer,
            interval,
        }
    }

    /// Run the dispatcher loop.
    ///
    /// The loop exits gracefully when the provided [`CancellationToken`] is
    /// cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Digest dispatcher cancelled");
                    break;
                }
                _ = interval.tick() => {
                    match self.dispatch_due(Utc::now()).await {
                        Ok(report) if report != DigestReport::default() => {
                            tracing::info!(
                                digests_sent = report.digests_sent,
                                notifications_marked = report.notifications_marked,
                                groups_failed = report.groups_failed,
                                "Processed digest deliveries"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Failed to process digests"),
                    }
                }
            }
        }
    }

    /// Send every digest due at `now`.
    pub async fn dispatch_due(&self, now: Timestamp) -> Result<DigestReport, sqlx::Error> {
        let due = self.queue.due(now).await?;
        let mut report = DigestReport::default();

        for ((recipient, notification_type, workflow_id), items) in group(due) {
            let ids: Vec<DbId> = items.iter().map(|n| n.id).collect();
            let kind = match items[0].kind() {
                Ok(kind) => kind,
                Err(e) => {
                    // Nothing can render it; retire the group so it is not fetched forever.
                    tracing::warn!(
                        recipient = %recipient,
                        notification_type = %notification_type,
                        count = ids.len(),
                        error = %e,
                        "Discarding digest group with unknown type"
                    );
                    if let Some(marked) = self.mark_group(&recipient, workflow_id, &ids).await {
                        report.notifications_marked += marked;
                    } else {
                        report.groups_failed += 1;
                    }
                    continue;
                }
            };

            let message = self
                .renderer
                .digest(&recipient, kind, &items[0].form_name, &items);
            if let Err(e) = self.mailer.send(&message).await {
                report.groups_failed += 1;
                tracing::warn!(
                    recipient = %recipient,
                    workflow_id,
                    count = items.len(),
                    error = %e,
                    "Failed to send digest, will retry"
                );
                continue;
            }

            report.digests_sent += 1;
            match self.mark_group(&recipient, workflow_id, &ids).await {
                Some(marked) => {
                    report.notifications_marked += marked;
                    tracing::debug!(recipient = %recipient, workflow_id, count = ids.len(), "Digest delivered");
                }
                None => report.groups_failed += 1,
            }
        }

        Ok(report)
    }

    /// Mark one group sent. A failed write is logged and leaves the whole
    /// group queued.
    async fn mark_group(&self, recipient: &str, workflow_id: DbId, ids: &[DbId]) -> Option<u64> {
        match self.queue.mark_sent(ids).await {
            Ok(marked) => Some(marked),
            Err(e) => {
                tracing::error!(
                    recipient = %recipient,
                    workflow_id,
                    count = ids.len(),
                    error = %e,
                    "Failed to mark digest group sent"
                );
                None
            }
        }
    }
}

type GroupKey = (String, String, DbId);

fn group(due: Vec<DueNotification>) -> BTreeMap<GroupKey, Vec<DueNotification>> {
    let mut groups: BTreeMap<GroupKey, Vec<DueNotification>> = BTreeMap::new();
    for item in due {
        let key = (
            item.recipient_email.clone(),
            item.notification_type.clone(),
            item.workflow_id,
        );
        groups.entry(key).or_default().push(item);
    }
    groups
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
