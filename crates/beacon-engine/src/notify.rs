//! Notification dispatch
//!
//! The dispatcher records every attempt before handing its intent to an
//! unbounded queue. A separate task drains the queue into a
//! [`DeliverySink`]; sink failures are logged and never retried here.

use crate::{stamp, EngineError};
use beacon_domain::{
    Alert, AttemptId, AttemptStatus, ChannelAttempt, Clock, DeliveryIntent,
    NotificationPreference, RiskStore,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Failure reported by a delivery sink
#[derive(Error, Debug)]
pub enum SinkError {
    /// The channel rejected or could not reach the recipient
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// The sink is not available
    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

/// External delivery mechanism (mail relay, SMS gateway, dashboard feed)
///
/// Called from a blocking task, so implementations may block.
pub trait DeliverySink: Send + Sync {
    /// Deliver one intent
    fn deliver(&self, intent: &DeliveryIntent) -> Result<(), SinkError>;
}

/// Sink that only logs intents
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DeliverySink for LogSink {
    fn deliver(&self, intent: &DeliveryIntent) -> Result<(), SinkError> {
        tracing::info!(
            attempt = %intent.attempt_id,
            alert = %intent.alert_id,
            recipient = %intent.recipient,
            channel = intent.channel.as_str(),
            subject = %intent.subject,
            "Notification delivered"
        );
        Ok(())
    }
}

/// Sending half of the delivery queue
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    tx: mpsc::UnboundedSender<DeliveryIntent>,
}

impl DeliveryQueue {
    /// Hand an intent to the delivery task
    ///
    /// The attempt is already recorded, so a closed queue is logged rather
    /// than failing the caller.
    pub fn enqueue(&self, intent: DeliveryIntent) {
        let attempt = intent.attempt_id;
        if self.tx.send(intent).is_err() {
            tracing::error!(attempt = %attempt, "Delivery queue closed; intent dropped");
        }
    }
}

/// Create a delivery queue and the receiver for [`run_delivery`]
pub fn delivery_channel() -> (DeliveryQueue, mpsc::UnboundedReceiver<DeliveryIntent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (DeliveryQueue { tx }, rx)
}

/// Drain the queue into `sink` until every sender is dropped
///
/// Returns the number of intents the sink accepted.
pub async fn run_delivery(
    mut rx: mpsc::UnboundedReceiver<DeliveryIntent>,
    sink: Arc<dyn DeliverySink>,
) -> u64 {
    let mut delivered = 0;

    while let Some(intent) = rx.recv().await {
        let attempt = intent.attempt_id;
        let channel = intent.channel;
        let sink = Arc::clone(&sink);

        match tokio::task::spawn_blocking(move || sink.deliver(&intent)).await {
            Ok(Ok(())) => delivered += 1,
            Ok(Err(e)) => tracing::error!(
                attempt = %attempt,
                channel = channel.as_str(),
                error = %e,
                "Delivery failed"
            ),
            Err(e) => tracing::error!(attempt = %attempt, error = %e, "Delivery task panicked"),
        }
    }

    tracing::info!(delivered, "Delivery queue drained");
    delivered
}

/// Turns alerts into per-recipient, per-channel delivery attempts
pub struct NotificationDispatcher {
    store: Arc<dyn RiskStore>,
    queue: DeliveryQueue,
    clock: Arc<dyn Clock>,
}

impl NotificationDispatcher {
    /// Create a dispatcher feeding `queue`
    pub fn new(store: Arc<dyn RiskStore>, queue: DeliveryQueue, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            queue,
            clock,
        }
    }

    /// Dispatch an alert to every preference whose minimum severity it meets
    ///
    /// Immediate schedules use the alert's creation instant as the slot and
    /// are queued now; recurring schedules wait for their next slot. A
    /// repeat of an (alert, recipient, channel, slot) key yields a
    /// [`AttemptStatus::Duplicate`] attempt and no delivery.
    pub fn dispatch(
        &self,
        alert: &Alert,
        preferences: &[NotificationPreference],
    ) -> Result<Vec<ChannelAttempt>, EngineError> {
        let now = stamp(self.clock.as_ref());
        let mut attempts = Vec::new();

        for preference in preferences {
            if alert.severity < preference.min_severity {
                continue;
            }

            let (slot, status) = match preference.schedule.next_slot(now) {
                Some(slot) => (slot, AttemptStatus::Scheduled),
                None => (alert.created_at, AttemptStatus::Queued),
            };

            for channel in preference.channels.enabled() {
                let mut attempt = ChannelAttempt {
                    intent: DeliveryIntent {
                        attempt_id: AttemptId::new(),
                        alert_id: alert.id,
                        recipient: preference.recipient.clone(),
                        channel,
                        severity: alert.severity,
                        subject: subject_line(alert),
                        body: alert.message.clone(),
                        slot,
                    },
                    status,
                    recorded_at: now,
                };

                if !self.store.record_attempt(&attempt)? {
                    attempt.status = AttemptStatus::Duplicate;
                } else if status == AttemptStatus::Queued {
                    self.queue.enqueue(attempt.intent.clone());
                }

                tracing::debug!(
                    alert = %alert.id,
                    recipient = %preference.recipient,
                    channel = channel.as_str(),
                    status = attempt.status.as_str(),
                    slot = %slot,
                    "Dispatch attempt recorded"
                );
                attempts.push(attempt);
            }
        }

        Ok(attempts)
    }

    /// Release scheduled attempts whose slot is at or before `now`
    pub fn release_due(&self, now: DateTime<Utc>) -> Result<Vec<ChannelAttempt>, EngineError> {
        let mut released = Vec::new();

        for mut attempt in self.store.due_attempts(now)? {
            self.store.mark_released(attempt.intent.attempt_id, now)?;
            self.queue.enqueue(attempt.intent.clone());
            attempt.status = AttemptStatus::Released;
            released.push(attempt);
        }

        if !released.is_empty() {
            tracing::info!(count = released.len(), "Released scheduled notifications");
        }
        Ok(released)
    }

    /// Release everything due according to the dispatcher's clock
    pub fn release_now(&self) -> Result<Vec<ChannelAttempt>, EngineError> {
        self.release_due(stamp(self.clock.as_ref()))
    }
}

fn subject_line(alert: &Alert) -> String {
    format!(
        "[{}] {} alert for {}",
        alert.severity.as_str(),
        alert.alert_type.as_str(),
        alert.subject_key()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_domain::{AlertId, AlertSeverity, Channel};
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct Recording {
        seen: Mutex<Vec<AttemptId>>,
        fail: bool,
    }

    impl DeliverySink for Recording {
        fn deliver(&self, intent: &DeliveryIntent) -> Result<(), SinkError> {
            self.seen.lock().unwrap().push(intent.attempt_id);
            if self.fail {
                return Err(SinkError::Delivery("gateway timeout".to_string()));
            }
            Ok(())
        }
    }

    fn intent() -> DeliveryIntent {
        DeliveryIntent {
            attempt_id: AttemptId::new(),
            alert_id: AlertId::new(),
            recipient: "counselor".to_string(),
            channel: Channel::Email,
            severity: AlertSeverity::High,
            subject: "subject".to_string(),
            body: "body".to_string(),
            slot: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_delivery_task_drains_queue() {
        let (queue, rx) = delivery_channel();
        let sink = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
            fail: false,
        });
        let task = tokio::spawn(run_delivery(rx, sink.clone()));

        queue.enqueue(intent());
        queue.enqueue(intent());
        drop(queue);

        assert_eq!(task.await.unwrap(), 2);
        assert_eq!(sink.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_sink_failures_are_not_retried() {
        let (queue, rx) = delivery_channel();
        let sink = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
            fail: true,
        });
        let task = tokio::spawn(run_delivery(rx, sink.clone()));

        queue.enqueue(intent());
        drop(queue);

        assert_eq!(task.await.unwrap(), 0);
        assert_eq!(sink.seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_closed_queue_does_not_panic() {
        let (queue, rx) = delivery_channel();
        drop(rx);
        queue.enqueue(intent());
    }
}
