use async_trait::async_trait;
use serde::Serialize;
use signals_core::types::{NotificationClick, NotificationEventType};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::correlator::{Correlator, EventOutcome};
use crate::error::AnalyticsError;

/// Analytics write deferred off the notification path.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalyticsJob {
    Event {
        user_identity: String,
        notification_id: Uuid,
        event_type: NotificationEventType,
    },
    Click(NotificationClick),
}

/// Where queued jobs are applied.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn apply(&self, job: &AnalyticsJob) -> Result<EventOutcome, AnalyticsError>;
}

#[async_trait]
impl AnalyticsSink for Correlator {
    async fn apply(&self, job: &AnalyticsJob) -> Result<EventOutcome, AnalyticsError> {
        match job {
            AnalyticsJob::Event {
                user_identity,
                notification_id,
                event_type,
            } => self.log_event(user_identity, *notification_id, *event_type).await,
            AnalyticsJob::Click(click) => self.log_click(click).await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub recorded: u64,
    pub duplicates: u64,
    pub retried: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl QueueStats {
    /// Jobs that reached a final state.
    pub fn settled(&self) -> u64 {
        self.recorded + self.duplicates + self.failed
    }
}

/// Bounded, non-blocking analytics queue drained by one worker task.
#[derive(Clone)]
pub struct AnalyticsQueue {
    tx: mpsc::Sender<AnalyticsJob>,
    stats: Arc<watch::Sender<QueueStats>>,
}

impl AnalyticsQueue {
    pub fn spawn(
        sink: Arc<dyn AnalyticsSink>,
        capacity: usize,
        policy: RetryPolicy,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (stats_tx, _) = watch::channel(QueueStats::default());
        let stats = Arc::new(stats_tx);

        let worker = tokio::spawn(run_worker(sink, rx, policy, stats.clone()));
        tracing::info!("Analytics queue started (capacity {})", capacity);

        (Self { tx, stats }, worker)
    }

    /// Never waits: a full or closed queue drops the job and counts it.
    pub fn enqueue(&self, job: AnalyticsJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => {
                self.stats.send_modify(|s| s.enqueued += 1);
                true
            }
            Err(e) => {
                tracing::warn!("Analytics job dropped: {}", e);
                self.stats.send_modify(|s| s.dropped += 1);
                false
            }
        }
    }

    pub fn stats(&self) -> QueueStats {
        *self.stats.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueStats> {
        self.stats.subscribe()
    }
}

async fn run_worker(
    sink: Arc<dyn AnalyticsSink>,
    mut rx: mpsc::Receiver<AnalyticsJob>,
    policy: RetryPolicy,
    stats: Arc<watch::Sender<QueueStats>>,
) {
    while let Some(job) = rx.recv().await {
        let mut attempt = 0u32;
        loop {
            match sink.apply(&job).await {
                Ok(EventOutcome::Recorded) => {
                    stats.send_modify(|s| s.recorded += 1);
                    break;
                }
                Ok(EventOutcome::Duplicate) => {
                    stats.send_modify(|s| s.duplicates += 1);
                    break;
                }
                Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                    let delay = policy.delay_for_attempt(attempt);
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        max = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying analytics job"
                    );
                    stats.send_modify(|s| s.retried += 1);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!("Analytics job failed after {} attempts: {}", attempt + 1, e);
                    stats.send_modify(|s| s.failed += 1);
                    break;
                }
            }
        }
    }
    tracing::info!("Analytics queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use signals_core::error::StoreError;
    use signals_core::memory::MemoryStore;
    use signals_core::store::BackendStore;
    use signals_core::types::{ClickAction, NewNotification, NotificationKind, Platform};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySink {
        failures_left: AtomicU32,
        permanent: bool,
        calls: AtomicU32,
    }

    impl FlakySink {
        fn new(failures: u32, permanent: bool) -> Self {
            Self {
                failures_left: AtomicU32::new(failures),
                permanent,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl AnalyticsSink for FlakySink {
        async fn apply(&self, _job: &AnalyticsJob) -> Result<EventOutcome, AnalyticsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.permanent {
                return Err(AnalyticsError::NotFound("notification".to_string()));
            }
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(AnalyticsError::Store(StoreError::Unavailable("down".to_string())));
            }
            Ok(EventOutcome::Recorded)
        }
    }

    fn job() -> AnalyticsJob {
        AnalyticsJob::Event {
            user_identity: "device_1_a".to_string(),
            notification_id: Uuid::new_v4(),
            event_type: NotificationEventType::Viewed,
        }
    }

    async fn settle(queue: &AnalyticsQueue, expected: u64) -> QueueStats {
        let mut rx = queue.subscribe();
        let stats = *rx.wait_for(|s| s.settled() >= expected).await.unwrap();
        stats
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let sink = Arc::new(FlakySink::new(2, false));
        let (queue, _worker) = AnalyticsQueue::spawn(sink.clone(), 8, RetryPolicy::default());

        assert!(queue.enqueue(job()));
        let stats = settle(&queue, 1).await;

        assert_eq!(stats.recorded, 1);
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let sink = Arc::new(FlakySink::new(100, false));
        let policy = RetryPolicy {
            max_retries: 2,
            ..RetryPolicy::default()
        };
        let (queue, _worker) = AnalyticsQueue::spawn(sink.clone(), 8, policy);

        queue.enqueue(job());
        let stats = settle(&queue, 1).await;

        assert_eq!(stats.failed, 1);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let sink = Arc::new(FlakySink::new(0, true));
        let (queue, _worker) = AnalyticsQueue::spawn(sink.clone(), 8, RetryPolicy::default());

        queue.enqueue(job());
        let stats = settle(&queue, 1).await;

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.retried, 0);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retried_click_is_counted_exactly_once() {
        let store = Arc::new(MemoryStore::new());
        let record = store
            .insert_notification(&NewNotification {
                kind: NotificationKind::Signal,
                title: "XAU/USD BUY".to_string(),
                message: "Entry 2315.40".to_string(),
                data: None,
                target_user: None,
            })
            .await
            .unwrap();
        store.inject_event_failures(1);

        let correlator = Arc::new(Correlator::new(store.clone()));
        let (queue, _worker) = AnalyticsQueue::spawn(correlator.clone(), 8, RetryPolicy::default());
        queue.enqueue(AnalyticsJob::Click(NotificationClick {
            notification_id: record.id,
            user_identity: "device_1_a".to_string(),
            action: ClickAction::OpenChart,
            clicked_at: Utc::now(),
            platform: Platform::Android,
            deep_link: None,
        }));
        let stats = settle(&queue, 1).await;

        assert_eq!(stats.retried, 1);
        assert_eq!(stats.recorded, 1);
        assert_eq!(stats.duplicates, 0);

        let stored = store.get_notification(record.id).await.unwrap().unwrap();
        assert_eq!(stored.click_count, 1);
        assert_eq!(stored.clicked_user_ids, vec!["device_1_a".to_string()]);
        assert_eq!(correlator.click_stats(record.id).await.unwrap().total_clicks, 1);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(10));
    }
}
