use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{BackendStore, CounterField, EngagementTotals, EventFilter, InsertOutcome};
use crate::types::{
    DeliveryLog, DeviceIdentity, DeviceProfile, NewNotification, NotificationClick,
    ClickAction, NotificationEvent, NotificationEventType, NotificationRecord, NotificationStatus,
    RecipientFilter, Signal, SilentAuditRecord,
};

#[derive(Default)]
struct MemoryState {
    profiles: HashMap<String, DeviceProfile>,
    notifications: Vec<NotificationRecord>,
    events: Vec<NotificationEvent>,
    event_keys: HashSet<(String, Uuid, NotificationEventType)>,
    clicks: Vec<NotificationClick>,
    click_keys: HashSet<(Uuid, String, ClickAction, DateTime<Utc>)>,
    delivery_logs: Vec<DeliveryLog>,
    audit: Vec<SilentAuditRecord>,
    signals: Vec<Signal>,
}

/// Process-local `BackendStore`, used for demo mode and as a test fixture.
///
/// Every operation runs under one lock, which gives the same atomicity the
/// Postgres store gets from single-statement updates.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_audit_writes: AtomicBool,
    failing_event_writes: AtomicU32,
    audit_latency_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    /// Makes subsequent audit inserts fail, for exercising degraded paths.
    pub fn inject_audit_failure(&self, fail: bool) {
        self.fail_audit_writes.store(fail, Ordering::SeqCst);
    }

    /// Delays every audit insert by `latency`, for observing long passes.
    pub fn inject_audit_latency(&self, latency: Duration) {
        self.audit_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Makes the next `count` event or click writes fail before touching any
    /// state, like a rolled-back transaction.
    pub fn inject_event_failures(&self, count: u32) {
        self.failing_event_writes.store(count, Ordering::SeqCst);
    }

    fn take_event_failure(&self) -> Result<(), StoreError> {
        let failed = self
            .failing_event_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::Unavailable("event write rolled back".to_string()));
        }
        Ok(())
    }

    pub fn insert_signal(&self, signal: Signal) -> Result<(), StoreError> {
        self.state()?.signals.push(signal);
        Ok(())
    }

    pub fn audit_records(&self) -> Vec<SilentAuditRecord> {
        self.state().map(|s| s.audit.clone()).unwrap_or_default()
    }

    pub fn delivery_logs(&self) -> Vec<DeliveryLog> {
        self.state().map(|s| s.delivery_logs.clone()).unwrap_or_default()
    }
}

impl MemoryState {
    fn notification_mut(&mut self, id: Uuid) -> Result<&mut NotificationRecord, StoreError> {
        self.notifications
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("notification {}", id)))
    }

    fn record_event(&mut self, event: &NotificationEvent) -> Result<InsertOutcome, StoreError> {
        self.notification_mut(event.notification_id)?;
        let key = (
            event.user_identity.clone(),
            event.notification_id,
            event.event_type,
        );
        if !self.event_keys.insert(key) {
            return Ok(InsertOutcome::Duplicate);
        }
        self.events.push(event.clone());

        let record = self.notification_mut(event.notification_id)?;
        match CounterField::from(event.event_type) {
            CounterField::ViewCount => record.view_count += 1,
            CounterField::ClickCount => record.click_count += 1,
        }
        if event.event_type == NotificationEventType::Clicked
            && !record.clicked_user_ids.contains(&event.user_identity)
        {
            record.clicked_user_ids.push(event.user_identity.clone());
        }
        Ok(InsertOutcome::Inserted)
    }
}

fn newest_first_limit<T: Clone>(items: impl DoubleEndedIterator<Item = T>, limit: i64) -> Vec<T> {
    items.rev().take(limit.max(0) as usize).collect()
}

#[async_trait]
impl BackendStore for MemoryStore {
    async fn upsert_profile(&self, profile: &DeviceProfile) -> Result<(), StoreError> {
        let mut state = self.state()?;
        state
            .profiles
            .insert(profile.identity.as_str().to_string(), profile.clone());
        Ok(())
    }

    async fn get_profile(&self, identity: &DeviceIdentity) -> Result<Option<DeviceProfile>, StoreError> {
        Ok(self.state()?.profiles.get(identity.as_str()).cloned())
    }

    async fn profiles_with_tokens(&self, filter: &RecipientFilter) -> Result<Vec<DeviceProfile>, StoreError> {
        let state = self.state()?;
        let mut profiles: Vec<DeviceProfile> = state
            .profiles
            .values()
            .filter(|p| p.delivery_token.is_some())
            .filter(|p| match filter {
                RecipientFilter::All => true,
                RecipientFilter::User(user) => p.identity.as_str() == user,
                RecipientFilter::Devices(ids) => ids.iter().any(|id| id == p.identity.as_str()),
            })
            .cloned()
            .collect();
        profiles.sort_by(|a, b| a.identity.as_str().cmp(b.identity.as_str()));
        Ok(profiles)
    }

    async fn insert_notification(&self, new: &NewNotification) -> Result<NotificationRecord, StoreError> {
        let record = NotificationRecord {
            id: Uuid::new_v4(),
            kind: new.kind,
            title: new.title.clone(),
            message: new.message.clone(),
            data: new.data.clone(),
            target_user: new.target_user.clone(),
            status: NotificationStatus::Pending,
            view_count: 0,
            click_count: 0,
            clicked_user_ids: Vec::new(),
            created_at: Utc::now(),
            sent_at: None,
        };
        self.state()?.notifications.push(record.clone());
        Ok(record)
    }

    async fn get_notification(&self, id: Uuid) -> Result<Option<NotificationRecord>, StoreError> {
        Ok(self
            .state()?
            .notifications
            .iter()
            .find(|n| n.id == id)
            .cloned())
    }

    async fn update_notification_status(
        &self,
        id: Uuid,
        status: NotificationStatus,
        sent_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let record = state
            .notifications
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("notification {}", id)))?;
        record.status = status;
        record.sent_at = Some(sent_at);
        Ok(())
    }

    async fn list_notifications(&self, limit: i64) -> Result<Vec<NotificationRecord>, StoreError> {
        let state = self.state()?;
        Ok(newest_first_limit(state.notifications.iter().cloned(), limit))
    }

    async fn engagement_totals(&self) -> Result<EngagementTotals, StoreError> {
        let state = self.state()?;
        Ok(state
            .notifications
            .iter()
            .fold(EngagementTotals::default(), |mut acc, n| {
                acc.total_notifications += 1;
                acc.total_clicks += i64::from(n.click_count);
                acc.total_views += i64::from(n.view_count);
                acc
            }))
    }

    async fn insert_delivery_log(&self, log: &DeliveryLog) -> Result<(), StoreError> {
        self.state()?.delivery_logs.push(log.clone());
        Ok(())
    }

    async fn record_event(&self, event: &NotificationEvent) -> Result<InsertOutcome, StoreError> {
        self.take_event_failure()?;
        self.state()?.record_event(event)
    }

    async fn list_events(&self, filter: &EventFilter, limit: i64) -> Result<Vec<NotificationEvent>, StoreError> {
        let state = self.state()?;
        let matching = state.events.iter().filter(|e| {
            filter.notification_id.map_or(true, |id| e.notification_id == id)
                && filter
                    .user_identity
                    .as_deref()
                    .map_or(true, |u| e.user_identity == u)
        });
        Ok(newest_first_limit(matching.cloned().collect::<Vec<_>>().into_iter(), limit))
    }

    async fn record_click(&self, click: &NotificationClick) -> Result<InsertOutcome, StoreError> {
        self.take_event_failure()?;
        let mut state = self.state()?;
        state.notification_mut(click.notification_id)?;
        let key = (
            click.notification_id,
            click.user_identity.clone(),
            click.action,
            click.clicked_at,
        );
        if !state.click_keys.insert(key) {
            return Ok(InsertOutcome::Duplicate);
        }
        state.clicks.push(click.clone());
        state.record_event(&click.to_event())
    }

    async fn list_clicks(&self, notification_id: Uuid) -> Result<Vec<NotificationClick>, StoreError> {
        let state = self.state()?;
        Ok(state
            .clicks
            .iter()
            .filter(|c| c.notification_id == notification_id)
            .cloned()
            .collect())
    }

    async fn insert_silent_audit(&self, record: &SilentAuditRecord) -> Result<(), StoreError> {
        let latency = self.audit_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.fail_audit_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("audit log rejected write".to_string()));
        }
        self.state()?.audit.push(record.clone());
        Ok(())
    }

    async fn recent_signals(&self, limit: i64) -> Result<Vec<Signal>, StoreError> {
        let state = self.state()?;
        let mut signals = state.signals.clone();
        signals.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        signals.truncate(limit.max(0) as usize);
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NotificationKind, Platform};

    fn new_notification() -> NewNotification {
        NewNotification {
            kind: NotificationKind::Signal,
            title: "XAU/USD BUY".to_string(),
            message: "Entry 2315.40".to_string(),
            data: None,
            target_user: None,
        }
    }

    fn clicked(user: &str, id: Uuid) -> NotificationEvent {
        NotificationEvent {
            user_identity: user.to_string(),
            notification_id: id,
            event_type: NotificationEventType::Clicked,
            event_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_event_is_reported_not_raised() {
        let store = MemoryStore::new();
        let record = store.insert_notification(&new_notification()).await.unwrap();
        let event = clicked("device_1_abc", record.id);

        assert_eq!(store.record_event(&event).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.record_event(&event).await.unwrap(), InsertOutcome::Duplicate);

        let viewed = NotificationEvent {
            event_type: NotificationEventType::Viewed,
            ..event
        };
        assert_eq!(store.record_event(&viewed).await.unwrap(), InsertOutcome::Inserted);

        let stored = store.get_notification(record.id).await.unwrap().unwrap();
        assert_eq!(stored.click_count, 1);
        assert_eq!(stored.view_count, 1);
    }

    #[tokio::test]
    async fn test_clicked_users_are_deduplicated() {
        let store = MemoryStore::new();
        let record = store.insert_notification(&new_notification()).await.unwrap();

        for user in ["a", "a", "b"] {
            store.record_event(&clicked(user, record.id)).await.unwrap();
        }

        let stored = store.get_notification(record.id).await.unwrap().unwrap();
        assert_eq!(stored.clicked_user_ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(stored.click_count, 2);
    }

    #[tokio::test]
    async fn test_replayed_click_is_stored_once() {
        let store = MemoryStore::new();
        let record = store.insert_notification(&new_notification()).await.unwrap();
        let click = NotificationClick {
            notification_id: record.id,
            user_identity: "a".to_string(),
            action: ClickAction::OpenChart,
            clicked_at: Utc::now(),
            platform: Platform::Ios,
            deep_link: None,
        };

        assert_eq!(store.record_click(&click).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.record_click(&click).await.unwrap(), InsertOutcome::Duplicate);

        // another action by the same user is a new click row but not a new event
        let share = NotificationClick {
            action: ClickAction::Share,
            ..click
        };
        assert_eq!(store.record_click(&share).await.unwrap(), InsertOutcome::Duplicate);

        assert_eq!(store.list_clicks(record.id).await.unwrap().len(), 2);
        let stored = store.get_notification(record.id).await.unwrap().unwrap();
        assert_eq!(stored.click_count, 1);
    }

    #[tokio::test]
    async fn test_failed_event_write_changes_nothing() {
        let store = MemoryStore::new();
        let record = store.insert_notification(&new_notification()).await.unwrap();
        store.inject_event_failures(1);

        let event = clicked("a", record.id);
        assert!(matches!(
            store.record_event(&event).await.unwrap_err(),
            StoreError::Unavailable(_)
        ));
        assert_eq!(store.record_event(&event).await.unwrap(), InsertOutcome::Inserted);

        let stored = store.get_notification(record.id).await.unwrap().unwrap();
        assert_eq!(stored.click_count, 1);
        assert_eq!(stored.clicked_user_ids, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_profiles_with_tokens_respects_filter() {
        let store = MemoryStore::new();
        for (id, token) in [("device_a", Some("tok-a")), ("device_b", None), ("device_c", Some("tok-c"))] {
            store
                .upsert_profile(&DeviceProfile {
                    identity: DeviceIdentity::new(id),
                    delivery_token: token.map(str::to_string),
                    platform: Platform::Web,
                    app_version: "1.0.0".to_string(),
                    last_active: Utc::now(),
                })
                .await
                .unwrap();
        }

        let all = store.profiles_with_tokens(&RecipientFilter::All).await.unwrap();
        assert_eq!(all.len(), 2);

        let one = store
            .profiles_with_tokens(&RecipientFilter::User("device_c".to_string()))
            .await
            .unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].delivery_token.as_deref(), Some("tok-c"));
    }

    #[tokio::test]
    async fn test_event_on_missing_notification_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .record_event(&clicked("a", Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
