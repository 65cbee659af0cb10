use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{
    DeliveryLog, DeviceIdentity, DeviceProfile, NewNotification, NotificationClick,
    NotificationEvent, NotificationEventType, NotificationRecord, NotificationStatus,
    RecipientFilter, Signal, SilentAuditRecord,
};

/// Result of an insert guarded by a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterField {
    ViewCount,
    ClickCount,
}

impl CounterField {
    pub fn column_name(&self) -> &'static str {
        match self {
            CounterField::ViewCount => "view_count",
            CounterField::ClickCount => "click_count",
        }
    }
}

impl From<NotificationEventType> for CounterField {
    fn from(event_type: NotificationEventType) -> Self {
        match event_type {
            NotificationEventType::Viewed => CounterField::ViewCount,
            NotificationEventType::Clicked => CounterField::ClickCount,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub notification_id: Option<Uuid>,
    pub user_identity: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementTotals {
    pub total_notifications: i64,
    pub total_clicks: i64,
    pub total_views: i64,
}

/// Contract the notification core needs from the managed backend.
///
/// Event writes and their counter effects commit together on the store
/// side; callers never read-modify-write aggregates.
#[async_trait]
pub trait BackendStore: Send + Sync {
    /// Create-or-update keyed on the device identity.
    async fn upsert_profile(&self, profile: &DeviceProfile) -> Result<(), StoreError>;

    async fn get_profile(&self, identity: &DeviceIdentity) -> Result<Option<DeviceProfile>, StoreError>;

    /// Profiles matching `filter` that currently hold a delivery token.
    async fn profiles_with_tokens(&self, filter: &RecipientFilter) -> Result<Vec<DeviceProfile>, StoreError>;

    async fn insert_notification(&self, new: &NewNotification) -> Result<NotificationRecord, StoreError>;

    async fn get_notification(&self, id: Uuid) -> Result<Option<NotificationRecord>, StoreError>;

    async fn update_notification_status(
        &self,
        id: Uuid,
        status: NotificationStatus,
        sent_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Newest first.
    async fn list_notifications(&self, limit: i64) -> Result<Vec<NotificationRecord>, StoreError>;

    async fn engagement_totals(&self) -> Result<EngagementTotals, StoreError>;

    async fn insert_delivery_log(&self, log: &DeliveryLog) -> Result<(), StoreError>;

    /// Records an event once per (user, notification, type). A new event
    /// bumps the matching counter and, for clicks, joins the user to the
    /// clicked set in the same atomic unit; a repeat yields
    /// `InsertOutcome::Duplicate` and changes nothing.
    async fn record_event(&self, event: &NotificationEvent) -> Result<InsertOutcome, StoreError>;

    /// Newest first.
    async fn list_events(&self, filter: &EventFilter, limit: i64) -> Result<Vec<NotificationEvent>, StoreError>;

    /// Stores an action-level click together with its `clicked` event, as
    /// one atomic unit. A click row is keyed on (notification, user, action,
    /// clicked_at), so replaying the same click stores nothing. The outcome
    /// is that of the `clicked` event.
    async fn record_click(&self, click: &NotificationClick) -> Result<InsertOutcome, StoreError>;

    async fn list_clicks(&self, notification_id: Uuid) -> Result<Vec<NotificationClick>, StoreError>;

    async fn insert_silent_audit(&self, record: &SilentAuditRecord) -> Result<(), StoreError>;

    /// Newest first.
    async fn recent_signals(&self, limit: i64) -> Result<Vec<Signal>, StoreError>;
}
