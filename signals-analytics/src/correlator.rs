use chrono::Utc;
use serde::Serialize;
use signals_core::error::StoreError;
use signals_core::store::{BackendStore, EventFilter, InsertOutcome};
use signals_core::types::{NotificationClick, NotificationEvent, NotificationEventType, NotificationRecord};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::AnalyticsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOutcome {
    Recorded,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationStats {
    pub notification_id: Uuid,
    pub title: String,
    pub click_count: i32,
    pub view_count: i32,
    pub unique_clicked_users: usize,
    pub total_events: i64,
}

impl From<&NotificationRecord> for NotificationStats {
    fn from(record: &NotificationRecord) -> Self {
        Self {
            notification_id: record.id,
            title: record.title.clone(),
            click_count: record.click_count,
            view_count: record.view_count,
            unique_clicked_users: record.clicked_user_ids.len(),
            total_events: i64::from(record.click_count) + i64::from(record.view_count),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EngagementMetrics {
    pub total_notifications: i64,
    pub total_clicks: i64,
    pub total_views: i64,
    pub average_click_rate: f64,
    pub average_view_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClickStats {
    pub total_clicks: usize,
    pub action_breakdown: BTreeMap<String, usize>,
    pub unique_users: usize,
}

fn rate(numerator: i64, denominator: i64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn store_error(err: StoreError) -> AnalyticsError {
    match err {
        StoreError::NotFound(what) => AnalyticsError::NotFound(what),
        other => AnalyticsError::Store(other),
    }
}

impl From<InsertOutcome> for EventOutcome {
    fn from(outcome: InsertOutcome) -> Self {
        match outcome {
            InsertOutcome::Inserted => EventOutcome::Recorded,
            InsertOutcome::Duplicate => EventOutcome::Duplicate,
        }
    }
}

fn log_outcome(outcome: InsertOutcome, event: &NotificationEvent) {
    match outcome {
        InsertOutcome::Inserted => tracing::debug!(
            "Recorded {} event for notification {}",
            event.event_type,
            event.notification_id
        ),
        InsertOutcome::Duplicate => tracing::debug!(
            "Duplicate {} event for notification {} by {}",
            event.event_type,
            event.notification_id,
            event.user_identity
        ),
    }
}

/// Correlates view/click events with their notification aggregates.
#[derive(Clone)]
pub struct Correlator {
    store: Arc<dyn BackendStore>,
}

impl Correlator {
    pub fn new(store: Arc<dyn BackendStore>) -> Self {
        Self { store }
    }

    /// Records an event at most once per (user, notification, type). Only a
    /// newly recorded event moves the aggregate counters.
    pub async fn log_event(
        &self,
        user_identity: &str,
        notification_id: Uuid,
        event_type: NotificationEventType,
    ) -> Result<EventOutcome, AnalyticsError> {
        if user_identity.trim().is_empty() {
            return Err(AnalyticsError::InvalidInput("user_identity is empty".to_string()));
        }

        let event = NotificationEvent {
            user_identity: user_identity.to_string(),
            notification_id,
            event_type,
            event_time: Utc::now(),
        };

        let outcome = self.store.record_event(&event).await.map_err(store_error)?;
        log_outcome(outcome, &event);
        Ok(outcome.into())
    }

    /// Stores the action-level click and records the matching click event in
    /// one store write.
    pub async fn log_click(&self, click: &NotificationClick) -> Result<EventOutcome, AnalyticsError> {
        if click.user_identity.trim().is_empty() {
            return Err(AnalyticsError::InvalidInput("user_identity is empty".to_string()));
        }

        let outcome = self.store.record_click(click).await.map_err(store_error)?;
        tracing::info!(
            "Logged {} click on notification {}",
            click.action.as_str(),
            click.notification_id
        );
        log_outcome(outcome, &click.to_event());
        Ok(outcome.into())
    }

    /// Stats for one notification, or the latest `limit` when `id` is `None`.
    pub async fn notification_stats(
        &self,
        id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<NotificationStats>, AnalyticsError> {
        match id {
            Some(id) => {
                let record = self
                    .store
                    .get_notification(id)
                    .await?
                    .ok_or_else(|| AnalyticsError::NotFound(format!("notification {}", id)))?;
                Ok(vec![NotificationStats::from(&record)])
            }
            None => Ok(self
                .store
                .list_notifications(limit)
                .await?
                .iter()
                .map(NotificationStats::from)
                .collect()),
        }
    }

    pub async fn engagement_metrics(&self) -> Result<EngagementMetrics, AnalyticsError> {
        let totals = self.store.engagement_totals().await?;
        Ok(EngagementMetrics {
            total_notifications: totals.total_notifications,
            total_clicks: totals.total_clicks,
            total_views: totals.total_views,
            average_click_rate: rate(totals.total_clicks, totals.total_notifications),
            average_view_rate: rate(totals.total_views, totals.total_notifications),
        })
    }

    pub async fn click_stats(&self, notification_id: Uuid) -> Result<ClickStats, AnalyticsError> {
        let clicks = self.store.list_clicks(notification_id).await?;
        let mut stats = ClickStats {
            total_clicks: clicks.len(),
            ..ClickStats::default()
        };
        let mut users = HashSet::new();
        for click in &clicks {
            *stats
                .action_breakdown
                .entry(click.action.as_str().to_string())
                .or_insert(0) += 1;
            users.insert(click.user_identity.as_str());
        }
        stats.unique_users = users.len();
        Ok(stats)
    }

    pub async fn events_for(&self, notification_id: Uuid, limit: i64) -> Result<Vec<NotificationEvent>, AnalyticsError> {
        let filter = EventFilter {
            notification_id: Some(notification_id),
            user_identity: None,
        };
        Ok(self.store.list_events(&filter, limit).await?)
    }

    pub async fn user_history(&self, user_identity: &str, limit: i64) -> Result<Vec<NotificationEvent>, AnalyticsError> {
        let filter = EventFilter {
            notification_id: None,
            user_identity: Some(user_identity.to_string()),
        };
        Ok(self.store.list_events(&filter, limit).await?)
    }
}
