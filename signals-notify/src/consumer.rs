use anyhow::Result;
use chrono::Utc;
use serde_json::{Map, Value};
use signals_analytics::{AnalyticsJob, AnalyticsQueue};
use signals_core::deep_link::{DeepLink, Route};
use signals_core::types::{ClickAction, NotificationClick, NotificationEventType, Platform};
use signals_device::NotificationPresenter;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::bus::BusMessage;
use crate::dispatcher::Dispatcher;
use crate::inbound::InboundMessage;

/// In-app navigation target for activated notifications.
pub trait Navigator: Send + Sync {
    fn navigate(&self, route: &Route);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNavigator;

impl Navigator for LogNavigator {
    fn navigate(&self, route: &Route) {
        tracing::info!("Navigating to {}", route.path());
    }
}

/// Drains the bus into the dispatcher, presenter and analytics queue.
pub struct BusConsumer {
    dispatcher: Arc<Dispatcher>,
    presenter: Arc<dyn NotificationPresenter>,
    navigator: Arc<dyn Navigator>,
    analytics: AnalyticsQueue,
    user_identity: String,
    platform: Platform,
}

fn notification_id(data: &Map<String, Value>) -> Option<Uuid> {
    data.get("notification_id")
        .or_else(|| data.get("notificationId"))
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn deep_link(data: &Map<String, Value>) -> Option<&str> {
    data.get("deep_link")
        .or_else(|| data.get("deepLink"))
        .and_then(Value::as_str)
}

impl BusConsumer {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        presenter: Arc<dyn NotificationPresenter>,
        navigator: Arc<dyn Navigator>,
        analytics: AnalyticsQueue,
        user_identity: impl Into<String>,
        platform: Platform,
    ) -> Self {
        Self {
            dispatcher,
            presenter,
            navigator,
            analytics,
            user_identity: user_identity.into(),
            platform,
        }
    }

    pub async fn handle(&self, message: BusMessage) {
        match message {
            BusMessage::Inbound(inbound) => self.handle_inbound(inbound).await,
            BusMessage::Silent(envelope) => {
                self.dispatcher.handle_silent_notification(&envelope).await;
            }
            BusMessage::Activated { data, action } => self.handle_activation(&data, action.as_deref()),
        }
    }

    async fn handle_inbound(&self, inbound: InboundMessage) {
        let envelope = inbound.into_envelope();
        if envelope.is_silent() {
            self.dispatcher.handle_silent_notification(&envelope).await;
            return;
        }

        if let Err(e) = self.presenter.present(&envelope).await {
            tracing::warn!("Failed to present notification: {}", e);
            return;
        }

        if let Some(id) = notification_id(envelope.data()) {
            self.analytics.enqueue(AnalyticsJob::Event {
                user_identity: self.user_identity.clone(),
                notification_id: id,
                event_type: NotificationEventType::Viewed,
            });
        }
    }

    fn handle_activation(&self, data: &Map<String, Value>, action: Option<&str>) {
        let link = deep_link(data);
        let route = link.map(|l| DeepLink::parse(l).resolve()).unwrap_or(Route::Home);
        self.navigator.navigate(&route);

        let Some(id) = notification_id(data) else {
            tracing::debug!("Activated notification carries no id, click not logged");
            return;
        };

        let action: ClickAction = action
            .unwrap_or_default()
            .parse()
            .unwrap_or_else(|_| {
                tracing::debug!("Unrecognised notification action {:?}, logging as default", action);
                ClickAction::Default
            });

        self.analytics.enqueue(AnalyticsJob::Click(NotificationClick {
            notification_id: id,
            user_identity: self.user_identity.clone(),
            action,
            clicked_at: Utc::now(),
            platform: self.platform,
            deep_link: link.map(str::to_string),
        }));
    }
}

pub async fn run(consumer: BusConsumer, mut rx: mpsc::Receiver<BusMessage>) -> Result<()> {
    tracing::info!("Starting notification bus consumer");

    while let Some(message) = rx.recv().await {
        consumer.handle(message).await;
    }

    tracing::info!("Notification bus closed");
    Ok(())
}
