use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use signals_core::config::DeliveryConfig;
use signals_core::store::BackendStore;
use signals_core::types::{
    DeliveryLog, NewNotification, NotificationKind, NotificationStatus, RecipientFilter,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::DeliveryError;
use crate::fcm::GatewaySender;
use crate::oauth::{ServiceAccount, ServiceAccountTokenSource};
use crate::relay::{is_relay_token, RelaySender};
use crate::report::BatchReport;
use crate::rich::RichNotification;

const API_VERSION: &str = "FCM_v1";

/// A request to notify one user, a set of devices, or everyone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub target_user: Option<String>,
    #[serde(default)]
    pub target_device_ids: Option<Vec<String>>,
}

impl PushRequest {
    fn recipients(&self) -> RecipientFilter {
        if let Some(user) = &self.target_user {
            return RecipientFilter::User(user.clone());
        }
        match &self.target_device_ids {
            Some(ids) if !ids.is_empty() => RecipientFilter::Devices(ids.clone()),
            _ => RecipientFilter::All,
        }
    }

    /// An existing record named by the sender in `data.notification_id`.
    fn existing_notification(&self) -> Option<Uuid> {
        self.data
            .as_ref()
            .and_then(|d| d.get("notification_id"))
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushOutcome {
    pub success: bool,
    pub notification_id: Uuid,
    pub recipients: usize,
    pub gateway_tokens: usize,
    pub relay_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<BatchReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<BatchReport>,
}

/// Splits tokens into (gateway, relay).
pub fn partition_tokens<I, S>(tokens: I) -> (Vec<String>, Vec<String>)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    tokens
        .into_iter()
        .map(Into::into)
        .partition(|token: &String| !is_relay_token(token))
}

pub struct DeliveryService {
    store: Arc<dyn BackendStore>,
    gateway: GatewaySender,
    relay: RelaySender,
}

impl DeliveryService {
    pub fn new(store: Arc<dyn BackendStore>, gateway: GatewaySender, relay: RelaySender) -> Self {
        Self { store, gateway, relay }
    }

    /// Builds both senders from configuration. A missing or unreadable
    /// gateway credential is not fatal here; gateway sends then fail per
    /// batch while the relay path keeps working.
    pub async fn from_config(config: &DeliveryConfig, store: Arc<dyn BackendStore>) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let account = match ServiceAccount::from_config(config).await {
            Ok(Some(account)) => Some(account),
            Ok(None) => {
                tracing::warn!("Gateway delivery disabled (missing service credential)");
                None
            }
            Err(e) => {
                tracing::warn!("Gateway delivery disabled (unusable service credential): {}", e);
                None
            }
        };
        let project_id = config
            .fcm_project_id
            .clone()
            .or_else(|| account.as_ref().and_then(|a| a.project_id.clone()));

        let tokens = Arc::new(ServiceAccountTokenSource::new(
            client.clone(),
            account,
            config.oauth_token_url.clone(),
        ));
        let gateway = GatewaySender::new(
            client.clone(),
            config.gateway_base_url.clone(),
            project_id,
            tokens,
            config.default_icon.clone(),
        );
        let relay = RelaySender::new(client, config.relay_url.clone());

        tracing::info!("Delivery service initialized");
        Ok(Self::new(store, gateway, relay))
    }

    pub async fn send(&self, request: PushRequest) -> Result<PushOutcome, DeliveryError> {
        tracing::info!(
            "Processing push notification: type={} title={:?} target_user={:?}",
            request.kind,
            request.title,
            request.target_user
        );

        let notification_id = match request.existing_notification() {
            Some(id) => id,
            None => {
                self.store
                    .insert_notification(&NewNotification {
                        kind: request.kind,
                        title: request.title.clone(),
                        message: request.message.clone(),
                        data: request.data.clone(),
                        target_user: request.target_user.clone(),
                    })
                    .await?
                    .id
            }
        };

        let profiles = self.store.profiles_with_tokens(&request.recipients()).await?;
        tracing::info!("Found {} device profiles with delivery tokens", profiles.len());

        let (gateway_tokens, relay_tokens) =
            partition_tokens(profiles.iter().filter_map(|p| p.delivery_token.clone()));

        let rich = RichNotification::from_push(request.kind, &request.title, &request.message, request.data.as_ref());

        let mut relay_data: Map<String, Value> = match &request.data {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        relay_data.insert("notification_id".to_string(), Value::String(notification_id.to_string()));

        let gateway_path = async {
            if gateway_tokens.is_empty() {
                None
            } else {
                Some(self.gateway.send_batch(&gateway_tokens, &rich, notification_id).await)
            }
        };
        let relay_path = async {
            if relay_tokens.is_empty() {
                None
            } else {
                Some(
                    self.relay
                        .send_batch(&relay_tokens, &request.title, &request.message, &relay_data)
                        .await,
                )
            }
        };
        let (gateway, relay) = futures::join!(gateway_path, relay_path);

        let success = gateway.iter().chain(relay.iter()).any(|r| r.success);
        let outcome = PushOutcome {
            success,
            notification_id,
            recipients: profiles.len(),
            gateway_tokens: gateway_tokens.len(),
            relay_tokens: relay_tokens.len(),
            gateway,
            relay,
        };

        self.record_outcome(&outcome).await;
        Ok(outcome)
    }

    /// Status and log writes are best effort; the send already happened.
    async fn record_outcome(&self, outcome: &PushOutcome) {
        let status = if outcome.success {
            NotificationStatus::Sent
        } else {
            NotificationStatus::Failed
        };

        if let Err(e) = self
            .store
            .update_notification_status(outcome.notification_id, status, Utc::now())
            .await
        {
            tracing::error!("Failed to update notification status: {}", e);
        }

        let log = DeliveryLog {
            notification_id: outcome.notification_id,
            status,
            result: json!({
                "gateway_tokens": outcome.gateway_tokens,
                "relay_tokens": outcome.relay_tokens,
                "gateway": outcome.gateway,
                "relay": outcome.relay,
                "api_version": API_VERSION,
            }),
            error_message: (!outcome.success).then(|| "Some notifications failed to send".to_string()),
        };
        if let Err(e) = self.store.insert_delivery_log(&log).await {
            tracing::error!("Failed to write delivery log: {}", e);
        }
    }
}
