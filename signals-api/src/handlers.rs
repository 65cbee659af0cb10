use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use signals_analytics::EventOutcome;
use signals_core::store::EventFilter;
use signals_core::types::{DeviceIdentity, NotificationEventType, Platform, SilentType};
use signals_delivery::PushRequest;
use signals_device::DeviceRegistrar;
use signals_notify::{BusMessage, InboundMessage};
use signals_sync::SyncConfigPatch;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::ApiState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 100;

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

fn parse_uuid(field: &str, value: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(value).map_err(|_| ApiError::BadRequest(format!("Invalid UUID format for {}", field)))
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "signals-api"
    }))
}

pub async fn send_push(
    Extension(state): Extension<ApiState>,
    Json(request): Json<PushRequest>,
) -> Result<Json<Value>, ApiError> {
    if request.title.trim().is_empty() {
        return Err(ApiError::BadRequest("title is required".to_string()));
    }

    let outcome = state.delivery.send(request).await?;
    Ok(Json(json!(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn list_notifications(
    Extension(state): Extension<ApiState>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Value>, ApiError> {
    let notifications = state.ctx.store.list_notifications(clamp_limit(params.limit)).await?;
    Ok(Json(json!({ "notifications": notifications })))
}

/// Fields are optional so that missing ones produce a 400 with a message
/// instead of a body rejection.
#[derive(Debug, Deserialize)]
pub struct EventPayload {
    #[serde(default, alias = "user_identity")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub notification_id: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
}

pub async fn log_notification_event(
    Extension(state): Extension<ApiState>,
    Json(payload): Json<EventPayload>,
) -> Result<Json<Value>, ApiError> {
    let (Some(user_id), Some(notification_id), Some(event_type)) = (
        payload.user_id.filter(|s| !s.is_empty()),
        payload.notification_id.filter(|s| !s.is_empty()),
        payload.event_type.filter(|s| !s.is_empty()),
    ) else {
        return Err(ApiError::BadRequest(
            "Missing required fields: user_id, notification_id, event_type".to_string(),
        ));
    };

    let event_type: NotificationEventType = event_type
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid event_type. Must be \"clicked\" or \"viewed\"".to_string()))?;
    let notification_id = parse_uuid("notification_id", &notification_id)?;

    tracing::info!(
        "Logging notification event: user={} notification={} type={}",
        user_id,
        notification_id,
        event_type
    );

    let outcome = state
        .correlator
        .log_event(&user_id, notification_id, event_type)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": format!("{} event logged successfully", event_type),
        "event_type": event_type,
        "notification_id": notification_id,
        "duplicate": outcome == EventOutcome::Duplicate,
    })))
}

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    #[serde(default)]
    pub notification_id: Option<String>,
    #[serde(default, alias = "user_identity")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn list_notification_events(
    Extension(state): Extension<ApiState>,
    Query(params): Query<EventQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = clamp_limit(params.limit);
    let events = match (params.notification_id.as_deref(), params.user_id.as_deref()) {
        (Some(id), None) => state.correlator.events_for(parse_uuid("notification_id", id)?, limit).await?,
        (None, Some(user)) => state.correlator.user_history(user, limit).await?,
        (id, user) => {
            let filter = EventFilter {
                notification_id: id.map(|id| parse_uuid("notification_id", id)).transpose()?,
                user_identity: user.map(str::to_string),
            };
            state.ctx.store.list_events(&filter, limit).await?
        }
    };

    Ok(Json(json!({
        "total": events.len(),
        "events": events,
    })))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    #[serde(default)]
    pub notification_id: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

pub async fn notification_stats(
    Extension(state): Extension<ApiState>,
    Query(params): Query<StatsQuery>,
) -> Result<Json<Value>, ApiError> {
    let id = params
        .notification_id
        .as_deref()
        .map(|id| parse_uuid("notification_id", id))
        .transpose()?;
    let stats = state
        .correlator
        .notification_stats(id, clamp_limit(params.limit))
        .await?;
    Ok(Json(json!({ "stats": stats })))
}

pub async fn engagement_metrics(Extension(state): Extension<ApiState>) -> Result<Json<Value>, ApiError> {
    let metrics = state.correlator.engagement_metrics().await?;
    Ok(Json(json!(metrics)))
}

pub async fn click_stats(
    Extension(state): Extension<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let stats = state.correlator.click_stats(parse_uuid("notification_id", &id)?).await?;
    Ok(Json(json!(stats)))
}

#[derive(Debug, Deserialize)]
pub struct DeviceProfilePayload {
    #[serde(alias = "user_id")]
    pub identity: String,
    #[serde(default, alias = "fcm_token")]
    pub delivery_token: Option<String>,
    pub platform: String,
    #[serde(default)]
    pub app_version: Option<String>,
}

/// Registers or refreshes a device. Omitting the token keeps the stored one.
pub async fn register_device_profile(
    Extension(state): Extension<ApiState>,
    Json(payload): Json<DeviceProfilePayload>,
) -> Result<Json<Value>, ApiError> {
    if payload.identity.trim().is_empty() {
        return Err(ApiError::BadRequest("identity is required".to_string()));
    }
    let platform: Platform = payload
        .platform
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("{}", e)))?;
    let app_version = payload
        .app_version
        .unwrap_or_else(|| state.ctx.config.device.app_version.clone());

    let registrar = DeviceRegistrar::new(
        state.ctx.store.clone(),
        DeviceIdentity::new(payload.identity),
        platform,
        app_version,
    );
    let profile = registrar.register(payload.delivery_token).await?;

    tracing::info!("Device profile registered: {}", profile.identity);
    Ok(Json(json!({ "success": true, "profile": profile })))
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncTriggerPayload {
    #[serde(default)]
    pub types: Option<Vec<String>>,
}

pub async fn trigger_sync(
    Extension(state): Extension<ApiState>,
    payload: Option<Json<SyncTriggerPayload>>,
) -> Result<Json<Value>, ApiError> {
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let types = payload
        .types
        .map(|names| {
            names
                .iter()
                .map(|name| name.parse::<SilentType>())
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let results = state.scheduler.trigger_manual_sync(types).await;
    let succeeded = results.iter().filter(|r| r.success).count();

    Ok(Json(json!({
        "success": succeeded == results.len(),
        "results": results,
    })))
}

pub async fn get_sync_config(Extension(state): Extension<ApiState>) -> Json<Value> {
    let config = state.scheduler.config().await;
    Json(json!({
        "config": config,
        "running": state.scheduler.is_running().await,
    }))
}

pub async fn update_sync_config(
    Extension(state): Extension<ApiState>,
    Json(patch): Json<SyncConfigPatch>,
) -> Result<Json<Value>, ApiError> {
    let config = state.scheduler.update_config(patch).await?;
    Ok(Json(json!({ "config": config })))
}

fn publish(state: &ApiState, message: BusMessage) -> Result<(StatusCode, Json<Value>), ApiError> {
    state.bus.try_publish(message).map_err(|e| match e {
        TrySendError::Full(_) => ApiError::Unavailable("notification bus is full".to_string()),
        TrySendError::Closed(_) => ApiError::Unavailable("notification bus is closed".to_string()),
    })?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "accepted": true }))))
}

/// Hands a push delivery to this installation's notification bus, as the
/// platform's push callback would.
pub async fn publish_inbound(
    Extension(state): Extension<ApiState>,
    Json(message): Json<InboundMessage>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    tracing::debug!("Inbound push accepted: type={:?}", message.handler_type());
    publish(&state, BusMessage::Inbound(message))
}

#[derive(Debug, Deserialize)]
pub struct ActivationPayload {
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub action: Option<String>,
}

pub async fn publish_activation(
    Extension(state): Extension<ApiState>,
    Json(payload): Json<ActivationPayload>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    publish(
        &state,
        BusMessage::Activated {
            data: payload.data,
            action: payload.action,
        },
    )
}
