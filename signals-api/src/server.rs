use anyhow::Result;
use axum::extract::Extension;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use signals_core::config::ServerConfig;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::ApiState;

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    match &config.cors_origins {
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|origin| match origin.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(allowed)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => {
            tracing::warn!("CORS_ORIGINS not set, using permissive CORS. Set CORS_ORIGINS for production!");
            CorsLayer::permissive()
        }
    }
}

pub fn router(state: ApiState) -> Router {
    let cors = cors_layer(&state.ctx.config.server);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/push", post(handlers::send_push))
        .route("/api/v1/notifications", get(handlers::list_notifications))
        .route(
            "/api/v1/notification-events",
            get(handlers::list_notification_events).post(handlers::log_notification_event),
        )
        .route("/api/v1/analytics/notifications", get(handlers::notification_stats))
        .route("/api/v1/analytics/engagement", get(handlers::engagement_metrics))
        .route("/api/v1/analytics/clicks/:id", get(handlers::click_stats))
        .route("/api/v1/device-profiles", post(handlers::register_device_profile))
        .route("/api/v1/sync/trigger", post(handlers::trigger_sync))
        .route(
            "/api/v1/sync/config",
            get(handlers::get_sync_config).put(handlers::update_sync_config),
        )
        .route("/api/v1/device/inbound", post(handlers::publish_inbound))
        .route("/api/v1/device/activated", post(handlers::publish_activation))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(Extension(state))
                .layer(cors),
        )
}

pub async fn run(state: ApiState) -> Result<()> {
    let host: std::net::IpAddr = state.ctx.config.server.host.parse()?;
    let addr = SocketAddr::new(host, state.ctx.config.server.api_port);
    let app = router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use signals_core::memory::MemoryStore;
    use signals_core::storage::MemoryStorage;
    use signals_core::store::BackendStore;
    use signals_core::types::{DeviceIdentity, NewNotification, NotificationKind, Platform};
    use signals_core::{AppContext, Config};
    use signals_delivery::{DeliveryService, GatewaySender, RelaySender, StaticTokenSource};
    use signals_notify::{channel, BusMessage, Dispatcher};
    use signals_sync::SyncScheduler;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct Harness {
        store: Arc<MemoryStore>,
        bus_rx: tokio::sync::mpsc::Receiver<BusMessage>,
        app: Router,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(MemoryStorage::new());
        let ctx = AppContext::with_backends(Config::default(), store.clone(), storage.clone());

        let client = reqwest::Client::new();
        let delivery = Arc::new(DeliveryService::new(
            store.clone(),
            GatewaySender::new(
                client.clone(),
                "http://127.0.0.1:9",
                None,
                Arc::new(StaticTokenSource::new("unused")),
                "/icon.png",
            ),
            RelaySender::new(client, "http://127.0.0.1:9/relay"),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            DeviceIdentity::new("device_1_abcdefghi"),
            Platform::Web,
        ));
        let scheduler = SyncScheduler::new(dispatcher, storage);
        let (bus, bus_rx) = channel(1);

        Harness {
            store,
            bus_rx,
            app: router(ApiState::new(ctx, delivery, scheduler, bus)),
        }
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn seeded_notification(store: &MemoryStore) -> uuid::Uuid {
        store
            .insert_notification(&NewNotification {
                kind: NotificationKind::Signal,
                title: "XAU/USD BUY".to_string(),
                message: "Entry 2315.40".to_string(),
                data: None,
                target_user: None,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness();
        let (status, body) = call(&h.app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_event_logged_once_per_user() {
        let h = harness();
        let id = seeded_notification(&h.store).await;
        let payload = json!({
            "user_id": "device_1_abcdefghi",
            "notification_id": id.to_string(),
            "event_type": "clicked"
        });

        let (status, first) = call(&h.app, "POST", "/api/v1/notification-events", Some(payload.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["duplicate"], false);

        let (_, second) = call(&h.app, "POST", "/api/v1/notification-events", Some(payload)).await;
        assert_eq!(second["duplicate"], true);

        let record = h.store.get_notification(id).await.unwrap().unwrap();
        assert_eq!(record.click_count, 1);
        assert_eq!(record.clicked_user_ids, vec!["device_1_abcdefghi".to_string()]);

        let (_, events) = call(
            &h.app,
            "GET",
            &format!("/api/v1/notification-events?notification_id={}", id),
            None,
        )
        .await;
        assert_eq!(events["total"], 1);
    }

    #[tokio::test]
    async fn test_event_validation() {
        let h = harness();

        let (status, body) = call(
            &h.app,
            "POST",
            "/api/v1/notification-events",
            Some(json!({ "user_id": "u1", "event_type": "viewed" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("Missing required fields"));

        let (status, _) = call(
            &h.app,
            "POST",
            "/api/v1/notification-events",
            Some(json!({ "user_id": "u1", "notification_id": uuid::Uuid::new_v4().to_string(), "event_type": "liked" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &h.app,
            "POST",
            "/api/v1/notification-events",
            Some(json!({ "user_id": "u1", "notification_id": "not-a-uuid", "event_type": "viewed" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &h.app,
            "POST",
            "/api/v1/notification-events",
            Some(json!({ "user_id": "u1", "notification_id": uuid::Uuid::new_v4().to_string(), "event_type": "viewed" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_engagement_with_no_notifications_has_zero_rates() {
        let h = harness();
        let (status, body) = call(&h.app, "GET", "/api/v1/analytics/engagement", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_notifications"], 0);
        assert_eq!(body["average_click_rate"], 0.0);
    }

    #[tokio::test]
    async fn test_notification_stats_for_unknown_id_is_not_found() {
        let h = harness();
        let uri = format!("/api/v1/analytics/notifications?notification_id={}", uuid::Uuid::new_v4());
        let (status, _) = call(&h.app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_device_profile_registration_keeps_token() {
        let h = harness();
        let (status, _) = call(
            &h.app,
            "POST",
            "/api/v1/device-profiles",
            Some(json!({ "identity": "device_9_zzzzzzzzz", "delivery_token": "tok-9", "platform": "android" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(
            &h.app,
            "POST",
            "/api/v1/device-profiles",
            Some(json!({ "identity": "device_9_zzzzzzzzz", "platform": "android" })),
        )
        .await;
        assert_eq!(body["profile"]["delivery_token"], "tok-9");

        let (status, _) = call(
            &h.app,
            "POST",
            "/api/v1/device-profiles",
            Some(json!({ "identity": "device_9_zzzzzzzzz", "platform": "blackberry" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_manual_sync_trigger() {
        let h = harness();
        let (status, body) = call(
            &h.app,
            "POST",
            "/api/v1/sync/trigger",
            Some(json!({ "types": ["price-update", "market-data-sync"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["results"].as_array().unwrap().len(), 2);
        assert_eq!(h.store.audit_records().len(), 2);

        let (status, _) = call(
            &h.app,
            "POST",
            "/api/v1/sync/trigger",
            Some(json!({ "types": ["defragment"] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&h.app, "POST", "/api/v1/sync/trigger", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_sync_config_rejects_zero_interval() {
        let h = harness();
        let (status, _) = call(&h.app, "PUT", "/api/v1/sync/config", Some(json!({ "interval": 0 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(&h.app, "PUT", "/api/v1/sync/config", Some(json!({ "interval": 30 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["config"]["interval"], 30);
    }

    #[tokio::test]
    async fn test_push_without_recipients_reports_failure() {
        let h = harness();
        let (status, body) = call(
            &h.app,
            "POST",
            "/api/v1/push",
            Some(json!({ "type": "announcement", "title": "Maintenance", "message": "Tonight" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["recipients"], 0);

        let (_, list) = call(&h.app, "GET", "/api/v1/notifications?limit=10", None).await;
        assert_eq!(list["notifications"][0]["status"], "failed");
    }

    #[tokio::test]
    async fn test_inbound_push_is_published_to_bus() {
        let mut h = harness();
        let message = json!({
            "notification": { "title": "XAU/USD BUY", "body": "Entry 2315.40" },
            "data": { "type": "signal", "deep_link": "myapp://signal/77" }
        });

        let (status, _) = call(&h.app, "POST", "/api/v1/device/inbound", Some(message.clone())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        match h.bus_rx.try_recv().unwrap() {
            BusMessage::Inbound(inbound) => assert_eq!(inbound.handler_type(), Some("signal")),
            other => panic!("unexpected bus message: {:?}", other),
        }

        // capacity 1: a second publish without draining is refused
        call(&h.app, "POST", "/api/v1/device/activated", Some(json!({ "action": "view" }))).await;
        let (status, _) = call(&h.app, "POST", "/api/v1/device/inbound", Some(message)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
