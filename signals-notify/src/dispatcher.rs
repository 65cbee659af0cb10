use serde_json::{Map, Value};
use signals_core::store::BackendStore;
use signals_core::types::{
    DeviceIdentity, NotificationEnvelope, Platform, SilentAuditRecord, SilentHandlerResult, SilentType,
};
use signals_core::UnknownHandlerType;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::error::DispatchError;
use crate::handlers::{default_handlers, HandlerState, SilentHandler};

/// Routes silent envelopes to their handler and audits every run.
pub struct Dispatcher {
    handlers: HashMap<SilentType, Arc<dyn SilentHandler>>,
    state: Arc<HandlerState>,
    store: Arc<dyn BackendStore>,
    device_identity: DeviceIdentity,
    platform: Platform,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn BackendStore>, device_identity: DeviceIdentity, platform: Platform) -> Self {
        let state = Arc::new(HandlerState::new());
        let handlers = default_handlers(state.clone(), store.clone())
            .into_iter()
            .map(|h| (h.silent_type(), h))
            .collect();

        Self {
            handlers,
            state,
            store,
            device_identity,
            platform,
        }
    }

    /// Replaces the handler registered for the handler's type.
    pub fn with_handler(mut self, handler: Arc<dyn SilentHandler>) -> Self {
        self.handlers.insert(handler.silent_type(), handler);
        self
    }

    pub fn state(&self) -> &Arc<HandlerState> {
        &self.state
    }

    fn resolve(&self, envelope: &NotificationEnvelope) -> Result<Arc<dyn SilentHandler>, DispatchError> {
        let raw = envelope.silent_type().unwrap_or_default();
        let silent_type: SilentType = raw.parse()?;
        self.handlers
            .get(&silent_type)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownHandlerType(UnknownHandlerType(raw.to_string())))
    }

    /// Runs the handler for `envelope` and returns exactly one result.
    ///
    /// Never fails: unknown types and handler errors come back as a failed
    /// result, and audit write failures are only logged.
    pub async fn handle_silent_notification(&self, envelope: &NotificationEnvelope) -> SilentHandlerResult {
        let handler_name = envelope.silent_type().unwrap_or("unknown").to_string();
        tracing::debug!("Processing silent notification: {}", handler_name);

        let started = Instant::now();
        let outcome = match self.resolve(envelope) {
            Ok(handler) => handler.handle(envelope.data()).await,
            Err(e) => Err(e),
        };
        let execution_time_ms = started.elapsed().as_millis() as i64;

        let result = match outcome {
            Ok(value) => {
                tracing::info!("Silent notification {} processed in {}ms", handler_name, execution_time_ms);
                SilentHandlerResult::succeeded(handler_name.clone(), value)
            }
            Err(e) => {
                tracing::error!("Silent notification {} failed: {}", handler_name, e);
                SilentHandlerResult::failed(handler_name.clone(), e.to_string())
            }
        };

        self.audit(&handler_name, envelope.data(), &result, execution_time_ms)
            .await;
        result
    }

    /// Runs `silent_type` with an empty payload, as a scheduled sync does.
    pub async fn dispatch_type(&self, silent_type: SilentType) -> SilentHandlerResult {
        let envelope = NotificationEnvelope::silent(silent_type.as_str(), Map::new());
        self.handle_silent_notification(&envelope).await
    }

    async fn audit(
        &self,
        handler_name: &str,
        payload: &Map<String, Value>,
        result: &SilentHandlerResult,
        execution_time_ms: i64,
    ) {
        let record = SilentAuditRecord {
            device_identity: self.device_identity.as_str().to_string(),
            handler_type: handler_name.to_string(),
            payload: Value::Object(payload.clone()),
            execution_time_ms,
            success: result.success,
            result: result.result.clone().unwrap_or_else(|| Value::Object(Map::new())),
            error_message: result.error.clone(),
            platform: self.platform,
        };

        if let Err(e) = self.store.insert_silent_audit(&record).await {
            tracing::warn!("Failed to write silent notification audit record: {}", e);
        }
    }
}
