use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use signals_core::store::BackendStore;
use signals_core::types::{Signal, SilentType};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::DispatchError;

pub const MAX_PRICE_PAIRS: usize = 32;
pub const MAX_CACHED_RESPONSES: usize = 256;
pub const SIGNAL_REFRESH_LIMIT: i64 = 50;

const DEFAULT_PRICE_PAIRS: [&str; 2] = ["XAU/USD", "XAG/USD"];
const DEFAULT_SYNC_PAIRS: [&str; 3] = ["XAU/USD", "XAG/USD", "BTC/USD"];
const BACKGROUND_ACTIONS: [&str; 3] = ["refresh-market-data", "sync-signals", "update-indicators"];

/// One unit of background work, keyed by its silent type.
///
/// Handlers replace state rather than accumulate it, so running one twice
/// with the same payload leaves the same state as running it once.
#[async_trait]
pub trait SilentHandler: Send + Sync {
    fn silent_type(&self) -> SilentType;

    async fn handle(&self, payload: &Map<String, Value>) -> Result<Value, DispatchError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceQuote {
    pub price: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub body: Value,
    pub cached_at: DateTime<Utc>,
}

/// Process-local caches the handlers maintain. Each cache has its own lock.
#[derive(Default)]
pub struct HandlerState {
    prices: RwLock<BTreeMap<String, PriceQuote>>,
    signals: RwLock<Vec<Signal>>,
    responses: RwLock<BTreeMap<String, CachedResponse>>,
    synced_pairs: RwLock<BTreeMap<String, DateTime<Utc>>>,
    indicators_updated_at: RwLock<Option<DateTime<Utc>>>,
}

impl HandlerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn price(&self, pair: &str) -> Option<PriceQuote> {
        self.prices.read().await.get(pair).cloned()
    }

    pub async fn price_count(&self) -> usize {
        self.prices.read().await.len()
    }

    pub async fn cached_signals(&self) -> Vec<Signal> {
        self.signals.read().await.clone()
    }

    pub async fn synced_pairs(&self) -> Vec<String> {
        self.synced_pairs.read().await.keys().cloned().collect()
    }

    pub async fn indicators_updated_at(&self) -> Option<DateTime<Utc>> {
        *self.indicators_updated_at.read().await
    }

    /// Caches a response body, evicting the oldest entry once full.
    pub async fn cache_response(&self, key: impl Into<String>, body: Value) {
        let mut responses = self.responses.write().await;
        let key = key.into();
        if !responses.contains_key(&key) && responses.len() >= MAX_CACHED_RESPONSES {
            if let Some(oldest) = oldest_key(&responses, |r| r.cached_at) {
                responses.remove(&oldest);
            }
        }
        responses.insert(
            key,
            CachedResponse {
                body,
                cached_at: Utc::now(),
            },
        );
    }

    pub async fn cached_response(&self, key: &str) -> Option<Value> {
        self.responses.read().await.get(key).map(|r| r.body.clone())
    }

    pub async fn response_count(&self) -> usize {
        self.responses.read().await.len()
    }

    async fn mark_synced(&self, pair: &str, at: DateTime<Utc>) {
        let mut synced = self.synced_pairs.write().await;
        if !synced.contains_key(pair) && synced.len() >= MAX_PRICE_PAIRS {
            if let Some(oldest) = oldest_key(&synced, |t| *t) {
                synced.remove(&oldest);
            }
        }
        synced.insert(pair.to_string(), at);
    }

    async fn set_price(&self, pair: &str, price: Option<f64>, at: DateTime<Utc>) {
        let mut prices = self.prices.write().await;
        if !prices.contains_key(pair) && prices.len() >= MAX_PRICE_PAIRS {
            if let Some(oldest) = oldest_key(&prices, |q| q.updated_at) {
                prices.remove(&oldest);
            }
        }
        let previous = prices.get(pair).and_then(|q| q.price);
        prices.insert(
            pair.to_string(),
            PriceQuote {
                price: price.or(previous),
                updated_at: at,
            },
        );
    }
}

fn oldest_key<V>(map: &BTreeMap<String, V>, at: impl Fn(&V) -> DateTime<Utc>) -> Option<String> {
    map.iter()
        .min_by_key(|(_, v)| at(v))
        .map(|(k, _)| k.clone())
}

fn string_list(payload: &Map<String, Value>, key: &str) -> Result<Option<Vec<String>>, DispatchError> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| DispatchError::InvalidPayload(format!("{} must contain strings", key)))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(DispatchError::InvalidPayload(format!("{} must be a list", key))),
    }
}

fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

async fn reload_signals(state: &HandlerState, store: &dyn BackendStore) -> Result<usize, DispatchError> {
    let signals = store.recent_signals(SIGNAL_REFRESH_LIMIT).await?;
    let count = signals.len();
    *state.signals.write().await = signals;
    Ok(count)
}

pub struct BackgroundSyncHandler {
    state: Arc<HandlerState>,
    store: Arc<dyn BackendStore>,
}

impl BackgroundSyncHandler {
    pub fn new(state: Arc<HandlerState>, store: Arc<dyn BackendStore>) -> Self {
        Self { state, store }
    }
}

#[async_trait]
impl SilentHandler for BackgroundSyncHandler {
    fn silent_type(&self) -> SilentType {
        SilentType::BackgroundSync
    }

    async fn handle(&self, payload: &Map<String, Value>) -> Result<Value, DispatchError> {
        let requested: Vec<String> = match payload.get("action").and_then(Value::as_str) {
            Some(action) => vec![action.to_string()],
            None => BACKGROUND_ACTIONS.iter().map(|a| a.to_string()).collect(),
        };

        let now = Utc::now();
        let mut completed = Vec::new();
        for action in &requested {
            match action.as_str() {
                "refresh-market-data" => {
                    let pairs: Vec<String> = self.state.prices.read().await.keys().cloned().collect();
                    for pair in pairs {
                        self.state.set_price(&pair, None, now).await;
                    }
                    completed.push("market-data-refreshed");
                }
                "sync-signals" => {
                    reload_signals(&self.state, self.store.as_ref()).await?;
                    completed.push("signals-synced");
                }
                "update-indicators" => {
                    *self.state.indicators_updated_at.write().await = Some(now);
                    completed.push("indicators-updated");
                }
                other => tracing::warn!("Skipping unknown background action {}", other),
            }
        }

        Ok(json!({ "actions": completed }))
    }
}

pub struct PriceUpdateHandler {
    state: Arc<HandlerState>,
}

impl PriceUpdateHandler {
    pub fn new(state: Arc<HandlerState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl SilentHandler for PriceUpdateHandler {
    fn silent_type(&self) -> SilentType {
        SilentType::PriceUpdate
    }

    async fn handle(&self, payload: &Map<String, Value>) -> Result<Value, DispatchError> {
        let mut pairs = string_list(payload, "pairs")?
            .map(dedup_preserving_order)
            .unwrap_or_else(|| DEFAULT_PRICE_PAIRS.iter().map(|p| p.to_string()).collect());
        if pairs.len() > MAX_PRICE_PAIRS {
            tracing::warn!("Price update for {} pairs truncated to {}", pairs.len(), MAX_PRICE_PAIRS);
            pairs.truncate(MAX_PRICE_PAIRS);
        }
        let prices = payload.get("prices").and_then(Value::as_object);

        let now = Utc::now();
        let mut updated = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let price = prices.and_then(|p| p.get(&pair)).and_then(Value::as_f64);
            self.state.set_price(&pair, price, now).await;

            let mut entry = json!({
                "pair": pair,
                "updated": true,
                "timestamp": now,
            });
            if let (Some(price), Some(obj)) = (price, entry.as_object_mut()) {
                obj.insert("price".to_string(), json!(price));
            }
            updated.push(entry);
        }

        Ok(json!({ "updatedPairs": updated }))
    }
}

pub struct SignalRefreshHandler {
    state: Arc<HandlerState>,
    store: Arc<dyn BackendStore>,
}

impl SignalRefreshHandler {
    pub fn new(state: Arc<HandlerState>, store: Arc<dyn BackendStore>) -> Self {
        Self { state, store }
    }
}

#[async_trait]
impl SilentHandler for SignalRefreshHandler {
    fn silent_type(&self) -> SilentType {
        SilentType::SignalRefresh
    }

    async fn handle(&self, _payload: &Map<String, Value>) -> Result<Value, DispatchError> {
        let count = reload_signals(&self.state, self.store.as_ref()).await?;
        Ok(json!({
            "signalsRefreshed": true,
            "count": count,
            "timestamp": Utc::now(),
        }))
    }
}

pub struct CacheInvalidateHandler {
    state: Arc<HandlerState>,
}

impl CacheInvalidateHandler {
    pub fn new(state: Arc<HandlerState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl SilentHandler for CacheInvalidateHandler {
    fn silent_type(&self) -> SilentType {
        SilentType::CacheInvalidate
    }

    async fn handle(&self, payload: &Map<String, Value>) -> Result<Value, DispatchError> {
        let prefix = payload.get("prefix").and_then(Value::as_str);
        let mut responses = self.state.responses.write().await;
        let before = responses.len();
        match prefix {
            Some(prefix) => responses.retain(|key, _| !key.starts_with(prefix)),
            None => responses.clear(),
        }
        let removed = before - responses.len();

        Ok(json!({
            "cacheCleared": true,
            "itemsRemoved": removed,
            "timestamp": Utc::now(),
        }))
    }
}

pub struct SystemMaintenanceHandler {
    state: Arc<HandlerState>,
    stale_after: Duration,
}

impl SystemMaintenanceHandler {
    pub fn new(state: Arc<HandlerState>) -> Self {
        Self {
            state,
            stale_after: Duration::hours(24),
        }
    }
}

#[async_trait]
impl SilentHandler for SystemMaintenanceHandler {
    fn silent_type(&self) -> SilentType {
        SilentType::SystemMaintenance
    }

    async fn handle(&self, _payload: &Map<String, Value>) -> Result<Value, DispatchError> {
        let cutoff = Utc::now() - self.stale_after;

        let pruned_prices = {
            let mut prices = self.state.prices.write().await;
            let before = prices.len();
            prices.retain(|_, q| q.updated_at >= cutoff);
            before - prices.len()
        };
        let pruned_responses = {
            let mut responses = self.state.responses.write().await;
            let before = responses.len();
            responses.retain(|_, r| r.cached_at >= cutoff);
            before - responses.len()
        };
        let pruned_pairs = {
            let mut synced = self.state.synced_pairs.write().await;
            let before = synced.len();
            synced.retain(|_, at| *at >= cutoff);
            before - synced.len()
        };
        tracing::debug!(
            "Maintenance pruned {} prices, {} responses, {} synced pairs",
            pruned_prices,
            pruned_responses,
            pruned_pairs
        );

        Ok(json!({
            "maintenanceCompleted": true,
            "tasksExecuted": ["prune-stale-prices", "trim-response-cache", "expire-synced-pairs"],
            "timestamp": Utc::now(),
        }))
    }
}

pub struct MarketDataSyncHandler {
    state: Arc<HandlerState>,
}

impl MarketDataSyncHandler {
    pub fn new(state: Arc<HandlerState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl SilentHandler for MarketDataSyncHandler {
    fn silent_type(&self) -> SilentType {
        SilentType::MarketDataSync
    }

    async fn handle(&self, payload: &Map<String, Value>) -> Result<Value, DispatchError> {
        let mut pairs = string_list(payload, "pairs")?
            .map(dedup_preserving_order)
            .unwrap_or_else(|| DEFAULT_SYNC_PAIRS.iter().map(|p| p.to_string()).collect());
        if pairs.len() > MAX_PRICE_PAIRS {
            tracing::warn!("Market data sync for {} pairs truncated to {}", pairs.len(), MAX_PRICE_PAIRS);
            pairs.truncate(MAX_PRICE_PAIRS);
        }

        let now = Utc::now();
        for pair in &pairs {
            self.state.mark_synced(pair, now).await;
        }

        Ok(json!({
            "dataSynced": true,
            "pairsUpdated": pairs,
            "timestamp": now,
        }))
    }
}

/// The six built-in handlers over shared state.
pub fn default_handlers(state: Arc<HandlerState>, store: Arc<dyn BackendStore>) -> Vec<Arc<dyn SilentHandler>> {
    vec![
        Arc::new(BackgroundSyncHandler::new(state.clone(), store.clone())),
        Arc::new(PriceUpdateHandler::new(state.clone())),
        Arc::new(SignalRefreshHandler::new(state.clone(), store)),
        Arc::new(CacheInvalidateHandler::new(state.clone())),
        Arc::new(SystemMaintenanceHandler::new(state.clone())),
        Arc::new(MarketDataSyncHandler::new(state)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use signals_core::memory::MemoryStore;
    use signals_core::types::SignalDirection;
    use uuid::Uuid;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_price_cache_is_bounded() {
        let state = Arc::new(HandlerState::new());
        let handler = PriceUpdateHandler::new(state.clone());
        let pairs: Vec<String> = (0..40).map(|i| format!("P{}/USD", i)).collect();

        let result = handler.handle(&payload(json!({ "pairs": pairs }))).await.unwrap();
        assert_eq!(result["updatedPairs"].as_array().unwrap().len(), MAX_PRICE_PAIRS);

        handler.handle(&payload(json!({ "pairs": ["NEW/USD"] }))).await.unwrap();
        assert_eq!(state.price_count().await, MAX_PRICE_PAIRS);
        assert!(state.price("NEW/USD").await.is_some());
    }

    #[tokio::test]
    async fn test_price_update_records_given_prices() {
        let state = Arc::new(HandlerState::new());
        let handler = PriceUpdateHandler::new(state.clone());

        let result = handler
            .handle(&payload(json!({ "pairs": ["XAU/USD"], "prices": { "XAU/USD": 2315.4 } })))
            .await
            .unwrap();
        assert_eq!(result["updatedPairs"][0]["price"], json!(2315.4));
        assert_eq!(state.price("XAU/USD").await.unwrap().price, Some(2315.4));

        // a later update without a price keeps the last known one
        handler.handle(&payload(json!({ "pairs": ["XAU/USD"] }))).await.unwrap();
        assert_eq!(state.price("XAU/USD").await.unwrap().price, Some(2315.4));
    }

    #[tokio::test]
    async fn test_price_update_rejects_malformed_pairs() {
        let handler = PriceUpdateHandler::new(Arc::new(HandlerState::new()));
        let err = handler.handle(&payload(json!({ "pairs": "XAU/USD" }))).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_signal_refresh_replaces_cache() {
        let store = Arc::new(MemoryStore::new());
        for pair in ["XAU/USD", "EUR/USD"] {
            store
                .insert_signal(Signal {
                    id: Uuid::new_v4(),
                    pair: pair.to_string(),
                    direction: SignalDirection::Buy,
                    entry_price: 1.0,
                    status: "active".to_string(),
                    created_at: Utc::now(),
                })
                .unwrap();
        }
        let state = Arc::new(HandlerState::new());
        let handler = SignalRefreshHandler::new(state.clone(), store);

        for _ in 0..2 {
            let result = handler.handle(&Map::new()).await.unwrap();
            assert_eq!(result["count"], 2);
            assert_eq!(state.cached_signals().await.len(), 2);
        }
    }

    #[tokio::test]
    async fn test_cache_invalidate_by_prefix() {
        let state = Arc::new(HandlerState::new());
        state.cache_response("signals:list", json!([])).await;
        state.cache_response("signals:7", json!({})).await;
        state.cache_response("prices:XAU", json!({})).await;
        let handler = CacheInvalidateHandler::new(state.clone());

        let result = handler.handle(&payload(json!({ "prefix": "signals:" }))).await.unwrap();
        assert_eq!(result["itemsRemoved"], 2);
        assert_eq!(state.response_count().await, 1);

        let result = handler.handle(&Map::new()).await.unwrap();
        assert_eq!(result["itemsRemoved"], 1);
        let result = handler.handle(&Map::new()).await.unwrap();
        assert_eq!(result["itemsRemoved"], 0);
    }

    #[tokio::test]
    async fn test_background_sync_single_action() {
        let state = Arc::new(HandlerState::new());
        let handler = BackgroundSyncHandler::new(state.clone(), Arc::new(MemoryStore::new()));

        let result = handler
            .handle(&payload(json!({ "action": "update-indicators" })))
            .await
            .unwrap();
        assert_eq!(result["actions"], json!(["indicators-updated"]));
        assert!(state.indicators_updated_at().await.is_some());

        let result = handler.handle(&Map::new()).await.unwrap();
        assert_eq!(
            result["actions"],
            json!(["market-data-refreshed", "signals-synced", "indicators-updated"])
        );
    }

    #[tokio::test]
    async fn test_market_data_sync_defaults() {
        let state = Arc::new(HandlerState::new());
        let handler = MarketDataSyncHandler::new(state.clone());
        let result = handler.handle(&Map::new()).await.unwrap();
        assert_eq!(result["pairsUpdated"], json!(["XAU/USD", "XAG/USD", "BTC/USD"]));
        assert_eq!(state.synced_pairs().await.len(), 3);
    }

    #[tokio::test]
    async fn test_market_data_sync_is_bounded() {
        let state = Arc::new(HandlerState::new());
        let handler = MarketDataSyncHandler::new(state.clone());
        let pairs: Vec<String> = (0..100).map(|i| format!("S{}/USD", i)).collect();

        let result = handler.handle(&payload(json!({ "pairs": pairs }))).await.unwrap();
        let updated = result["pairsUpdated"].as_array().unwrap();
        assert_eq!(updated.len(), MAX_PRICE_PAIRS);
        assert_eq!(updated[0], "S0/USD");
        assert_eq!(state.synced_pairs().await.len(), MAX_PRICE_PAIRS);

        handler.handle(&payload(json!({ "pairs": ["LATE/USD"] }))).await.unwrap();
        let synced = state.synced_pairs().await;
        assert_eq!(synced.len(), MAX_PRICE_PAIRS);
        assert!(synced.contains(&"LATE/USD".to_string()));
    }
}
