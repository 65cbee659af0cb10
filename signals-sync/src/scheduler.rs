use chrono::Utc;
use serde_json::{Map, Value};
use signals_core::storage::LocalStorage;
use signals_core::types::{NotificationEnvelope, SilentHandlerResult, SilentType};
use signals_device::BackgroundMode;
use signals_notify::Dispatcher;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::{SyncConfig, SyncConfigPatch, SyncError, SYNC_CONFIG_KEY};

/// Drives the dispatcher's silent path on a fixed cadence.
///
/// Cheap to clone; all clones share one timer and one config.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    dispatcher: Arc<Dispatcher>,
    storage: Arc<dyn LocalStorage>,
    config: Mutex<SyncConfig>,
    mode: Mutex<Option<BackgroundMode>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    /// Bumped on every re-arm; a timer loop exits once it sees a newer value.
    generation: watch::Sender<u64>,
}

impl SyncScheduler {
    pub fn new(dispatcher: Arc<Dispatcher>, storage: Arc<dyn LocalStorage>) -> Self {
        Self {
            inner: Arc::new(Inner {
                dispatcher,
                storage,
                config: Mutex::new(SyncConfig::default()),
                mode: Mutex::new(None),
                timer: Mutex::new(None),
                generation: watch::channel(0).0,
            }),
        }
    }

    /// Loads the stored config and arms the timer when the platform keeps
    /// its own cadence. Calling it again is a no-op.
    pub async fn initialize(&self, mode: BackgroundMode) {
        let mut current_mode = self.inner.mode.lock().await;
        if current_mode.is_some() {
            tracing::debug!("Sync scheduler already initialized");
            return;
        }

        let config = match self.inner.storage.get_item(SYNC_CONFIG_KEY).await {
            Ok(Some(raw)) => SyncConfig::from_stored(&raw),
            Ok(None) => SyncConfig::default(),
            Err(e) => {
                tracing::warn!("Failed to load sync config, using defaults: {}", e);
                SyncConfig::default()
            }
        };

        tracing::info!(
            "Sync scheduler initialized: enabled={} interval={}m types={:?} mode={:?}",
            config.enabled,
            config.interval_minutes,
            config.allowed_types,
            mode
        );

        let arm = config.enabled && mode == BackgroundMode::Interval;
        let period = config.period();
        *self.inner.config.lock().await = config;
        *current_mode = Some(mode);
        drop(current_mode);

        if arm {
            self.inner.arm_timer(period).await;
        }
    }

    pub async fn config(&self) -> SyncConfig {
        self.inner.config.lock().await.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.inner
            .timer
            .lock()
            .await
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// One scheduled pass. Skipped entirely while sync is disabled.
    pub async fn run_scheduled_sync(&self) -> Vec<SilentHandlerResult> {
        self.inner.run_scheduled_sync().await
    }

    /// Runs `types` (or the configured types) right away, ignoring the
    /// enabled flag and the timer.
    pub async fn trigger_manual_sync(&self, types: Option<Vec<SilentType>>) -> Vec<SilentHandlerResult> {
        let types = match types {
            Some(types) => types,
            None => self.inner.config.lock().await.allowed_types.clone(),
        };
        tracing::info!("Manual sync requested for {:?}", types);

        let mut payload = Map::new();
        payload.insert("trigger".to_string(), Value::String("manual".to_string()));

        let mut results = Vec::with_capacity(types.len());
        for silent_type in types {
            let envelope = NotificationEnvelope::silent(silent_type.as_str(), payload.clone());
            results.push(self.inner.dispatcher.handle_silent_notification(&envelope).await);
        }

        self.inner.touch_last_sync().await;
        results
    }

    /// Disabling lets an in-flight pass finish; later ticks do nothing.
    pub async fn set_enabled(&self, enabled: bool) {
        let (snapshot, period) = {
            let mut config = self.inner.config.lock().await;
            config.enabled = enabled;
            (config.clone(), config.period())
        };
        self.inner.persist(&snapshot).await;
        tracing::info!("Background sync {}", if enabled { "enabled" } else { "disabled" });

        if enabled && self.inner.uses_interval().await && !self.is_running().await {
            self.inner.arm_timer(period).await;
        }
    }

    pub async fn update_config(&self, patch: SyncConfigPatch) -> Result<SyncConfig, SyncError> {
        let (updated, interval_changed) = {
            let mut config = self.inner.config.lock().await;
            let updated = config.merge(&patch)?;
            let interval_changed = updated.interval_minutes != config.interval_minutes;
            *config = updated.clone();
            (updated, interval_changed)
        };
        self.inner.persist(&updated).await;

        if updated.enabled && self.inner.uses_interval().await && (interval_changed || !self.is_running().await) {
            self.inner.arm_timer(updated.period()).await;
        }
        Ok(updated)
    }

    pub async fn shutdown(&self) {
        if let Some(handle) = self.inner.timer.lock().await.take() {
            handle.abort();
            tracing::info!("Sync scheduler stopped");
        }
    }
}

impl Inner {
    async fn uses_interval(&self) -> bool {
        *self.mode.lock().await == Some(BackgroundMode::Interval)
    }

    /// Starts a timer loop at `period`. A loop it replaces is not aborted: a
    /// pass already running completes, then that loop exits.
    async fn arm_timer(self: &Arc<Self>, period: Duration) {
        let mut timer = self.timer.lock().await;

        let mut generation = 0;
        self.generation.send_modify(|g| {
            *g += 1;
            generation = *g;
        });
        let mut superseded = self.generation.subscribe();
        let weak: Weak<Inner> = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = superseded.wait_for(|g| *g != generation) => break,
                    _ = ticker.tick() => {}
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.run_scheduled_sync().await;
            }
            tracing::debug!("Sync timer generation {} stopped", generation);
        });

        *timer = Some(handle);
        tracing::debug!("Sync timer armed every {}s", period.as_secs());
    }

    async fn run_scheduled_sync(&self) -> Vec<SilentHandlerResult> {
        let types = {
            let config = self.config.lock().await;
            if !config.enabled {
                tracing::debug!("Background sync disabled, skipping tick");
                return Vec::new();
            }
            config.allowed_types.clone()
        };

        let mut results = Vec::with_capacity(types.len());
        for silent_type in types {
            results.push(self.dispatcher.dispatch_type(silent_type).await);
        }

        let failed = results.iter().filter(|r| !r.success).count();
        if failed > 0 {
            tracing::warn!("Background sync finished with {} of {} handlers failing", failed, results.len());
        } else {
            tracing::info!("Background sync finished: {} handlers", results.len());
        }

        self.touch_last_sync().await;
        results
    }

    async fn touch_last_sync(&self) {
        let snapshot = {
            let mut config = self.config.lock().await;
            config.last_sync = Utc::now();
            config.clone()
        };
        self.persist(&snapshot).await;
    }

    async fn persist(&self, config: &SyncConfig) {
        let raw = match serde_json::to_string(config) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Failed to serialize sync config: {}", e);
                return;
            }
        };
        if let Err(e) = self.storage.set_item(SYNC_CONFIG_KEY, &raw).await {
            tracing::warn!("Failed to persist sync config: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signals_core::memory::MemoryStore;
    use signals_core::storage::MemoryStorage;
    use signals_core::types::{DeviceIdentity, Platform};

    struct Harness {
        store: Arc<MemoryStore>,
        storage: Arc<MemoryStorage>,
        scheduler: SyncScheduler,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let storage = Arc::new(MemoryStorage::new());
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            DeviceIdentity::new("device_1_abcdefghi"),
            Platform::Web,
        ));
        let scheduler = SyncScheduler::new(dispatcher, storage.clone());
        Harness {
            store,
            storage,
            scheduler,
        }
    }

    const FIFTEEN_MINUTES: Duration = Duration::from_secs(15 * 60);

    #[tokio::test(start_paused = true)]
    async fn test_tick_runs_configured_types_in_order() {
        let h = harness();
        h.scheduler.initialize(BackgroundMode::Interval).await;
        assert!(h.scheduler.is_running().await);

        tokio::time::sleep(FIFTEEN_MINUTES - Duration::from_secs(1)).await;
        assert!(h.store.audit_records().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let audit = h.store.audit_records();
        let handlers: Vec<_> = audit.iter().map(|a| a.handler_type.as_str()).collect();
        assert_eq!(handlers, vec!["background-sync", "price-update", "signal-refresh"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_mid_interval_stops_ticks_but_not_manual_sync() {
        let h = harness();
        h.scheduler.initialize(BackgroundMode::Interval).await;

        tokio::time::sleep(Duration::from_secs(5 * 60)).await;
        h.scheduler.set_enabled(false).await;
        tokio::time::sleep(FIFTEEN_MINUTES * 2).await;
        assert!(h.store.audit_records().is_empty());

        let results = h
            .scheduler
            .trigger_manual_sync(Some(vec![SilentType::CacheInvalidate]))
            .await;
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        let audit = h.store.audit_records();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].payload["trigger"], "manual");

        let stored = h.storage.get_item(SYNC_CONFIG_KEY).await.unwrap().unwrap();
        assert!(!SyncConfig::from_stored(&stored).enabled);
    }

    #[tokio::test]
    async fn test_zero_interval_update_is_rejected() {
        let h = harness();
        h.scheduler.initialize(BackgroundMode::PushDriven).await;

        let err = h
            .scheduler
            .update_config(SyncConfigPatch::interval(0))
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::InvalidInterval);
        assert_eq!(h.scheduler.config().await.interval_minutes, 15);
    }

    #[tokio::test]
    async fn test_persisted_config_is_reloaded() {
        let h = harness();
        h.storage
            .set_item(
                SYNC_CONFIG_KEY,
                r#"{"enabled": true, "interval": 30, "types": ["market-data-sync"]}"#,
            )
            .await
            .unwrap();

        h.scheduler.initialize(BackgroundMode::PushDriven).await;
        let config = h.scheduler.config().await;
        assert_eq!(config.interval_minutes, 30);
        assert_eq!(config.allowed_types, vec![SilentType::MarketDataSync]);
    }

    #[tokio::test]
    async fn test_push_driven_mode_arms_no_timer() {
        let h = harness();
        h.scheduler.initialize(BackgroundMode::PushDriven).await;
        assert!(!h.scheduler.is_running().await);

        h.scheduler.set_enabled(true).await;
        assert!(!h.scheduler.is_running().await);

        let results = h.scheduler.trigger_manual_sync(None).await;
        assert_eq!(results.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_initialize_is_noop() {
        let h = harness();
        h.scheduler.initialize(BackgroundMode::Interval).await;
        h.storage
            .set_item(SYNC_CONFIG_KEY, r#"{"interval": 60}"#)
            .await
            .unwrap();
        h.scheduler.initialize(BackgroundMode::PushDriven).await;

        assert_eq!(h.scheduler.config().await.interval_minutes, 15);
        assert!(h.scheduler.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_rearms_timer() {
        let h = harness();
        h.scheduler.initialize(BackgroundMode::Interval).await;
        h.scheduler
            .update_config(SyncConfigPatch::interval(1))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(h.store.audit_records().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_lets_running_pass_finish() {
        let h = harness();
        h.store.inject_audit_latency(Duration::from_secs(10));
        h.scheduler.initialize(BackgroundMode::Interval).await;

        // first pass starts at 15:00 and audits one handler every 10s
        tokio::time::sleep(FIFTEEN_MINUTES + Duration::from_secs(5)).await;
        assert!(h.store.audit_records().is_empty());
        h.scheduler
            .update_config(SyncConfigPatch::interval(1))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        let audit = h.store.audit_records();
        let handlers: Vec<_> = audit.iter().map(|a| a.handler_type.as_str()).collect();
        assert_eq!(handlers, vec!["background-sync", "price-update", "signal-refresh"]);

        // the re-armed timer first fires at 16:05
        tokio::time::sleep(Duration::from_secs(70)).await;
        assert_eq!(h.store.audit_records().len(), 6);
        assert!(h.scheduler.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_interval_update_is_rejected_while_running() {
        let h = harness();
        h.scheduler.initialize(BackgroundMode::Interval).await;

        let err = h
            .scheduler
            .update_config(SyncConfigPatch::interval(1u64 << 62))
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::InvalidInterval);
        assert!(h.scheduler.is_running().await);
        assert_eq!(h.scheduler.config().await.interval_minutes, 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_timer() {
        let h = harness();
        h.scheduler.initialize(BackgroundMode::Interval).await;
        h.scheduler.shutdown().await;
        tokio::task::yield_now().await;

        assert!(!h.scheduler.is_running().await);
        tokio::time::sleep(FIFTEEN_MINUTES * 2).await;
        assert!(h.store.audit_records().is_empty());
    }
}
