use chrono::Utc;
use signals_core::error::StoreError;
use signals_core::store::BackendStore;
use signals_core::types::{DeviceIdentity, DeviceProfile, Platform};
use std::sync::Arc;

use crate::token::PushTokenProvider;

/// Keeps this installation's `DeviceProfile` current in the backend store.
#[derive(Clone)]
pub struct DeviceRegistrar {
    store: Arc<dyn BackendStore>,
    identity: DeviceIdentity,
    platform: Platform,
    app_version: String,
}

impl DeviceRegistrar {
    pub fn new(
        store: Arc<dyn BackendStore>,
        identity: DeviceIdentity,
        platform: Platform,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            store,
            identity,
            platform,
            app_version: app_version.into(),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn profile(&self, delivery_token: Option<String>) -> DeviceProfile {
        DeviceProfile {
            identity: self.identity.clone(),
            delivery_token,
            platform: self.platform,
            app_version: self.app_version.clone(),
            last_active: Utc::now(),
        }
    }

    /// Creates a token-less profile if this device has none yet.
    pub async fn ensure_profile(&self) -> Result<DeviceProfile, StoreError> {
        if let Some(existing) = self.store.get_profile(&self.identity).await? {
            tracing::debug!("Device already registered: {}", self.identity);
            return Ok(existing);
        }

        let profile = self.profile(None);
        self.store.upsert_profile(&profile).await?;
        tracing::info!("Registered device profile {}", self.identity);
        Ok(profile)
    }

    /// Create-or-update keyed on identity. A `None` token keeps whatever
    /// token is already stored.
    pub async fn register(&self, token: Option<String>) -> Result<DeviceProfile, StoreError> {
        let token = match token {
            Some(token) => Some(token),
            None => self
                .store
                .get_profile(&self.identity)
                .await?
                .and_then(|p| p.delivery_token),
        };

        let profile = self.profile(token);
        self.store.upsert_profile(&profile).await?;
        tracing::info!(
            "Device {} registered (token: {})",
            self.identity,
            if profile.delivery_token.is_some() { "present" } else { "none" }
        );
        Ok(profile)
    }

    /// Obtains a token and stores it when it differs from the stored one.
    pub async fn refresh_token(&self, provider: &dyn PushTokenProvider) -> Result<Option<String>, StoreError> {
        let Some(token) = provider.obtain_token().await else {
            tracing::info!("No push token available for {}", self.identity);
            return Ok(None);
        };

        let stored = self
            .store
            .get_profile(&self.identity)
            .await?
            .and_then(|p| p.delivery_token);

        if stored.as_deref() != Some(token.as_str()) {
            self.register(Some(token.clone())).await?;
        } else {
            tracing::debug!("Push token unchanged for {}", self.identity);
        }
        Ok(Some(token))
    }

    pub async fn heartbeat(&self) -> Result<(), StoreError> {
        let token = self
            .store
            .get_profile(&self.identity)
            .await?
            .and_then(|p| p.delivery_token);
        self.store.upsert_profile(&self.profile(token)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use signals_core::memory::MemoryStore;
    use std::sync::Mutex;

    struct QueuedTokens(Mutex<Vec<Option<String>>>);

    #[async_trait]
    impl PushTokenProvider for QueuedTokens {
        async fn obtain_token(&self) -> Option<String> {
            self.0.lock().unwrap().remove(0)
        }
    }

    fn registrar(store: Arc<MemoryStore>) -> DeviceRegistrar {
        DeviceRegistrar::new(store, DeviceIdentity::new("device_1_abcdefghi"), Platform::Web, "1.0.0")
    }

    #[tokio::test]
    async fn test_ensure_profile_is_lazy_and_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let registrar = registrar(store.clone());

        let first = registrar.ensure_profile().await.unwrap();
        let second = registrar.ensure_profile().await.unwrap();
        assert_eq!(first, second);
        assert!(first.delivery_token.is_none());
    }

    #[tokio::test]
    async fn test_register_keeps_token_when_none_given() {
        let store = Arc::new(MemoryStore::new());
        let registrar = registrar(store.clone());

        registrar.register(Some("tok-1".to_string())).await.unwrap();
        let profile = registrar.register(None).await.unwrap();
        assert_eq!(profile.delivery_token.as_deref(), Some("tok-1"));

        let stored = store.get_profile(registrar.identity()).await.unwrap().unwrap();
        assert_eq!(stored.delivery_token.as_deref(), Some("tok-1"));
    }

    #[tokio::test]
    async fn test_refresh_token_updates_on_change_only() {
        let store = Arc::new(MemoryStore::new());
        let registrar = registrar(store.clone());
        let provider = QueuedTokens(Mutex::new(vec![
            Some("tok-1".to_string()),
            Some("tok-1".to_string()),
            Some("tok-2".to_string()),
            None,
        ]));

        assert_eq!(registrar.refresh_token(&provider).await.unwrap().as_deref(), Some("tok-1"));
        assert_eq!(registrar.refresh_token(&provider).await.unwrap().as_deref(), Some("tok-1"));
        assert_eq!(registrar.refresh_token(&provider).await.unwrap().as_deref(), Some("tok-2"));
        assert_eq!(registrar.refresh_token(&provider).await.unwrap(), None);

        let stored = store.get_profile(registrar.identity()).await.unwrap().unwrap();
        assert_eq!(stored.delivery_token.as_deref(), Some("tok-2"));
    }

    #[tokio::test]
    async fn test_heartbeat_bumps_last_active() {
        let store = Arc::new(MemoryStore::new());
        let registrar = registrar(store.clone());
        let before = registrar.register(Some("tok".to_string())).await.unwrap();

        registrar.heartbeat().await.unwrap();
        let after = store.get_profile(registrar.identity()).await.unwrap().unwrap();
        assert!(after.last_active >= before.last_active);
        assert_eq!(after.delivery_token.as_deref(), Some("tok"));
    }
}
