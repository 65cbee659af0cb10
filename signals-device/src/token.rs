use async_trait::async_trait;
use signals_core::config::DeviceConfig;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebPermission {
    Granted,
    Denied,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativePermission {
    Authorized,
    Provisional,
    Denied,
    NotDetermined,
}

impl NativePermission {
    pub fn allows_delivery(&self) -> bool {
        matches!(self, NativePermission::Authorized | NativePermission::Provisional)
    }
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("not supported on this platform: {0}")]
    Unsupported(String),

    #[error("platform call failed: {0}")]
    Transport(String),
}

/// Service-worker registration the web token is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagingHandle {
    pub scope: String,
}

/// Browser push APIs.
#[async_trait]
pub trait WebPushPlatform: Send + Sync {
    async fn request_permission(&self) -> Result<WebPermission, PlatformError>;

    /// `None` when the browser has no service worker or push support.
    async fn messaging_handle(&self) -> Result<Option<MessagingHandle>, PlatformError>;

    async fn get_token(
        &self,
        handle: &MessagingHandle,
        vapid_public_key: &str,
    ) -> Result<Option<String>, PlatformError>;
}

/// Mobile OS push APIs.
#[async_trait]
pub trait NativePushPlatform: Send + Sync {
    async fn request_permission(&self) -> Result<NativePermission, PlatformError>;

    async fn get_token(&self, project_id: &str) -> Result<Option<String>, PlatformError>;
}

/// Obtains a delivery token for this installation.
///
/// `None` covers permission denial, unsupported platforms and missing
/// configuration alike; none of those are errors.
#[async_trait]
pub trait PushTokenProvider: Send + Sync {
    async fn obtain_token(&self) -> Option<String>;
}

pub struct WebTokenProvider {
    platform: Arc<dyn WebPushPlatform>,
    project_id: Option<String>,
    vapid_public_key: Option<String>,
}

impl WebTokenProvider {
    pub fn new(platform: Arc<dyn WebPushPlatform>, config: &DeviceConfig) -> Self {
        if config.vapid_public_key.is_none() || config.project_id.is_none() {
            tracing::warn!("Web push disabled (missing VAPID key or project id)");
        }
        Self {
            platform,
            project_id: config.project_id.clone(),
            vapid_public_key: config.vapid_public_key.clone(),
        }
    }

    async fn try_obtain(&self, vapid_key: &str) -> Result<Option<String>, PlatformError> {
        let permission = self.platform.request_permission().await?;
        if permission != WebPermission::Granted {
            tracing::info!("Web notification permission is {:?}", permission);
            return Ok(None);
        }

        let Some(handle) = self.platform.messaging_handle().await? else {
            tracing::info!("Push messaging not supported in this browser");
            return Ok(None);
        };

        self.platform.get_token(&handle, vapid_key).await
    }
}

#[async_trait]
impl PushTokenProvider for WebTokenProvider {
    async fn obtain_token(&self) -> Option<String> {
        let (Some(vapid_key), Some(_)) = (&self.vapid_public_key, &self.project_id) else {
            return None;
        };

        match self.try_obtain(vapid_key).await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("Failed to obtain web push token: {}", e);
                None
            }
        }
    }
}

pub struct NativeTokenProvider {
    platform: Arc<dyn NativePushPlatform>,
    project_id: Option<String>,
    is_physical_device: bool,
}

impl NativeTokenProvider {
    pub fn new(platform: Arc<dyn NativePushPlatform>, config: &DeviceConfig) -> Self {
        if config.project_id.is_none() {
            tracing::warn!("Native push disabled (missing project id)");
        }
        Self {
            platform,
            project_id: config.project_id.clone(),
            is_physical_device: config.is_physical_device,
        }
    }

    async fn try_obtain(&self, project_id: &str) -> Result<Option<String>, PlatformError> {
        let permission = self.platform.request_permission().await?;
        if !permission.allows_delivery() {
            tracing::info!("Native notification permission is {:?}", permission);
            return Ok(None);
        }
        self.platform.get_token(project_id).await
    }
}

#[async_trait]
impl PushTokenProvider for NativeTokenProvider {
    async fn obtain_token(&self) -> Option<String> {
        if !self.is_physical_device {
            tracing::info!("Push tokens require a physical device");
            return None;
        }
        let project_id = self.project_id.as_deref()?;

        match self.try_obtain(project_id).await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("Failed to obtain native push token: {}", e);
                None
            }
        }
    }
}

/// Platform ports for processes without a browser or OS push stack. Grants
/// permission and hands out a token supplied at startup, if any.
#[derive(Debug, Clone, Default)]
pub struct HeadlessPlatform {
    token: Option<String>,
}

impl HeadlessPlatform {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

#[async_trait]
impl WebPushPlatform for HeadlessPlatform {
    async fn request_permission(&self) -> Result<WebPermission, PlatformError> {
        Ok(WebPermission::Granted)
    }

    async fn messaging_handle(&self) -> Result<Option<MessagingHandle>, PlatformError> {
        Ok(Some(MessagingHandle {
            scope: "/".to_string(),
        }))
    }

    async fn get_token(&self, _handle: &MessagingHandle, _vapid_public_key: &str) -> Result<Option<String>, PlatformError> {
        Ok(self.token.clone())
    }
}

#[async_trait]
impl NativePushPlatform for HeadlessPlatform {
    async fn request_permission(&self) -> Result<NativePermission, PlatformError> {
        Ok(NativePermission::Authorized)
    }

    async fn get_token(&self, _project_id: &str) -> Result<Option<String>, PlatformError> {
        Ok(self.token.clone())
    }
}
