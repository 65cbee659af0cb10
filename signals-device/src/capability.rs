use async_trait::async_trait;
use signals_core::config::DeviceConfig;
use signals_core::types::{NotificationEnvelope, Platform};
use std::sync::Arc;

use crate::token::{
    NativePushPlatform, NativeTokenProvider, PlatformError, PushTokenProvider, WebPushPlatform,
    WebTokenProvider,
};

/// How periodic background sync is driven on a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundMode {
    /// An in-process timer fires every configured interval.
    Interval,
    /// No timer; the backend wakes the app with silent pushes.
    PushDriven,
}

/// Surfaces a visible notification to the user.
#[async_trait]
pub trait NotificationPresenter: Send + Sync {
    async fn present(&self, envelope: &NotificationEnvelope) -> Result<(), PlatformError>;
}

/// Presenter for headless processes: the notification goes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPresenter;

#[async_trait]
impl NotificationPresenter for LogPresenter {
    async fn present(&self, envelope: &NotificationEnvelope) -> Result<(), PlatformError> {
        tracing::info!(
            kind = envelope.kind().as_str(),
            deep_link = envelope.deep_link().unwrap_or(""),
            "Notification: {} - {}",
            envelope.title(),
            envelope.body()
        );
        Ok(())
    }
}

/// Everything platform-specific the notification core needs, selected once
/// at startup.
#[async_trait]
pub trait PlatformCapabilities: Send + Sync {
    fn platform(&self) -> Platform;

    async fn obtain_token(&self) -> Option<String>;

    async fn present_notification(&self, envelope: &NotificationEnvelope) -> Result<(), PlatformError>;

    fn schedule_background(&self) -> BackgroundMode;
}

struct WebCapabilities {
    tokens: WebTokenProvider,
    presenter: Arc<dyn NotificationPresenter>,
}

#[async_trait]
impl PlatformCapabilities for WebCapabilities {
    fn platform(&self) -> Platform {
        Platform::Web
    }

    async fn obtain_token(&self) -> Option<String> {
        self.tokens.obtain_token().await
    }

    async fn present_notification(&self, envelope: &NotificationEnvelope) -> Result<(), PlatformError> {
        self.presenter.present(envelope).await
    }

    fn schedule_background(&self) -> BackgroundMode {
        BackgroundMode::Interval
    }
}

struct NativeCapabilities {
    platform: Platform,
    tokens: NativeTokenProvider,
    presenter: Arc<dyn NotificationPresenter>,
}

#[async_trait]
impl PlatformCapabilities for NativeCapabilities {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn obtain_token(&self) -> Option<String> {
        self.tokens.obtain_token().await
    }

    async fn present_notification(&self, envelope: &NotificationEnvelope) -> Result<(), PlatformError> {
        self.presenter.present(envelope).await
    }

    fn schedule_background(&self) -> BackgroundMode {
        BackgroundMode::PushDriven
    }
}

/// Picks the capability set for `config.platform`.
pub fn select_capabilities<W, N>(
    config: &DeviceConfig,
    web: Arc<W>,
    native: Arc<N>,
    presenter: Arc<dyn NotificationPresenter>,
) -> Arc<dyn PlatformCapabilities>
where
    W: WebPushPlatform + 'static,
    N: NativePushPlatform + 'static,
{
    tracing::info!("Selecting {} platform capabilities", config.platform);
    match config.platform {
        Platform::Web => Arc::new(WebCapabilities {
            tokens: WebTokenProvider::new(web, config),
            presenter,
        }),
        platform => Arc::new(NativeCapabilities {
            platform,
            tokens: NativeTokenProvider::new(native, config),
            presenter,
        }),
    }
}
