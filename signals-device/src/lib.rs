pub mod capability;
pub mod identity;
pub mod registration;
pub mod token;

pub use capability::{
    select_capabilities, BackgroundMode, LogPresenter, NotificationPresenter, PlatformCapabilities,
};
pub use identity::{clear_identity, resolve_identity, DEVICE_ID_KEY};
pub use registration::DeviceRegistrar;
pub use token::{
    HeadlessPlatform, NativePermission, NativePushPlatform, NativeTokenProvider, PlatformError,
    PushTokenProvider, WebPermission, WebPushPlatform, WebTokenProvider,
};
