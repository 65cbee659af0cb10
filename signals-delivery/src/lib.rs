pub mod error;
pub mod fcm;
pub mod oauth;
pub mod relay;
pub mod report;
pub mod rich;
pub mod service;

pub use error::DeliveryError;
pub use fcm::GatewaySender;
pub use oauth::{AccessTokenSource, ServiceAccount, ServiceAccountTokenSource, StaticTokenSource};
pub use relay::{is_relay_token, RelaySender};
pub use report::{BatchReport, TokenResult, MAX_IN_FLIGHT};
pub use rich::{default_actions, NotificationAction, RichNotification};
pub use service::{partition_tokens, DeliveryService, PushOutcome, PushRequest};
