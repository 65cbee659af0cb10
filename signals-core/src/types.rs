use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ParseEnumError, UnknownHandlerType};

/// Stable per-installation identifier, `device_<millis>_<suffix>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceIdentity(String);

impl DeviceIdentity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
    Web,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Web => "web",
        }
    }

    pub fn is_native(&self) -> bool {
        !matches!(self, Platform::Web)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            "web" => Ok(Platform::Web),
            other => Err(ParseEnumError::new("platform", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub identity: DeviceIdentity,
    pub delivery_token: Option<String>,
    pub platform: Platform,
    pub app_version: String,
    pub last_active: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Signal,
    Achievement,
    Announcement,
    Alert,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Signal => "signal",
            NotificationKind::Achievement => "achievement",
            NotificationKind::Announcement => "announcement",
            NotificationKind::Alert => "alert",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signal" => Ok(NotificationKind::Signal),
            "achievement" => Ok(NotificationKind::Achievement),
            "announcement" => Ok(NotificationKind::Announcement),
            "alert" => Ok(NotificationKind::Alert),
            other => Err(ParseEnumError::new("notification kind", other)),
        }
    }
}

/// The closed set of background handler routines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SilentType {
    BackgroundSync,
    PriceUpdate,
    SignalRefresh,
    CacheInvalidate,
    SystemMaintenance,
    MarketDataSync,
}

impl SilentType {
    pub const ALL: [SilentType; 6] = [
        SilentType::BackgroundSync,
        SilentType::PriceUpdate,
        SilentType::SignalRefresh,
        SilentType::CacheInvalidate,
        SilentType::SystemMaintenance,
        SilentType::MarketDataSync,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SilentType::BackgroundSync => "background-sync",
            SilentType::PriceUpdate => "price-update",
            SilentType::SignalRefresh => "signal-refresh",
            SilentType::CacheInvalidate => "cache-invalidate",
            SilentType::SystemMaintenance => "system-maintenance",
            SilentType::MarketDataSync => "market-data-sync",
        }
    }
}

impl fmt::Display for SilentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SilentType {
    type Err = UnknownHandlerType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SilentType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownHandlerType(s.to_string()))
    }
}

/// Canonical notification record, silent or visible.
///
/// Fields are private; an envelope is built once and then only read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    kind: NotificationKind,
    silent_type: Option<String>,
    silent: bool,
    title: String,
    body: String,
    data: Map<String, Value>,
    deep_link: Option<String>,
    timestamp: DateTime<Utc>,
}

impl NotificationEnvelope {
    pub fn visible(kind: NotificationKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind,
            silent_type: None,
            silent: false,
            title: title.into(),
            body: body.into(),
            data: Map::new(),
            deep_link: None,
            timestamp: Utc::now(),
        }
    }

    /// Silent envelopes are always `alert` kind and carry no user-facing text.
    pub fn silent(silent_type: impl Into<String>, payload: Map<String, Value>) -> Self {
        let silent_type = silent_type.into();
        Self {
            kind: NotificationKind::Alert,
            title: format!("Silent: {}", silent_type),
            body: String::new(),
            silent_type: Some(silent_type),
            silent: true,
            data: payload,
            deep_link: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_deep_link(mut self, deep_link: impl Into<String>) -> Self {
        self.deep_link = Some(deep_link.into());
        self
    }

    pub fn with_silent_type(mut self, silent_type: impl Into<String>) -> Self {
        self.silent_type = Some(silent_type.into());
        self
    }

    pub fn marked_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn kind(&self) -> NotificationKind {
        self.kind
    }

    pub fn silent_type(&self) -> Option<&str> {
        self.silent_type.as_deref()
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn deep_link(&self) -> Option<&str> {
        self.deep_link.as_deref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SilentHandlerResult {
    pub success: bool,
    pub executed_at: DateTime<Utc>,
    pub handler_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SilentHandlerResult {
    pub fn succeeded(handler_name: impl Into<String>, result: Value) -> Self {
        Self {
            success: true,
            executed_at: Utc::now(),
            handler_name: handler_name.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(handler_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            executed_at: Utc::now(),
            handler_name: handler_name.into(),
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Row appended to the silent notification audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SilentAuditRecord {
    pub device_identity: String,
    pub handler_type: String,
    pub payload: Value,
    pub execution_time_ms: i64,
    pub success: bool,
    pub result: Value,
    pub error_message: Option<String>,
    pub platform: Platform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationEventType {
    Viewed,
    Clicked,
}

impl NotificationEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEventType::Viewed => "viewed",
            NotificationEventType::Clicked => "clicked",
        }
    }
}

impl fmt::Display for NotificationEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationEventType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "viewed" => Ok(NotificationEventType::Viewed),
            "clicked" => Ok(NotificationEventType::Clicked),
            other => Err(ParseEnumError::new("event type", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub user_identity: String,
    pub notification_id: Uuid,
    pub event_type: NotificationEventType,
    pub event_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
        }
    }
}

impl FromStr for NotificationStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NotificationStatus::Pending),
            "sent" => Ok(NotificationStatus::Sent),
            "failed" => Ok(NotificationStatus::Failed),
            other => Err(ParseEnumError::new("notification status", other)),
        }
    }
}

/// Server-side notification aggregate holding the engagement counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub data: Option<Value>,
    pub target_user: Option<String>,
    pub status: NotificationStatus,
    pub view_count: i32,
    pub click_count: i32,
    pub clicked_user_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub data: Option<Value>,
    pub target_user: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickAction {
    Default,
    View,
    Dismiss,
    OpenChart,
    Share,
}

impl ClickAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClickAction::Default => "default",
            ClickAction::View => "view",
            ClickAction::Dismiss => "dismiss",
            ClickAction::OpenChart => "open_chart",
            ClickAction::Share => "share",
        }
    }
}

impl FromStr for ClickAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "default" => Ok(ClickAction::Default),
            "view" => Ok(ClickAction::View),
            "dismiss" => Ok(ClickAction::Dismiss),
            "open_chart" => Ok(ClickAction::OpenChart),
            "share" => Ok(ClickAction::Share),
            other => Err(ParseEnumError::new("click action", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationClick {
    pub notification_id: Uuid,
    pub user_identity: String,
    pub action: ClickAction,
    pub clicked_at: DateTime<Utc>,
    pub platform: Platform,
    pub deep_link: Option<String>,
}

impl NotificationClick {
    /// The `clicked` event this click implies.
    pub fn to_event(&self) -> NotificationEvent {
        NotificationEvent {
            user_identity: self.user_identity.clone(),
            notification_id: self.notification_id,
            event_type: NotificationEventType::Clicked,
            event_time: self.clicked_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryLog {
    pub notification_id: Uuid,
    pub status: NotificationStatus,
    pub result: Value,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalDirection {
    Buy,
    Sell,
}

impl SignalDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalDirection::Buy => "BUY",
            SignalDirection::Sell => "SELL",
        }
    }
}

impl FromStr for SignalDirection {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BUY" => Ok(SignalDirection::Buy),
            "SELL" => Ok(SignalDirection::Sell),
            other => Err(ParseEnumError::new("signal direction", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub pair: String,
    pub direction: SignalDirection,
    pub entry_price: f64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Which device profiles a push is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "ids")]
pub enum RecipientFilter {
    All,
    User(String),
    Devices(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_type_round_trips_through_wire_names() {
        for t in SilentType::ALL {
            let parsed: SilentType = t.as_str().parse().unwrap();
            assert_eq!(parsed, t);
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
    }

    #[test]
    fn test_unknown_silent_type_is_rejected() {
        let err = "unknown-x".parse::<SilentType>().unwrap_err();
        assert!(err.to_string().contains("Unknown"));
        assert!(err.to_string().contains("unknown-x"));
    }

    #[test]
    fn test_silent_envelope_defaults() {
        let mut payload = Map::new();
        payload.insert("pairs".to_string(), serde_json::json!(["XAU/USD"]));
        let envelope = NotificationEnvelope::silent("price-update", payload);

        assert!(envelope.is_silent());
        assert_eq!(envelope.silent_type(), Some("price-update"));
        assert_eq!(envelope.kind(), NotificationKind::Alert);
        assert_eq!(envelope.data()["pairs"][0], "XAU/USD");
    }

    #[test]
    fn test_handler_result_serializes_camel_case() {
        let result = SilentHandlerResult::failed("unknown-x", "Unknown silent notification type: unknown-x");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["handlerName"], "unknown-x");
        assert!(json.get("executedAt").is_some());
        assert!(json.get("result").is_none());
    }

    #[test]
    fn test_click_action_parses_empty_as_default() {
        assert_eq!("".parse::<ClickAction>().unwrap(), ClickAction::Default);
        assert_eq!("open_chart".parse::<ClickAction>().unwrap(), ClickAction::OpenChart);
        assert!("poke".parse::<ClickAction>().is_err());
    }
}
