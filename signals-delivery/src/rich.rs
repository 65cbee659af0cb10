use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use signals_core::deep_link::{DeepLink, LinkTarget};
use signals_core::types::{NotificationKind, Signal, SignalDirection};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const DEFAULT_ICON: &str = "/assets/images/icon.png";
pub const ANDROID_ICON: &str = "ic_notification";
pub const ANDROID_COLOR: &str = "#31954b";
pub const ANDROID_CHANNEL: &str = "trading_signals";
pub const APNS_CATEGORY: &str = "TRADING_SIGNAL";
pub const CLICK_ACTION: &str = "NOTIFICATION_CLICKED";
pub const WEBPUSH_TTL_SECS: u32 = 86_400;

const SIGNAL_IMAGE: &str =
    "https://images.pexels.com/photos/6801648/pexels-photo-6801648.jpeg?auto=compress&cs=tinysrgb&w=800&h=200";
const ACHIEVEMENT_IMAGE: &str =
    "https://images.pexels.com/photos/8370752/pexels-photo-8370752.jpeg?auto=compress&cs=tinysrgb&w=800&h=200";
const MARKET_IMAGE: &str =
    "https://images.pexels.com/photos/6802049/pexels-photo-6802049.jpeg?auto=compress&cs=tinysrgb&w=800&h=200";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action_id: String,
    pub label: String,
    pub icon: Option<String>,
}

impl NotificationAction {
    pub fn new(action_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            action_id: action_id.into(),
            label: label.into(),
            icon: None,
        }
    }
}

/// Action buttons shown when the sender supplies none.
pub fn default_actions(kind: NotificationKind) -> Vec<NotificationAction> {
    match kind {
        NotificationKind::Signal => vec![
            NotificationAction::new("view", "📈 View Signal"),
            NotificationAction::new("open_chart", "📊 Chart"),
            NotificationAction::new("dismiss", "❌ Dismiss"),
        ],
        NotificationKind::Achievement => vec![
            NotificationAction::new("view", "🏆 View"),
            NotificationAction::new("share", "📤 Share"),
            NotificationAction::new("dismiss", "❌ Dismiss"),
        ],
        NotificationKind::Announcement => vec![
            NotificationAction::new("view", "📖 Read More"),
            NotificationAction::new("dismiss", "❌ Dismiss"),
        ],
        NotificationKind::Alert => vec![
            NotificationAction::new("view", "⚠️ View Alert"),
            NotificationAction::new("dismiss", "❌ Dismiss"),
        ],
    }
}

/// A visible notification with optional image, action buttons and deep link.
#[derive(Debug, Clone, PartialEq)]
pub struct RichNotification {
    pub title: String,
    pub body: String,
    pub image: Option<String>,
    pub actions: Vec<NotificationAction>,
    pub deep_link: Option<DeepLink>,
    pub data: BTreeMap<String, String>,
}

/// Gateway data maps only carry strings.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn put_if_some(object: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(value) = value {
        object.insert(key.to_string(), Value::String(value.to_string()));
    }
}

impl RichNotification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            image: None,
            actions: Vec::new(),
            deep_link: None,
            data: BTreeMap::new(),
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_actions(mut self, actions: Vec<NotificationAction>) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_deep_link(mut self, link: DeepLink) -> Self {
        self.deep_link = Some(link);
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Builds the descriptor for a push request. A `deep_link` entry in the
    /// request data becomes the notification's link.
    pub fn from_push(kind: NotificationKind, title: &str, message: &str, data: Option<&Value>) -> Self {
        let mut rich = Self::new(title, message).with_actions(default_actions(kind));
        if let Some(Value::Object(map)) = data {
            for (key, value) in map {
                if key == "deep_link" {
                    if let Some(link) = value.as_str() {
                        rich.deep_link = Some(DeepLink::parse(link));
                    }
                    continue;
                }
                rich.data.insert(key.clone(), stringify(value));
            }
        }
        rich
    }

    pub fn signal(signal: &Signal) -> Self {
        let (emoji, direction) = match signal.direction {
            SignalDirection::Buy => ("📈", "BUY"),
            SignalDirection::Sell => ("📉", "SELL"),
        };
        let status_emoji = if signal.status == "active" { "🚀" } else { "🔄" };
        let id = signal.id.to_string();

        Self::new(
            format!("{} {} {} Signal", status_emoji, signal.pair, direction),
            format!("{} Entry: ${:.2} • Tap to view details", emoji, signal.entry_price),
        )
        .with_image(SIGNAL_IMAGE)
        .with_actions(vec![
            NotificationAction::new("view", "📈 View Signal"),
            NotificationAction::new("open_chart", "📊 Open Chart"),
            NotificationAction::new("dismiss", "❌ Dismiss"),
        ])
        .with_deep_link(DeepLink::new(LinkTarget::Signal).with_id(id.clone()))
        .with_data("signal_id", id)
        .with_data("pair", signal.pair.clone())
        .with_data("type", direction)
        .with_data("entry_price", signal.entry_price.to_string())
        .with_data("status", signal.status.clone())
    }

    pub fn achievement(title: &str, description: &str, achievement_type: &str) -> Self {
        Self::new(format!("🏆 Achievement Unlocked: {}", title), description)
            .with_image(ACHIEVEMENT_IMAGE)
            .with_actions(vec![
                NotificationAction::new("view", "🏆 View Achievement"),
                NotificationAction::new("share", "📤 Share"),
                NotificationAction::new("dismiss", "❌ Dismiss"),
            ])
            .with_deep_link(
                DeepLink::home()
                    .with_param("tab", "achievements")
                    .with_param("achievement", achievement_type),
            )
            .with_data("achievement_type", achievement_type)
            .with_data("achievement_title", title)
    }

    pub fn market_update(title: &str, message: &str, market: &str, sentiment: &str) -> Self {
        let emoji = match sentiment {
            "bullish" => "🐂",
            "bearish" => "🐻",
            _ => "📊",
        };

        Self::new(format!("{} Market Update: {}", emoji, title), message)
            .with_image(MARKET_IMAGE)
            .with_actions(vec![
                NotificationAction::new("view", "📊 View Market"),
                NotificationAction::new("open_chart", "📈 Open Chart"),
                NotificationAction::new("dismiss", "❌ Dismiss"),
            ])
            .with_deep_link(DeepLink::home().with_param("market", market))
            .with_data("market", market)
            .with_data("sentiment", sentiment)
            .with_data("update_type", "market_analysis")
    }

    pub fn deep_link_url(&self) -> Option<String> {
        self.deep_link.as_ref().map(DeepLink::generate)
    }

    /// String data delivered with every rendering. Caller data wins over the
    /// reserved keys.
    pub fn data_map(&self, notification_id: Uuid) -> Map<String, Value> {
        let mut data = Map::new();
        data.insert("notification_id".to_string(), Value::String(notification_id.to_string()));
        data.insert(
            "deep_link".to_string(),
            Value::String(self.deep_link_url().unwrap_or_default()),
        );
        data.insert("click_action".to_string(), Value::String(CLICK_ACTION.to_string()));
        for (key, value) in &self.data {
            data.insert(key.clone(), Value::String(value.clone()));
        }
        data
    }

    fn web_actions(&self) -> Vec<Value> {
        let actions = if self.actions.is_empty() {
            vec![
                NotificationAction::new("view", "📈 View Signal"),
                NotificationAction::new("dismiss", "❌ Dismiss"),
            ]
        } else {
            self.actions.clone()
        };

        actions
            .into_iter()
            .map(|a| {
                json!({
                    "action": a.action_id,
                    "title": a.label,
                    "icon": a.icon.unwrap_or_else(|| DEFAULT_ICON.to_string()),
                })
            })
            .collect()
    }

    /// Renders the gateway's per-token `message` document.
    pub fn to_gateway_message(&self, token: &str, notification_id: Uuid, icon: &str) -> Value {
        let link = self.deep_link_url();
        let image = self.image.as_deref();
        let data = self.data_map(notification_id);

        let mut notification = Map::new();
        notification.insert("title".to_string(), Value::String(self.title.clone()));
        notification.insert("body".to_string(), Value::String(self.body.clone()));
        put_if_some(&mut notification, "image", image);

        let mut web_notification = Map::new();
        web_notification.insert("icon".to_string(), Value::String(icon.to_string()));
        web_notification.insert("badge".to_string(), Value::String(icon.to_string()));
        put_if_some(&mut web_notification, "image", image);
        web_notification.insert("requireInteraction".to_string(), Value::Bool(true));
        web_notification.insert("actions".to_string(), Value::Array(self.web_actions()));

        let mut android_notification = Map::new();
        android_notification.insert("icon".to_string(), Value::String(ANDROID_ICON.to_string()));
        android_notification.insert("color".to_string(), Value::String(ANDROID_COLOR.to_string()));
        android_notification.insert("sound".to_string(), Value::String("default".to_string()));
        android_notification.insert("click_action".to_string(), Value::String(CLICK_ACTION.to_string()));
        put_if_some(&mut android_notification, "image", image);
        android_notification.insert("channel_id".to_string(), Value::String(ANDROID_CHANNEL.to_string()));

        let mut apns_payload = Map::new();
        apns_payload.insert(
            "aps".to_string(),
            json!({
                "alert": { "title": self.title, "body": self.body },
                "sound": "default",
                "badge": 1,
                "category": APNS_CATEGORY,
                "mutable-content": 1,
            }),
        );
        for (key, value) in &data {
            apns_payload.insert(key.clone(), value.clone());
        }

        json!({
            "message": {
                "token": token,
                "notification": notification,
                "data": data,
                "webpush": {
                    "headers": { "TTL": WEBPUSH_TTL_SECS.to_string(), "Urgency": "high" },
                    "notification": web_notification,
                    "fcm_options": { "link": link.unwrap_or_else(|| "/".to_string()) },
                },
                "android": {
                    "notification": android_notification,
                    "data": data,
                },
                "apns": { "payload": apns_payload },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_signal() -> Signal {
        Signal {
            id: Uuid::nil(),
            pair: "XAU/USD".to_string(),
            direction: SignalDirection::Buy,
            entry_price: 2315.4,
            status: "active".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_signal_builder() {
        let rich = RichNotification::signal(&sample_signal());
        assert_eq!(rich.title, "🚀 XAU/USD BUY Signal");
        assert_eq!(rich.body, "📈 Entry: $2315.40 • Tap to view details");
        assert_eq!(rich.actions.len(), 3);
        assert_eq!(
            rich.deep_link_url().unwrap(),
            format!("myapp://signal/{}", Uuid::nil())
        );
        assert_eq!(rich.data["type"], "BUY");
    }

    #[test]
    fn test_default_actions_per_kind() {
        assert_eq!(default_actions(NotificationKind::Signal)[1].action_id, "open_chart");
        assert_eq!(default_actions(NotificationKind::Achievement)[1].action_id, "share");
        assert_eq!(default_actions(NotificationKind::Announcement).len(), 2);
        assert_eq!(default_actions(NotificationKind::Alert)[0].label, "⚠️ View Alert");
    }

    #[test]
    fn test_gateway_message_shape() {
        let id = Uuid::new_v4();
        let rich = RichNotification::market_update("Gold rally", "Gold breaks 2300", "XAU", "bullish");
        let message = rich.to_gateway_message("tok-1", id, DEFAULT_ICON);
        let m = &message["message"];

        assert_eq!(m["token"], "tok-1");
        assert_eq!(m["data"]["notification_id"], id.to_string());
        assert_eq!(m["data"]["click_action"], CLICK_ACTION);
        assert_eq!(m["data"]["deep_link"], "myapp://home//market/XAU");
        assert_eq!(m["webpush"]["headers"]["TTL"], "86400");
        assert_eq!(m["webpush"]["headers"]["Urgency"], "high");
        assert_eq!(m["webpush"]["notification"]["requireInteraction"], true);
        assert_eq!(m["webpush"]["notification"]["actions"][0]["icon"], DEFAULT_ICON);
        assert_eq!(m["webpush"]["fcm_options"]["link"], "myapp://home//market/XAU");
        assert_eq!(m["android"]["notification"]["color"], ANDROID_COLOR);
        assert_eq!(m["android"]["notification"]["channel_id"], ANDROID_CHANNEL);
        assert_eq!(m["apns"]["payload"]["aps"]["category"], APNS_CATEGORY);
        assert_eq!(m["apns"]["payload"]["aps"]["mutable-content"], 1);
        assert_eq!(m["apns"]["payload"]["aps"]["badge"], 1);
        assert_eq!(m["apns"]["payload"]["market"], "XAU");
    }

    #[test]
    fn test_plain_push_renders_without_image_or_link() {
        let data = json!({ "signal_id": 42, "pair": "EUR/USD" });
        let rich = RichNotification::from_push(NotificationKind::Alert, "Heads up", "Volatility", Some(&data));
        let message = rich.to_gateway_message("tok", Uuid::nil(), DEFAULT_ICON);
        let m = &message["message"];

        assert!(m["notification"].get("image").is_none());
        assert_eq!(m["data"]["signal_id"], "42");
        assert_eq!(m["data"]["deep_link"], "");
        assert_eq!(m["webpush"]["fcm_options"]["link"], "/");
        assert_eq!(m["webpush"]["notification"]["actions"][0]["title"], "⚠️ View Alert");
    }

    #[test]
    fn test_push_data_deep_link_is_parsed() {
        let data = json!({ "deep_link": "myapp://chat/room-7" });
        let rich = RichNotification::from_push(NotificationKind::Announcement, "t", "b", Some(&data));
        assert_eq!(rich.deep_link_url().unwrap(), "myapp://chat/room-7");
        assert!(!rich.data.contains_key("deep_link"));
    }
}
