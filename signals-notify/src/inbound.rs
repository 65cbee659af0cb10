use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use signals_core::types::{NotificationEnvelope, NotificationKind};

const BACKGROUND_MARKER: &str = "background";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationContent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
}

/// A push message as delivered by the platform, before classification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub notification: Option<NotificationContent>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

fn str_field<'a>(data: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| data.get(*k).and_then(Value::as_str))
}

impl InboundMessage {
    pub fn new(data: Map<String, Value>) -> Self {
        Self {
            notification: None,
            data,
        }
    }

    pub fn with_notification(mut self, title: impl Into<String>, body: impl Into<String>) -> Self {
        self.notification = Some(NotificationContent {
            title: title.into(),
            body: body.into(),
        });
        self
    }

    pub fn handler_type(&self) -> Option<&str> {
        str_field(&self.data, &["type"])
    }

    /// Silent when flagged `silent` (bool or the string "true") or when the
    /// type names a background routine.
    pub fn is_silent(&self) -> bool {
        let flagged = match self.data.get("silent") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "true",
            _ => false,
        };
        flagged
            || self
                .handler_type()
                .is_some_and(|t| t.contains(BACKGROUND_MARKER))
    }

    pub fn into_envelope(self) -> NotificationEnvelope {
        if self.is_silent() {
            let handler_type = self.handler_type().map(str::to_string);
            // handler arguments travel nested under `payload`, or flat beside `type`
            let payload = match self.data.get("payload") {
                Some(Value::Object(nested)) => nested.clone(),
                _ => {
                    let mut flat = self.data.clone();
                    flat.remove("type");
                    flat.remove("silent");
                    flat
                }
            };
            return match handler_type {
                Some(t) => NotificationEnvelope::silent(t, payload),
                None => NotificationEnvelope::visible(NotificationKind::Alert, "Silent: unknown", "")
                    .with_data(payload)
                    .marked_silent(true),
            };
        }

        let kind = str_field(&self.data, &["kind", "type"])
            .and_then(|k| k.parse().ok())
            .unwrap_or(NotificationKind::Alert);
        let (title, body) = match &self.notification {
            Some(content) => (content.title.clone(), content.body.clone()),
            None => (
                str_field(&self.data, &["title"]).unwrap_or_default().to_string(),
                str_field(&self.data, &["body", "message"])
                    .unwrap_or_default()
                    .to_string(),
            ),
        };
        let deep_link = str_field(&self.data, &["deep_link", "deepLink"]).map(str::to_string);

        let envelope = NotificationEnvelope::visible(kind, title, body).with_data(self.data);
        match deep_link {
            Some(link) => envelope.with_deep_link(link),
            None => envelope,
        }
    }
}
