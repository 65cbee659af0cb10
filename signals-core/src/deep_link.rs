use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use url::form_urlencoded;

pub const APP_SCHEME: &str = "myapp://";
pub const UNIVERSAL_PREFIX: &str = "https://tradingsignals.app/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkTarget {
    Signal,
    Chat,
    Offer,
    Settings,
    Home,
}

impl LinkTarget {
    pub const ALL: [LinkTarget; 5] = [
        LinkTarget::Signal,
        LinkTarget::Chat,
        LinkTarget::Offer,
        LinkTarget::Settings,
        LinkTarget::Home,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkTarget::Signal => "signal",
            LinkTarget::Chat => "chat",
            LinkTarget::Offer => "offer",
            LinkTarget::Settings => "settings",
            LinkTarget::Home => "home",
        }
    }

    fn from_segment(segment: &str) -> Option<Self> {
        LinkTarget::ALL.into_iter().find(|t| t.as_str() == segment)
    }
}

fn encode_segment(segment: &str) -> Cow<'_, str> {
    urlencoding::encode(segment)
}

/// Malformed escapes are kept verbatim.
fn decode_segment(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(Cow::into_owned)
        .unwrap_or_else(|_| segment.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeepLink {
    pub target: LinkTarget,
    pub id: Option<String>,
    pub params: BTreeMap<String, String>,
}

impl DeepLink {
    pub fn new(target: LinkTarget) -> Self {
        Self {
            target,
            id: None,
            params: BTreeMap::new(),
        }
    }

    pub fn home() -> Self {
        Self::new(LinkTarget::Home)
    }

    /// An empty id means no id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.id = (!id.is_empty()).then_some(id);
        self
    }

    /// Empty keys are ignored; empty values are kept.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        if !key.is_empty() {
            self.params.insert(key, value.into());
        }
        self
    }

    /// Parses either link format. Unrecognised or empty targets come back as
    /// `Home` rather than an error.
    pub fn parse(url: &str) -> Self {
        let rest = url
            .strip_prefix(APP_SCHEME)
            .or_else(|| url.strip_prefix(UNIVERSAL_PREFIX))
            .unwrap_or_else(|| match url.find("://") {
                Some(pos) => &url[pos + 3..],
                None => url,
            });

        let (path, query) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };

        let mut segments = path.split('/');
        let target = match segments.next().and_then(LinkTarget::from_segment) {
            Some(target) => target,
            None => {
                tracing::debug!("Deep link {} has no known target, routing home", url);
                return DeepLink::home();
            }
        };

        let id = segments
            .next()
            .filter(|s| !s.is_empty())
            .map(decode_segment);

        let mut params = BTreeMap::new();
        let rest: Vec<&str> = segments.collect();
        // pairs only; an odd trailing segment is dropped
        for pair in rest.chunks_exact(2) {
            if !pair[0].is_empty() {
                params.insert(decode_segment(pair[0]), decode_segment(pair[1]));
            }
        }

        if let Some(query) = query {
            for (key, value) in form_urlencoded::parse(query.as_bytes()) {
                params.insert(key.into_owned(), value.into_owned());
            }
        }

        DeepLink { target, id, params }
    }

    /// `myapp://type[/id][/key/value]*`, each segment percent-encoded. A link
    /// without an id but with params keeps an empty id segment so the pairs
    /// stay aligned.
    pub fn generate(&self) -> String {
        let mut url = format!("{}{}", APP_SCHEME, self.target.as_str());

        if self.id.is_some() || !self.params.is_empty() {
            url.push('/');
            url.push_str(&encode_segment(self.id.as_deref().unwrap_or("")));
        }

        for (key, value) in &self.params {
            url.push('/');
            url.push_str(&encode_segment(key));
            url.push('/');
            url.push_str(&encode_segment(value));
        }

        url
    }

    /// `https://tradingsignals.app/type[/id]?key=value&...`
    pub fn generate_universal(&self) -> String {
        let mut url = format!("{}{}", UNIVERSAL_PREFIX, self.target.as_str());

        if let Some(id) = &self.id {
            url.push('/');
            url.push_str(&encode_segment(id));
        }

        if !self.params.is_empty() {
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(self.params.iter())
                .finish();
            url.push('?');
            url.push_str(&query);
        }

        url
    }

    pub fn resolve(&self) -> Route {
        match (self.target, self.id.as_deref()) {
            (LinkTarget::Signal, id) => Route::Signals {
                id: id.map(str::to_string),
            },
            (LinkTarget::Chat, Some(id)) => Route::Chat(id.to_string()),
            (LinkTarget::Offer, Some(id)) => Route::Offer(id.to_string()),
            (LinkTarget::Settings, _) => Route::Settings,
            (LinkTarget::Chat | LinkTarget::Offer, None) | (LinkTarget::Home, _) => Route::Home,
        }
    }
}

impl fmt::Display for DeepLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.generate())
    }
}

/// In-app navigation destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "screen", content = "id")]
pub enum Route {
    Signals { id: Option<String> },
    Chat(String),
    Offer(String),
    Settings,
    Home,
}

impl Route {
    pub fn path(&self) -> String {
        match self {
            Route::Signals { id: Some(id) } => format!("/(tabs)/signals?id={}", id),
            Route::Signals { id: None } => "/(tabs)/signals".to_string(),
            Route::Chat(id) => format!("/chat/{}", id),
            Route::Offer(id) => format!("/offer/{}", id),
            Route::Settings => "/(tabs)/settings".to_string(),
            Route::Home => "/(tabs)/".to_string(),
        }
    }
}

/// Parses and resolves in one step; anything unusable lands on `Route::Home`.
pub fn resolve_url(url: &str) -> Route {
    DeepLink::parse(url).resolve()
}
