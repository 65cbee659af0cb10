use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use signals_core::config::DeliveryConfig;
use tokio::sync::Mutex;

use crate::error::DeliveryError;

pub const MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

const ASSERTION_LIFETIME_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;

/// Supplies bearer tokens for the push gateway.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, DeliveryError>;
}

/// A fixed token, for tests and for deployments that mint tokens elsewhere.
#[derive(Debug, Clone)]
pub struct StaticTokenSource(String);

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl AccessTokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<String, DeliveryError> {
        Ok(self.0.clone())
    }
}

#[derive(Clone, Deserialize)]
pub struct ServiceAccount {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

impl std::fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("client_email", &self.client_email)
            .field("private_key", &"***")
            .field("token_uri", &self.token_uri)
            .field("project_id", &self.project_id)
            .finish()
    }
}

impl ServiceAccount {
    pub fn from_json(raw: &str) -> Result<Self, DeliveryError> {
        let account: ServiceAccount = serde_json::from_str(raw)?;
        if account.client_email.is_empty() || account.private_key.is_empty() {
            return Err(DeliveryError::InvalidCredential(
                "client_email and private_key are required".to_string(),
            ));
        }
        Ok(account)
    }

    /// Inline JSON takes precedence over a credential file.
    pub async fn from_config(config: &DeliveryConfig) -> Result<Option<Self>, DeliveryError> {
        if let Some(raw) = &config.service_account_json {
            return Self::from_json(raw).map(Some);
        }
        if let Some(path) = &config.service_account_path {
            let raw = tokio::fs::read_to_string(path).await?;
            return Self::from_json(&raw).map(Some);
        }
        Ok(None)
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Exchanges a signed service-account assertion for a bearer token and
/// caches it until shortly before expiry.
pub struct ServiceAccountTokenSource {
    client: reqwest::Client,
    account: Option<ServiceAccount>,
    token_url: String,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenSource {
    pub fn new(client: reqwest::Client, account: Option<ServiceAccount>, token_url: impl Into<String>) -> Self {
        Self {
            client,
            account,
            token_url: token_url.into(),
            cached: Mutex::new(None),
        }
    }

    fn sign_assertion(&self, account: &ServiceAccount, now: DateTime<Utc>) -> Result<String, DeliveryError> {
        let iat = now.timestamp();
        let claims = Claims {
            iss: &account.client_email,
            scope: MESSAGING_SCOPE,
            aud: &self.token_url,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())?;
        Ok(encode(&Header::new(Algorithm::RS256), &claims, &key)?)
    }

    async fn exchange(&self, account: &ServiceAccount) -> Result<CachedToken, DeliveryError> {
        let now = Utc::now();
        let assertion = self.sign_assertion(account, now)?;

        let response = self
            .client
            .post(&self.token_url)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::TokenExchange(format!("{}: {}", status.as_u16(), body)));
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = token.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS);
        tracing::debug!("Obtained gateway access token valid for {}s", lifetime);

        Ok(CachedToken {
            token: token.access_token,
            expires_at: now + Duration::seconds(lifetime),
        })
    }
}

#[async_trait]
impl AccessTokenSource for ServiceAccountTokenSource {
    async fn access_token(&self) -> Result<String, DeliveryError> {
        let account = self
            .account
            .as_ref()
            .ok_or_else(|| DeliveryError::ConfigMissing("gateway service credential".to_string()))?;

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Utc::now() + Duration::seconds(REFRESH_MARGIN_SECS) < token.expires_at {
                return Ok(token.token.clone());
            }
        }

        let fresh = self.exchange(account).await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }
}
