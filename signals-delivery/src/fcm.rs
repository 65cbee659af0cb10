use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::DeliveryError;
use crate::oauth::AccessTokenSource;
use crate::report::{token_prefix, BatchReport, TokenResult, MAX_IN_FLIGHT};
use crate::rich::RichNotification;

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    name: Option<String>,
}

/// Per-token sender for the push gateway's v1 HTTP API.
pub struct GatewaySender {
    client: reqwest::Client,
    base_url: String,
    project_id: Option<String>,
    tokens: Arc<dyn AccessTokenSource>,
    icon: String,
}

impl GatewaySender {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        project_id: Option<String>,
        tokens: Arc<dyn AccessTokenSource>,
        icon: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            project_id,
            tokens,
            icon: icon.into(),
        }
    }

    fn endpoint(&self) -> Result<String, DeliveryError> {
        let project_id = self
            .project_id
            .as_deref()
            .ok_or_else(|| DeliveryError::ConfigMissing("gateway project id".to_string()))?;
        Ok(format!("{}/v1/projects/{}/messages:send", self.base_url, project_id))
    }

    async fn prepare(&self) -> Result<(String, String), DeliveryError> {
        let endpoint = self.endpoint()?;
        let bearer = self.tokens.access_token().await?;
        Ok((endpoint, bearer))
    }

    /// Sends one message per token. A missing credential or project fails
    /// every token in the batch; otherwise each token stands alone.
    pub async fn send_batch(
        &self,
        tokens: &[String],
        notification: &RichNotification,
        notification_id: Uuid,
    ) -> BatchReport {
        let (endpoint, bearer) = match self.prepare().await {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::error!("Gateway delivery unavailable: {}", e);
                let message = e.to_string();
                return BatchReport::from_results(
                    tokens.iter().map(|t| TokenResult::errored(t, &message)).collect(),
                );
            }
        };

        let (endpoint, bearer) = (&endpoint, &bearer);
        let sends: Vec<_> = tokens
            .iter()
            .map(|token| {
                let message = notification.to_gateway_message(token, notification_id, &self.icon);
                async move { self.send_one(endpoint, bearer, token, &message).await }.boxed()
            })
            .collect();
        let details: Vec<TokenResult> = stream::iter(sends)
            .buffered(MAX_IN_FLIGHT)
            .collect()
            .await;

        let report = BatchReport::from_results(details);
        tracing::info!(
            "Gateway batch results: {} sent, {} failed",
            report.total_sent,
            report.total_failed
        );
        report
    }

    async fn send_one(&self, endpoint: &str, bearer: &str, token: &str, message: &serde_json::Value) -> TokenResult {
        let response = match self
            .client
            .post(endpoint)
            .bearer_auth(bearer)
            .json(message)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Gateway request failed for {}: {}", token_prefix(token), e);
                return TokenResult::errored(token, e);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                "Gateway rejected {}: {} {}",
                token_prefix(token),
                status.as_u16(),
                body
            );
            return TokenResult::rejected(token, status.as_u16(), body);
        }

        let message_id = response
            .json::<SendResponse>()
            .await
            .ok()
            .and_then(|r| r.name);
        tracing::debug!("Gateway accepted {}: {:?}", token_prefix(token), message_id);
        TokenResult::sent(token, message_id)
    }
}
