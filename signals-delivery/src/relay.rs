use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::report::{token_prefix, BatchReport, TokenResult, MAX_IN_FLIGHT};

pub const RELAY_TOKEN_PREFIX: &str = "ExponentPushToken";

pub fn is_relay_token(token: &str) -> bool {
    token.starts_with(RELAY_TOKEN_PREFIX)
}

#[derive(Debug, Serialize)]
struct RelayMessage<'a> {
    to: &'a str,
    sound: &'static str,
    title: &'a str,
    body: &'a str,
    data: &'a Map<String, Value>,
}

/// Sender for the third-party relay used by native builds.
pub struct RelaySender {
    client: reqwest::Client,
    url: String,
}

impl RelaySender {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub async fn send_batch(&self, tokens: &[String], title: &str, body: &str, data: &Map<String, Value>) -> BatchReport {
        let sends: Vec<_> = tokens
            .iter()
            .map(|token| async move {
                let message = RelayMessage {
                    to: token,
                    sound: "default",
                    title,
                    body,
                    data,
                };
                self.send_one(token, &message).await
            }
            .boxed())
            .collect();
        let details: Vec<TokenResult> = stream::iter(sends)
            .buffered(MAX_IN_FLIGHT)
            .collect()
            .await;

        let report = BatchReport::from_results(details);
        tracing::info!(
            "Relay batch results: {} sent, {} failed",
            report.total_sent,
            report.total_failed
        );
        report
    }

    async fn send_one(&self, token: &str, message: &RelayMessage<'_>) -> TokenResult {
        let response = match self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(message)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Relay request failed for {}: {}", token_prefix(token), e);
                return TokenResult::errored(token, e);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("Relay rejected {}: {} {}", token_prefix(token), status.as_u16(), body);
            return TokenResult::rejected(token, status.as_u16(), body);
        }

        let ticket = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|v| v.pointer("/data/id").and_then(Value::as_str).map(str::to_string));
        TokenResult::sent(token, ticket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_token_detection() {
        assert!(is_relay_token("ExponentPushToken[xxxxxxxx]"));
        assert!(!is_relay_token("fcm-token-abc"));
        assert!(!is_relay_token("exponentpushtoken[lower]"));
    }
}
