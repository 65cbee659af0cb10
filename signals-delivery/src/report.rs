use serde::{Deserialize, Serialize};

const TOKEN_PREFIX_LEN: usize = 20;

/// Upper bound on concurrent per-token requests within one batch.
pub const MAX_IN_FLIGHT: usize = 16;

/// Tokens never appear whole in logs or reports.
pub fn token_prefix(token: &str) -> String {
    let prefix: String = token.chars().take(TOKEN_PREFIX_LEN).collect();
    format!("{}...", prefix)
}

/// Outcome of one per-token send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResult {
    pub token: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TokenResult {
    pub fn sent(token: &str, message_id: Option<String>) -> Self {
        Self {
            token: token_prefix(token),
            success: true,
            message_id,
            status: None,
            error: None,
        }
    }

    pub fn rejected(token: &str, status: u16, body: String) -> Self {
        Self {
            token: token_prefix(token),
            success: false,
            message_id: None,
            status: Some(status),
            error: Some(body),
        }
    }

    pub fn errored(token: &str, error: impl ToString) -> Self {
        Self {
            token: token_prefix(token),
            success: false,
            message_id: None,
            status: None,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// True when at least one token was accepted.
    pub success: bool,
    pub total_sent: usize,
    pub total_failed: usize,
    pub details: Vec<TokenResult>,
}

impl BatchReport {
    pub fn from_results(details: Vec<TokenResult>) -> Self {
        let total_sent = details.iter().filter(|d| d.success).count();
        Self {
            success: total_sent > 0,
            total_sent,
            total_failed: details.len() - total_sent,
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_prefix_truncates() {
        assert_eq!(token_prefix("abcdefghijklmnopqrstuvwxyz"), "abcdefghijklmnopqrst...");
        assert_eq!(token_prefix("short"), "short...");
    }

    #[test]
    fn test_report_counts() {
        let report = BatchReport::from_results(vec![
            TokenResult::sent("a", None),
            TokenResult::rejected("b", 404, "not found".to_string()),
        ]);
        assert!(report.success);
        assert_eq!((report.total_sent, report.total_failed), (1, 1));

        let empty = BatchReport::from_results(Vec::new());
        assert!(!empty.success);
    }
}
