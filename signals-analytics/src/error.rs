use signals_core::error::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("invalid analytics input: {0}")]
    InvalidInput(String),

    #[error("notification not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AnalyticsError {
    /// Transient backend failures are worth another attempt; bad input and
    /// missing rows are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AnalyticsError::Store(
                StoreError::Database(_) | StoreError::Pool(_) | StoreError::Unavailable(_)
            )
        )
    }
}
