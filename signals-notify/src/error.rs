use signals_core::error::{StoreError, UnknownHandlerType};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    UnknownHandlerType(#[from] UnknownHandlerType),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
