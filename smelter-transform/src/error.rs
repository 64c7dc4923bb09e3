use smelter_core::StoreError;
use thiserror::Error;

/// Per-event failure classes the scheduler reacts to. Everything except a
/// benign uniqueness race marks the event `failed` with the error text kept
/// on the row for inspection.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("payload did not decode: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error("unrecognized event type {0:?}")]
    UnrecognizedEventType(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TransformError {
    /// Two workers creating the first row for the same derived entity race
    /// on its unique key; the loser's work is already done by the winner.
    pub fn is_benign_race(&self) -> bool {
        match self {
            TransformError::Store(err) => err.is_unique_violation(),
            _ => false,
        }
    }

    pub fn is_unrecognized(&self) -> bool {
        matches!(self, TransformError::UnrecognizedEventType(_))
    }
}
