use crate::store::StoreError;

/// Errors surfaced at the engine boundary.
///
/// Numeric degeneracies in the optimizer and capacity pressure in the
/// isolation layer are recovered internally and never appear here; the
/// worst user-visible outcome is a retryable lock timeout.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The operation did not acquire its turn and finish within the timeout.
    /// Retryable; learner state is never corrupted by a timeout.
    #[error("learner lock timed out after {0}ms")]
    LockTimeout(u64),
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::LockTimeout(_))
    }
}
