use thiserror::Error;

use crate::infra::error::InfraError;

use super::repos::StoreError;

/// Exit status for failures that may clear up on retry (`EX_TEMPFAIL`).
const EXIT_TEMPORARY_FAILURE: i32 = 75;
const EXIT_FAILURE: i32 = 1;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Infra(#[from] InfraError),
}

impl AppError {
    /// Whether the failure came from the backing store and may clear up on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Store(err) => err.is_transient(),
            AppError::Infra(_) => false,
        }
    }

    /// Process exit status, letting schedulers that rerun `shopkeep sync`
    /// tell an unreachable sheet from a broken deployment.
    pub fn exit_code(&self) -> i32 {
        if self.is_transient() {
            EXIT_TEMPORARY_FAILURE
        } else {
            EXIT_FAILURE
        }
    }
}
