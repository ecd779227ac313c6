//! Repository trait describing the spreadsheet backing store.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ItemRow, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("backing store unreachable: {0}")]
    Transport(String),
    #[error("backing store request timed out")]
    Timeout,
    #[error("backing store rate limit exceeded")]
    RateLimited,
    #[error("backing store answered with status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("backing store response could not be decoded: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }

    /// Whether retrying the same statement later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Transport(_) | StoreError::Timeout | StoreError::RateLimited => true,
            StoreError::Status { status, .. } => *status >= 500,
            StoreError::Decode(_) => false,
        }
    }
}

/// Row selection for item queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemFilter {
    All,
    Category(String),
    Id(String),
    /// Every row whose status is not the unavailable label.
    Visible,
}

/// Query surface of the spreadsheet store. Every method is one independent
/// statement; nothing here assumes transactions.
#[async_trait]
pub trait BackingStore: Send + Sync {
    async fn fetch_accepted_users(&self) -> Result<Vec<UserId>, StoreError>;

    /// The user's consent flag, or `None` when the user has no row.
    async fn fetch_consent(&self, user_id: UserId) -> Result<Option<bool>, StoreError>;

    async fn set_consent(&self, user_id: UserId, accepted: bool) -> Result<(), StoreError>;

    /// Insert a user row with consent unset. Returns `false` if the row already existed.
    async fn insert_user(&self, user_id: UserId) -> Result<bool, StoreError>;

    async fn fetch_category_labels(&self) -> Result<Vec<String>, StoreError>;

    async fn fetch_item_rows(&self, filter: ItemFilter) -> Result<Vec<ItemRow>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StoreError::Timeout.is_transient());
        assert!(StoreError::RateLimited.is_transient());
        assert!(StoreError::transport("connection reset").is_transient());
        assert!(
            StoreError::Status {
                status: 503,
                message: String::new()
            }
            .is_transient()
        );
        assert!(
            !StoreError::Status {
                status: 400,
                message: String::new()
            }
            .is_transient()
        );
        assert!(!StoreError::decode("missing rows").is_transient());
    }
}
