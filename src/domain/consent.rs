use serde::{Deserialize, Serialize};

/// Telegram user identifier.
pub type UserId = i64;

/// Whether a user accepted the privacy policy, as recorded in the users sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub user_id: UserId,
    pub accepted: bool,
}
