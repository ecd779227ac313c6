//! Spreadsheet vocabulary for item statuses and units.
//!
//! The labels live in the sheet and are edited by the shop owner, so they are
//! configuration rather than constants.

use super::catalog::{ItemStatus, Unit};

pub const DEFAULT_STATUS_AVAILABLE: &str = "Доступен";
pub const DEFAULT_STATUS_RESERVED: &str = "Забронирован";
pub const DEFAULT_STATUS_UNAVAILABLE: &str = "Недоступен";
pub const DEFAULT_UNIT_PIECE: &str = "шт";
pub const DEFAULT_UNIT_MILLILITER: &str = "мл";
pub const DEFAULT_ORDER_STEPS: [f64; 7] = [1.0, 2.0, 3.0, 5.0, 10.0, 15.0, 20.0];

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogVocabulary {
    pub status_available: String,
    pub status_reserved: String,
    pub status_unavailable: String,
    pub unit_piece: String,
    pub unit_milliliter: String,
    /// Steps offered for milliliter items whose own step list is empty or unusable.
    pub default_order_steps: Vec<f64>,
}

impl Default for CatalogVocabulary {
    fn default() -> Self {
        Self {
            status_available: DEFAULT_STATUS_AVAILABLE.to_string(),
            status_reserved: DEFAULT_STATUS_RESERVED.to_string(),
            status_unavailable: DEFAULT_STATUS_UNAVAILABLE.to_string(),
            unit_piece: DEFAULT_UNIT_PIECE.to_string(),
            unit_milliliter: DEFAULT_UNIT_MILLILITER.to_string(),
            default_order_steps: DEFAULT_ORDER_STEPS.to_vec(),
        }
    }
}

impl CatalogVocabulary {
    pub fn parse_status(&self, label: &str) -> Option<ItemStatus> {
        let label = label.trim();
        if same_label(label, &self.status_available) {
            Some(ItemStatus::Available)
        } else if same_label(label, &self.status_reserved) {
            Some(ItemStatus::Reserved)
        } else if same_label(label, &self.status_unavailable) {
            Some(ItemStatus::Unavailable)
        } else {
            None
        }
    }

    pub fn parse_unit(&self, label: &str) -> Option<Unit> {
        let label = label.trim();
        if same_label(label, &self.unit_piece) {
            Some(Unit::Piece)
        } else if same_label(label, &self.unit_milliliter) {
            Some(Unit::Milliliter)
        } else {
            None
        }
    }

    pub fn status_label(&self, status: ItemStatus) -> &str {
        match status {
            ItemStatus::Available => &self.status_available,
            ItemStatus::Reserved => &self.status_reserved,
            ItemStatus::Unavailable => &self.status_unavailable,
        }
    }
}

// Labels are Cyrillic by default, so ASCII-only case folding is not enough.
fn same_label(candidate: &str, label: &str) -> bool {
    candidate.to_lowercase() == label.trim().to_lowercase()
}
