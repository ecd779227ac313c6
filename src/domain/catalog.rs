//! Catalog records and their parsing from spreadsheet rows.

use std::collections::HashSet;

use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::cells::{cell_number, cell_text, parse_decimal};
use super::error::ParseError;
use super::vocabulary::CatalogVocabulary;

const METRIC_ROWS_REJECTED: &str = "shopkeep_item_rows_rejected_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Piece,
    Milliliter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Available,
    Reserved,
    Unavailable,
}

/// A catalog category. Categories are not stored on their own; they are the
/// distinct labels found on item rows, so `id` and `name` are the same label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
}

impl Category {
    /// Build a category from a raw label; blank labels yield `None`.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        (!label.is_empty()).then(|| Self {
            id: label.to_string(),
            name: label.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub name: String,
    pub category_name: String,
    pub description: String,
    pub price: f64,
    pub image_url: Option<String>,
    pub unit: Unit,
    pub available_quantity: f64,
    pub status: ItemStatus,
    /// Increments a user may add in one tap; always positive and ascending.
    pub order_steps: Vec<f64>,
}

impl Item {
    /// Whether the item can currently be put into a cart.
    pub fn is_orderable(&self) -> bool {
        self.status == ItemStatus::Available && self.available_quantity > 0.0
    }
}

/// Raw item row exactly as the sheet adapter returned it, one cell per column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemRow {
    pub id: Option<Value>,
    pub category: Option<Value>,
    pub name: Option<Value>,
    pub description: Option<Value>,
    pub price: Option<Value>,
    pub image_url: Option<Value>,
    pub unit: Option<Value>,
    pub available_quantity: Option<Value>,
    pub status: Option<Value>,
    pub order_steps: Option<Value>,
}

impl ItemRow {
    /// Number of columns an item query selects, in [`ItemRow::from_cells`] order.
    pub const COLUMN_COUNT: usize = 10;

    /// Build a row from cells in the fixed select order
    /// (id, category, name, description, price, image, unit, quantity, status, steps).
    /// Missing trailing cells read as empty.
    pub fn from_cells(cells: Vec<Value>) -> Self {
        let mut cells = cells
            .into_iter()
            .map(|cell| (!cell.is_null()).then_some(cell));
        let mut next = || cells.next().flatten();
        Self {
            id: next(),
            category: next(),
            name: next(),
            description: next(),
            price: next(),
            image_url: next(),
            unit: next(),
            available_quantity: next(),
            status: next(),
            order_steps: next(),
        }
    }

    /// Identifier used when logging about this row, even if it is unusable.
    pub fn display_id(&self) -> String {
        cell_text(self.id.as_ref()).unwrap_or_else(|| "<missing>".to_string())
    }
}

/// Result of parsing a batch of rows: the usable items plus how many rows were dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedItems {
    pub items: Vec<Item>,
    pub rejected: usize,
}

/// Parse one item row.
pub fn parse_item_row(row: &ItemRow, vocabulary: &CatalogVocabulary) -> Result<Item, ParseError> {
    let id = cell_text(row.id.as_ref()).ok_or_else(|| ParseError::missing("id"))?;
    let price = non_negative(row.price.as_ref(), "price")?;
    let available_quantity = non_negative(row.available_quantity.as_ref(), "available_quantity")?;

    let unit = match cell_text(row.unit.as_ref()) {
        None => Unit::Piece,
        Some(label) => vocabulary.parse_unit(&label).unwrap_or_else(|| {
            warn!(item_id = %id, unit = %label, "unrecognized unit label, treating as piece");
            Unit::Piece
        }),
    };

    let status = match cell_text(row.status.as_ref()) {
        None => ItemStatus::Unavailable,
        Some(label) => vocabulary.parse_status(&label).unwrap_or_else(|| {
            warn!(item_id = %id, status = %label, "unrecognized status label, hiding item");
            ItemStatus::Unavailable
        }),
    };

    let raw_steps = cell_text(row.order_steps.as_ref());
    let order_steps = parse_order_steps(raw_steps.as_deref(), unit, vocabulary);

    Ok(Item {
        id,
        name: cell_text(row.name.as_ref()).unwrap_or_default(),
        category_name: cell_text(row.category.as_ref()).unwrap_or_default(),
        description: cell_text(row.description.as_ref()).unwrap_or_default(),
        price,
        image_url: cell_text(row.image_url.as_ref()),
        unit,
        available_quantity,
        status,
        order_steps,
    })
}

/// Parse a batch of rows independently. A bad row is logged and dropped; it
/// never fails the batch.
pub fn parse_item_rows(rows: &[ItemRow], vocabulary: &CatalogVocabulary) -> ParsedItems {
    let mut parsed = ParsedItems {
        items: Vec::with_capacity(rows.len()),
        rejected: 0,
    };

    for (index, row) in rows.iter().enumerate() {
        match parse_item_row(row, vocabulary) {
            Ok(item) => parsed.items.push(item),
            Err(err) => {
                warn!(
                    row = index,
                    item_id = %row.display_id(),
                    error = %err,
                    "dropping unparseable item row"
                );
                parsed.rejected += 1;
            }
        }
    }

    if parsed.rejected > 0 {
        counter!(METRIC_ROWS_REJECTED).increment(parsed.rejected as u64);
    }

    parsed
}

/// Parse the delimited order-step field.
///
/// Tokens are split on `,` or `;`; unparseable, non-finite and non-positive
/// tokens are dropped; the rest are deduplicated and sorted. When nothing
/// usable remains, milliliter items fall back to the configured default
/// sequence and piece items to `[1]`.
pub fn parse_order_steps(raw: Option<&str>, unit: Unit, vocabulary: &CatalogVocabulary) -> Vec<f64> {
    let mut steps: Vec<f64> = raw
        .unwrap_or_default()
        .split([',', ';'])
        .filter_map(parse_decimal)
        .filter(|step| *step > 0.0)
        .collect();

    steps.sort_by(f64::total_cmp);
    let mut seen = HashSet::new();
    steps.retain(|step| seen.insert(step.to_bits()));

    if !steps.is_empty() {
        return steps;
    }

    match unit {
        Unit::Milliliter => vocabulary.default_order_steps.clone(),
        Unit::Piece => vec![1.0],
    }
}

fn non_negative(value: Option<&Value>, field: &'static str) -> Result<f64, ParseError> {
    let number = cell_number(value)
        .map_err(|raw| ParseError::invalid_number(field, raw))?
        .unwrap_or(0.0);
    if number < 0.0 {
        return Err(ParseError::negative(field, number));
    }
    Ok(number)
}
