//! Domain layer types and invariants.

pub mod catalog;
pub mod cells;
pub mod consent;
pub mod error;
pub mod vocabulary;

pub use catalog::{
    Category, Item, ItemRow, ItemStatus, ParsedItems, Unit, parse_item_row, parse_item_rows,
    parse_order_steps,
};
pub use consent::{ConsentRecord, UserId};
pub use error::ParseError;
pub use vocabulary::CatalogVocabulary;
