//! In-memory caches in front of the spreadsheet store.
//!
//! - **Consent cache**: set of users who accepted the privacy policy
//! - **Catalog cache**: categories and parsed items, indexed by category and id
//! - **Cart store**: per-user carts, memory only
//!
//! The consent and catalog caches carry a freshness stamp and report
//! `needs_update()` once it is older than the configured threshold:
//!
//! ```toml
//! [sync]
//! staleness_seconds = 300
//! ```

mod cart;
mod catalog;
mod config;
mod consent;
mod lock;

pub use cart::{Cart, CartStore};
pub use catalog::{CatalogCache, CatalogStats, group_by_category};
pub use config::CacheConfig;
pub use consent::ConsentCache;
