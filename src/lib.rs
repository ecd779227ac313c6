//! Catalog, consent and cart caches for a spreadsheet-backed storefront.
//!
//! The spreadsheet is the system of record. [`cache`] holds what the bot reads
//! on its hot paths, [`application::sync`] keeps it consistent with the sheet,
//! and [`application::storefront`] is the entry point for request handlers.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
