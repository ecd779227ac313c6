//! Application services: store contract, synchronization and cache access.

pub mod error;
pub mod repos;
pub mod scheduler;
pub mod storefront;
pub mod sync;
