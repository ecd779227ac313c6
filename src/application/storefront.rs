//! Cache-facing operations used by the bot handlers.
//!
//! Reads go to the caches while they are fresh. A stale cache triggers an
//! inline fetch from the backing store before answering, in addition to the
//! periodic background refresh. Consent writes go to the store first and are
//! then mirrored into the cache.

use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::cache::{CartStore, CatalogCache, ConsentCache};
use crate::domain::{Category, Item, Unit, UserId};

use super::repos::StoreError;
use super::sync::{SyncReport, Synchronizer};

const METRIC_CACHE_HIT: &str = "shopkeep_cache_hit_total";
const METRIC_CACHE_MISS: &str = "shopkeep_cache_miss_total";

#[derive(Debug, Error)]
pub enum CartError {
    #[error("item `{0}` not found")]
    ItemNotFound(String),
    #[error("item `{0}` cannot be ordered right now")]
    NotOrderable(String),
    #[error("no more of item `{0}` can be added")]
    LimitReached(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a successful cart increase.
#[derive(Debug, Clone, PartialEq)]
pub struct CartChange {
    pub item_id: String,
    pub added: f64,
    pub quantity: f64,
    pub available: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CartLine {
    pub item: Item,
    pub quantity: f64,
    pub subtotal: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CartSummary {
    pub lines: Vec<CartLine>,
    pub total: f64,
}

impl CartSummary {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

pub struct Storefront {
    sync: Arc<Synchronizer>,
    carts: Arc<CartStore>,
}

impl Storefront {
    pub fn new(sync: Arc<Synchronizer>, carts: Arc<CartStore>) -> Self {
        Self { sync, carts }
    }

    pub fn carts(&self) -> &Arc<CartStore> {
        &self.carts
    }

    fn consent(&self) -> &ConsentCache {
        self.sync.consent_cache()
    }

    fn catalog(&self) -> &CatalogCache {
        self.sync.catalog_cache()
    }

    /// Create the user's row if it does not exist yet.
    #[instrument(skip(self))]
    pub async fn register_user(&self, user_id: UserId) -> Result<bool, StoreError> {
        let inserted = self.sync.store().insert_user(user_id).await?;
        if inserted {
            info!(user_id, "User registered");
        } else {
            debug!(user_id, "User already registered");
        }
        Ok(inserted)
    }

    pub async fn is_accepted(&self, user_id: UserId) -> Result<bool, StoreError> {
        let consent = self.consent();
        if !consent.needs_update() {
            counter!(METRIC_CACHE_HIT, "cache" => "consent").increment(1);
            return Ok(consent.is_accepted(user_id));
        }

        counter!(METRIC_CACHE_MISS, "cache" => "consent").increment(1);
        let accepted = self
            .sync
            .store()
            .fetch_consent(user_id)
            .await?
            .unwrap_or(false);
        if accepted {
            consent.add_user(user_id);
        } else {
            consent.remove_user(user_id);
        }
        Ok(accepted)
    }

    /// Record acceptance in the store, then in the cache.
    #[instrument(skip(self))]
    pub async fn accept_policy(&self, user_id: UserId) -> Result<(), StoreError> {
        let store = self.sync.store();
        store.insert_user(user_id).await?;
        store.set_consent(user_id, true).await?;
        self.consent().add_user(user_id);
        info!(user_id, "User accepted privacy policy");
        Ok(())
    }

    async fn ensure_catalog_fresh(&self) -> Result<(), StoreError> {
        if self.catalog().needs_update() {
            counter!(METRIC_CACHE_MISS, "cache" => "catalog").increment(1);
            self.sync.sync_catalog().await?;
        } else {
            counter!(METRIC_CACHE_HIT, "cache" => "catalog").increment(1);
        }
        Ok(())
    }

    pub async fn categories(&self) -> Result<Vec<Category>, StoreError> {
        self.ensure_catalog_fresh().await?;
        Ok(self.catalog().get_categories())
    }

    pub async fn items_in_category(&self, category_name: &str) -> Result<Vec<Item>, StoreError> {
        self.ensure_catalog_fresh().await?;
        Ok(self.catalog().get_items_by_category(category_name))
    }

    pub async fn item(&self, item_id: &str) -> Result<Option<Item>, StoreError> {
        let catalog = self.catalog();
        if !catalog.needs_update() {
            counter!(METRIC_CACHE_HIT, "cache" => "catalog").increment(1);
            return Ok(catalog.get_item(item_id));
        }
        counter!(METRIC_CACHE_MISS, "cache" => "catalog").increment(1);
        self.sync.refresh_item(item_id).await
    }

    /// Add up to `amount` of an item, never beyond what is in stock.
    ///
    /// Items that are not available or have no stock fail with
    /// [`CartError::NotOrderable`]. Piece items only take whole units. When
    /// the cart already holds the whole stock the call fails with
    /// [`CartError::LimitReached`].
    #[instrument(skip(self))]
    pub async fn increase(
        &self,
        user_id: UserId,
        item_id: &str,
        amount: f64,
    ) -> Result<CartChange, CartError> {
        let item = self
            .item(item_id)
            .await?
            .ok_or_else(|| CartError::ItemNotFound(item_id.to_string()))?;
        if !item.is_orderable() {
            return Err(CartError::NotOrderable(item_id.to_string()));
        }

        let amount = match item.unit {
            Unit::Piece => amount.floor(),
            Unit::Milliliter => amount,
        };
        let amount = if amount.is_nan() { 0.0 } else { amount };

        let mut added = 0.0;
        let quantity = self.carts.update_quantity(user_id, item_id, |current| {
            added = amount.min(item.available_quantity - current);
            if added > 0.0 { current + added } else { current }
        });

        if added <= 0.0 {
            return Err(CartError::LimitReached(item_id.to_string()));
        }
        debug!(user_id, item_id, added, quantity, "cart increased");
        Ok(CartChange {
            item_id: item.id,
            added,
            quantity,
            available: item.available_quantity,
        })
    }

    /// Take up to `amount` off a cart line. Returns the remaining quantity.
    pub fn decrease(&self, user_id: UserId, item_id: &str, amount: f64) -> f64 {
        let amount = if amount.is_nan() { 0.0 } else { amount.max(0.0) };
        self.carts
            .update_quantity(user_id, item_id, |current| (current - amount).max(0.0))
    }

    pub fn reset(&self, user_id: UserId, item_id: &str) {
        self.carts.remove_from_cart(user_id, item_id);
    }

    pub fn clear_cart(&self, user_id: UserId) {
        self.carts.clear_cart(user_id);
    }

    /// Priced cart lines. Lines whose item is no longer in the catalog are skipped.
    pub async fn cart_summary(&self, user_id: UserId) -> Result<CartSummary, StoreError> {
        let cart = self.carts.get_cart(user_id);
        let mut summary = CartSummary::default();
        for (item_id, quantity) in cart {
            let Some(item) = self.item(&item_id).await? else {
                debug!(user_id, item_id = %item_id, "skipping cart line for vanished item");
                continue;
            };
            let subtotal = item.price * quantity;
            summary.total += subtotal;
            summary.lines.push(CartLine {
                item,
                quantity,
                subtotal,
            });
        }
        Ok(summary)
    }

    /// Administrative on-demand reconciliation of both caches.
    pub async fn force_sync(&self) -> SyncReport {
        info!("Forced synchronization requested");
        self.sync.sync_all().await
    }
}
