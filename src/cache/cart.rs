//! Per-user shopping carts.
//!
//! Carts live only in process memory and are lost on restart. Each user's
//! cart is an entry of a sharded concurrent map, so operations on different
//! users never contend and read-modify-write on one user's entry happens under
//! that entry's shard lock.

use std::collections::BTreeMap;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::domain::UserId;

/// Item id to quantity. Ordered so summaries list lines stably.
pub type Cart = BTreeMap<String, f64>;

#[derive(Debug, Default)]
pub struct CartStore {
    carts: DashMap<UserId, Cart>,
}

impl CartStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the quantity of one line. A non-positive quantity removes the line.
    pub fn add_to_cart(&self, user_id: UserId, item_id: &str, quantity: f64) {
        if quantity.is_nan() || quantity <= 0.0 {
            self.remove_from_cart(user_id, item_id);
            return;
        }
        self.carts
            .entry(user_id)
            .or_default()
            .insert(item_id.to_string(), quantity);
        debug!(user_id, item_id, quantity, "cart line set");
    }

    pub fn remove_from_cart(&self, user_id: UserId, item_id: &str) {
        if let Entry::Occupied(mut entry) = self.carts.entry(user_id) {
            entry.get_mut().remove(item_id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }

    /// Apply `f` to the current quantity of a line and store the result,
    /// all under the user's entry lock. Returns the stored quantity.
    pub fn update_quantity<F>(&self, user_id: UserId, item_id: &str, f: F) -> f64
    where
        F: FnOnce(f64) -> f64,
    {
        let mut cart = self.carts.entry(user_id).or_default();
        let current = cart.get(item_id).copied().unwrap_or(0.0);
        let next = f(current);
        if next > 0.0 {
            cart.insert(item_id.to_string(), next);
        } else {
            cart.remove(item_id);
        }
        let emptied = cart.is_empty();
        drop(cart);
        if emptied {
            self.carts.remove_if(&user_id, |_, cart| cart.is_empty());
        }
        next.max(0.0)
    }

    /// Copy of the user's cart; empty for users without one.
    pub fn get_cart(&self, user_id: UserId) -> Cart {
        self.carts
            .get(&user_id)
            .map(|cart| cart.clone())
            .unwrap_or_default()
    }

    pub fn clear_cart(&self, user_id: UserId) {
        self.carts.remove(&user_id);
    }

    pub fn get_item_quantity(&self, user_id: UserId, item_id: &str) -> f64 {
        self.carts
            .get(&user_id)
            .and_then(|cart| cart.get(item_id).copied())
            .unwrap_or(0.0)
    }

    /// Number of users currently holding a non-empty cart.
    pub fn active_carts(&self) -> usize {
        self.carts.len()
    }
}
