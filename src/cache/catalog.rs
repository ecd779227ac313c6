//! Catalog cache.
//!
//! Keeps parsed items indexed two ways, by category and by id. Both indices
//! plus the category list and the freshness stamp live in one state value
//! behind one lock, so every mutation is applied as a whole: a reader sees the
//! catalog either before or after an update, never in between.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::domain::{Category, Item};

use super::config::{CacheConfig, is_stale};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::catalog";

#[derive(Debug, Default)]
struct CatalogState {
    categories: Vec<Category>,
    items_by_category: HashMap<String, Vec<Item>>,
    items_by_id: HashMap<String, Item>,
    last_update: Option<Instant>,
}

impl CatalogState {
    /// Rebuild both indices from grouped input.
    ///
    /// Items are regrouped by their own `category_name`, and when the input
    /// carries the same id twice the last occurrence wins in both indices.
    fn rebuild(categories: Vec<Category>, items_by_category: HashMap<String, Vec<Item>>) -> Self {
        let flat: Vec<Item> = items_by_category.into_values().flatten().collect();

        let mut last_position = HashMap::with_capacity(flat.len());
        for (position, item) in flat.iter().enumerate() {
            if let Some(previous) = last_position.insert(item.id.clone(), position) {
                warn!(
                    item_id = %item.id,
                    first = previous,
                    kept = position,
                    "duplicate item id in catalog input, keeping the later row"
                );
            }
        }

        let mut by_category: HashMap<String, Vec<Item>> = HashMap::new();
        let mut by_id = HashMap::with_capacity(last_position.len());
        for (position, item) in flat.into_iter().enumerate() {
            if last_position.get(&item.id) != Some(&position) {
                continue;
            }
            by_category
                .entry(item.category_name.clone())
                .or_default()
                .push(item.clone());
            by_id.insert(item.id.clone(), item);
        }

        Self {
            categories,
            items_by_category: by_category,
            items_by_id: by_id,
            last_update: Some(Instant::now()),
        }
    }

    fn detach(&mut self, item_id: &str) -> Option<Item> {
        let previous = self.items_by_id.remove(item_id)?;
        if let Some(bucket) = self.items_by_category.get_mut(&previous.category_name) {
            bucket.retain(|item| item.id != item_id);
            if bucket.is_empty() {
                self.items_by_category.remove(&previous.category_name);
            }
        }
        Some(previous)
    }

    fn upsert(&mut self, item: Item) {
        self.detach(&item.id);
        self.items_by_category
            .entry(item.category_name.clone())
            .or_default()
            .push(item.clone());
        self.items_by_id.insert(item.id.clone(), item);
    }
}

/// Counts describing what the cache currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogStats {
    pub categories: usize,
    pub items: usize,
}

pub struct CatalogCache {
    state: RwLock<CatalogState>,
    staleness: Duration,
}

impl CatalogCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            state: RwLock::new(CatalogState::default()),
            staleness: config.staleness_threshold(),
        }
    }

    /// Fill the cache from scratch.
    pub fn initialize(&self, categories: Vec<Category>, items_by_category: HashMap<String, Vec<Item>>) {
        let stats = self.replace(categories, items_by_category, "initialize");
        info!(
            categories = stats.categories,
            items = stats.items,
            "Catalog cache initialized"
        );
    }

    /// Full replacement of an already filled cache.
    pub fn update(&self, categories: Vec<Category>, items_by_category: HashMap<String, Vec<Item>>) {
        let stats = self.replace(categories, items_by_category, "update");
        info!(
            categories = stats.categories,
            items = stats.items,
            "Catalog cache updated"
        );
    }

    fn replace(
        &self,
        categories: Vec<Category>,
        items_by_category: HashMap<String, Vec<Item>>,
        op: &'static str,
    ) -> CatalogStats {
        // Indices are built before the lock is taken; the swap itself is one assignment.
        let next = CatalogState::rebuild(categories, items_by_category);
        let stats = CatalogStats {
            categories: next.categories.len(),
            items: next.items_by_id.len(),
        };
        *rw_write(&self.state, SOURCE, op) = next;
        stats
    }

    /// Apply targeted changes.
    ///
    /// Removed ids leave both indices. Each changed item first leaves the
    /// bucket of its previous version (which may be a different category) and
    /// is then appended to its current bucket. The category list is only
    /// replaced when `updated_categories` is non-empty.
    pub fn update_partial(
        &self,
        new_or_changed_items: Vec<Item>,
        removed_item_ids: &[String],
        updated_categories: Vec<Category>,
    ) {
        let changed = new_or_changed_items.len();
        let mut state = rw_write(&self.state, SOURCE, "update_partial");

        let removed = removed_item_ids
            .iter()
            .filter(|id| state.detach(id).is_some())
            .count();
        for item in new_or_changed_items {
            state.upsert(item);
        }
        if !updated_categories.is_empty() {
            state.categories = updated_categories;
        }
        state.last_update = Some(Instant::now());
        let total = state.items_by_id.len();
        drop(state);

        info!(changed, removed, total, "Catalog cache updated partially");
    }

    /// Targeted fix-up of individual items that leaves the freshness stamp
    /// alone, so one refreshed row never makes a stale catalog look fresh.
    ///
    /// A category label first seen on an upserted item is appended to the
    /// category list.
    pub fn patch(&self, upserted: Option<Item>, removed_item_id: Option<&str>) {
        let mut state = rw_write(&self.state, SOURCE, "patch");
        if let Some(item_id) = removed_item_id {
            state.detach(item_id);
        }
        if let Some(item) = upserted {
            let known = state
                .categories
                .iter()
                .any(|category| category.name == item.category_name);
            if !known && let Some(category) = Category::from_label(&item.category_name) {
                state.categories.push(category);
            }
            state.upsert(item);
        }
    }

    pub fn get_categories(&self) -> Vec<Category> {
        rw_read(&self.state, SOURCE, "get_categories")
            .categories
            .clone()
    }

    pub fn get_items_by_category(&self, category_name: &str) -> Vec<Item> {
        rw_read(&self.state, SOURCE, "get_items_by_category")
            .items_by_category
            .get(category_name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get_item(&self, item_id: &str) -> Option<Item> {
        rw_read(&self.state, SOURCE, "get_item")
            .items_by_id
            .get(item_id)
            .cloned()
    }

    /// Every cached item, in no particular order.
    pub fn all_items(&self) -> Vec<Item> {
        rw_read(&self.state, SOURCE, "all_items")
            .items_by_id
            .values()
            .cloned()
            .collect()
    }

    pub fn is_initialized(&self) -> bool {
        rw_read(&self.state, SOURCE, "is_initialized")
            .last_update
            .is_some()
    }

    pub fn needs_update(&self) -> bool {
        self.needs_update_at(Instant::now())
    }

    pub fn needs_update_at(&self, now: Instant) -> bool {
        let last_update = rw_read(&self.state, SOURCE, "needs_update").last_update;
        is_stale(last_update, now, self.staleness)
    }

    pub fn stats(&self) -> CatalogStats {
        let state = rw_read(&self.state, SOURCE, "stats");
        CatalogStats {
            categories: state.categories.len(),
            items: state.items_by_id.len(),
        }
    }

    /// Check that both indices describe the same set of items.
    pub fn indices_agree(&self) -> bool {
        let state = rw_read(&self.state, SOURCE, "indices_agree");
        let bucketed: usize = state.items_by_category.values().map(Vec::len).sum();
        bucketed == state.items_by_id.len()
            && state.items_by_id.values().all(|item| {
                state
                    .items_by_category
                    .get(&item.category_name)
                    .is_some_and(|bucket| bucket.iter().filter(|i| *i == item).count() == 1)
            })
    }
}

impl Default for CatalogCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

/// Group items into category buckets, preserving their order.
pub fn group_by_category(items: Vec<Item>) -> HashMap<String, Vec<Item>> {
    let mut grouped: HashMap<String, Vec<Item>> = HashMap::new();
    for item in items {
        grouped
            .entry(item.category_name.clone())
            .or_default()
            .push(item);
    }
    grouped
}
