//! Reconciliation of the in-memory caches against the backing store.
//!
//! Consent is reconciled by set difference against the cached snapshot.
//! The catalog is either replaced wholesale or diffed item by item, depending
//! on [`CatalogStrategy`]. Neither path holds a cache lock across a store call:
//! everything is fetched first and then applied in one cache mutation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::cache::{CatalogCache, ConsentCache, group_by_category};
use crate::domain::{
    CatalogVocabulary, Category, Item, ItemStatus, UserId, parse_item_row, parse_item_rows,
};

use super::repos::{BackingStore, ItemFilter, StoreError};

const METRIC_SYNC_TOTAL: &str = "shopkeep_sync_total";
const METRIC_SYNC_MS: &str = "shopkeep_sync_ms";
const TARGET_CONSENT: &str = "consent";
const TARGET_CATALOG: &str = "catalog";

/// How periodic catalog reconciliation applies what it fetched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogStrategy {
    /// Rebuild both indices from the fetched rows every time.
    #[default]
    Replace,
    /// Diff fetched items against the cache and apply only the delta.
    Incremental,
}

impl CatalogStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            CatalogStrategy::Replace => "replace",
            CatalogStrategy::Incremental => "incremental",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogSyncMode {
    Initialize,
    Replace,
    Incremental,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsentReport {
    /// The cache was empty and got its first full fill.
    pub initialized: bool,
    pub added: usize,
    pub removed: usize,
    pub unchanged: bool,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogReport {
    pub mode: CatalogSyncMode,
    pub categories: usize,
    pub items: usize,
    pub rejected_rows: usize,
    /// Items upserted by an incremental pass; equals `items` otherwise.
    pub changed: usize,
    pub removed: usize,
}

/// Outcome of reconciling both caches once.
#[derive(Debug)]
pub struct SyncReport {
    pub consent: Result<ConsentReport, StoreError>,
    pub catalog: Result<CatalogReport, StoreError>,
    pub finished_at: OffsetDateTime,
}

impl SyncReport {
    pub fn is_complete(&self) -> bool {
        self.consent.is_ok() && self.catalog.is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupOutcome {
    Ready,
    /// Startup retries ran out; the caches may be empty or partially filled.
    Degraded,
}

pub struct Synchronizer {
    store: Arc<dyn BackingStore>,
    consent: Arc<ConsentCache>,
    catalog: Arc<CatalogCache>,
    vocabulary: CatalogVocabulary,
    strategy: CatalogStrategy,
}

impl Synchronizer {
    pub fn new(
        store: Arc<dyn BackingStore>,
        consent: Arc<ConsentCache>,
        catalog: Arc<CatalogCache>,
        vocabulary: CatalogVocabulary,
        strategy: CatalogStrategy,
    ) -> Self {
        Self {
            store,
            consent,
            catalog,
            vocabulary,
            strategy,
        }
    }

    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    pub fn consent_cache(&self) -> &Arc<ConsentCache> {
        &self.consent
    }

    pub fn catalog_cache(&self) -> &Arc<CatalogCache> {
        &self.catalog
    }

    #[instrument(skip(self), fields(run_id = %Uuid::new_v4()))]
    pub async fn sync_consent(&self) -> Result<ConsentReport, StoreError> {
        let started_at = Instant::now();
        let result = self.reconcile_consent().await;
        record_outcome(TARGET_CONSENT, started_at, result.as_ref().err());
        match &result {
            Ok(report) => info!(
                initialized = report.initialized,
                added = report.added,
                removed = report.removed,
                total = report.total,
                "Consent cache synchronized"
            ),
            Err(err) => warn!(error = %err, "Consent synchronization failed"),
        }
        result
    }

    async fn reconcile_consent(&self) -> Result<ConsentReport, StoreError> {
        // Taken before the fetch: a single-user write landing mid-fetch is in
        // neither set and is left alone by the diff.
        let cached = self.consent.snapshot();
        let current: HashSet<UserId> = self
            .store
            .fetch_accepted_users()
            .await?
            .into_iter()
            .collect();
        let total = current.len();

        if !self.consent.is_initialized() {
            self.consent.initialize(current);
            return Ok(ConsentReport {
                initialized: true,
                added: total,
                total,
                ..ConsentReport::default()
            });
        }

        let new_users: HashSet<UserId> = current.difference(&cached).copied().collect();
        let removed_users: HashSet<UserId> = cached.difference(&current).copied().collect();

        if new_users.is_empty() && removed_users.is_empty() {
            self.consent.mark_fresh();
            return Ok(ConsentReport {
                unchanged: true,
                total,
                ..ConsentReport::default()
            });
        }

        self.consent.update_partial(&new_users, &removed_users);
        Ok(ConsentReport {
            added: new_users.len(),
            removed: removed_users.len(),
            total,
            ..ConsentReport::default()
        })
    }

    #[instrument(skip(self), fields(run_id = %Uuid::new_v4(), strategy = self.strategy.as_str()))]
    pub async fn sync_catalog(&self) -> Result<CatalogReport, StoreError> {
        let started_at = Instant::now();
        let result = self.reconcile_catalog().await;
        record_outcome(TARGET_CATALOG, started_at, result.as_ref().err());
        match &result {
            Ok(report) => info!(
                mode = ?report.mode,
                categories = report.categories,
                items = report.items,
                changed = report.changed,
                removed = report.removed,
                rejected_rows = report.rejected_rows,
                "Catalog cache synchronized"
            ),
            Err(err) => warn!(error = %err, "Catalog synchronization failed"),
        }
        result
    }

    async fn reconcile_catalog(&self) -> Result<CatalogReport, StoreError> {
        // Same ordering as consent: items patched in while the fetch is in
        // flight are never mistaken for removals.
        let cached: Option<HashMap<String, Item>> = (self.strategy
            == CatalogStrategy::Incremental
            && self.catalog.is_initialized())
        .then(|| {
            self.catalog
                .all_items()
                .into_iter()
                .map(|item| (item.id.clone(), item))
                .collect()
        });
        let labels = self.store.fetch_category_labels().await?;
        let rows = self.store.fetch_item_rows(ItemFilter::Visible).await?;

        let parsed = parse_item_rows(&rows, &self.vocabulary);
        let rejected_rows = parsed.rejected;
        let items = dedupe_last_wins(
            parsed
                .items
                .into_iter()
                .filter(|item| item.status != ItemStatus::Unavailable)
                .collect(),
        );
        let categories = merge_categories(&labels, &items);
        let category_count = categories.len();
        let item_count = items.len();

        let replaced = |mode| CatalogReport {
            mode,
            categories: category_count,
            items: item_count,
            rejected_rows,
            changed: item_count,
            removed: 0,
        };

        if !self.catalog.is_initialized() {
            self.catalog
                .initialize(categories, group_by_category(items));
            return Ok(replaced(CatalogSyncMode::Initialize));
        }

        // An empty category list cannot be expressed as a partial update.
        let cached = match cached {
            Some(cached) if !categories.is_empty() => cached,
            _ => {
                self.catalog.update(categories, group_by_category(items));
                return Ok(replaced(CatalogSyncMode::Replace));
            }
        };

        let fresh_ids: HashSet<&str> = items.iter().map(|item| item.id.as_str()).collect();
        let removed_ids: Vec<String> = cached
            .keys()
            .filter(|id| !fresh_ids.contains(id.as_str()))
            .cloned()
            .collect();
        let changed: Vec<Item> = items
            .iter()
            .filter(|item| cached.get(&item.id) != Some(*item))
            .cloned()
            .collect();

        let report = CatalogReport {
            mode: CatalogSyncMode::Incremental,
            categories: category_count,
            items: item_count,
            rejected_rows,
            changed: changed.len(),
            removed: removed_ids.len(),
        };
        self.catalog.update_partial(changed, &removed_ids, categories);
        Ok(report)
    }

    /// Reconcile both caches once. Each target runs even if the other failed.
    pub async fn sync_all(&self) -> SyncReport {
        let consent = self.sync_consent().await;
        let catalog = self.sync_catalog().await;
        SyncReport {
            consent,
            catalog,
            finished_at: OffsetDateTime::now_utc(),
        }
    }

    /// Re-read a single item row and patch the catalog with it.
    ///
    /// A missing, unparseable or unavailable row removes the item from the
    /// cache. Returns the item as now cached, if any.
    #[instrument(skip(self))]
    pub async fn refresh_item(&self, item_id: &str) -> Result<Option<Item>, StoreError> {
        let rows = self
            .store
            .fetch_item_rows(ItemFilter::Id(item_id.to_string()))
            .await?;

        // Periodic sync keeps the last row per id; do the same here.
        let fresh = match rows.last().map(|row| parse_item_row(row, &self.vocabulary)) {
            Some(Ok(item)) if item.id == item_id && item.status != ItemStatus::Unavailable => {
                Some(item)
            }
            Some(Ok(_)) | None => None,
            Some(Err(err)) => {
                warn!(item_id, error = %err, "dropping unparseable item row");
                None
            }
        };

        match &fresh {
            Some(item) => self.catalog.patch(Some(item.clone()), None),
            None => self.catalog.patch(None, Some(item_id)),
        }
        Ok(fresh)
    }

    /// Initial reconciliation before serving traffic.
    ///
    /// Both caches are attempted up to `attempts` times with a fixed `backoff`
    /// in between; a target that already succeeded is not retried. Running out
    /// of attempts yields [`StartupOutcome::Degraded`] rather than an error.
    pub async fn startup(&self, attempts: u32, backoff: Duration) -> StartupOutcome {
        let attempts = attempts.max(1);
        let mut consent_ready = false;
        let mut catalog_ready = false;

        for attempt in 1..=attempts {
            if !consent_ready {
                consent_ready = self.sync_consent().await.is_ok();
            }
            if !catalog_ready {
                catalog_ready = self.sync_catalog().await.is_ok();
            }
            if consent_ready && catalog_ready {
                info!(attempt, "Startup synchronization complete");
                return StartupOutcome::Ready;
            }
            if attempt < attempts {
                warn!(
                    attempt,
                    attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    consent_ready,
                    catalog_ready,
                    "Startup synchronization incomplete, retrying"
                );
                tokio::time::sleep(backoff).await;
            }
        }

        error!(
            attempts,
            consent_ready, catalog_ready, "Startup synchronization failed, serving degraded"
        );
        StartupOutcome::Degraded
    }
}

fn record_outcome(target: &'static str, started_at: Instant, err: Option<&StoreError>) {
    let outcome = if err.is_some() { "error" } else { "ok" };
    counter!(METRIC_SYNC_TOTAL, "target" => target, "outcome" => outcome).increment(1);
    histogram!(METRIC_SYNC_MS, "target" => target)
        .record(started_at.elapsed().as_secs_f64() * 1000.0);
}

/// Keep one item per id, the last one seen, in first-seen order.
fn dedupe_last_wins(items: Vec<Item>) -> Vec<Item> {
    let mut position: HashMap<String, usize> = HashMap::with_capacity(items.len());
    let mut deduped: Vec<Item> = Vec::with_capacity(items.len());
    for item in items {
        match position.get(&item.id) {
            Some(&index) => deduped[index] = item,
            None => {
                position.insert(item.id.clone(), deduped.len());
                deduped.push(item);
            }
        }
    }
    deduped
}

/// Category list from the distinct-label query, extended with any label that
/// only shows up on fetched items.
fn merge_categories(labels: &[String], items: &[Item]) -> Vec<Category> {
    let mut seen = HashSet::new();
    labels
        .iter()
        .map(String::as_str)
        .chain(items.iter().map(|item| item.category_name.as_str()))
        .filter_map(Category::from_label)
        .filter(|category| seen.insert(category.id.clone()))
        .collect()
}
