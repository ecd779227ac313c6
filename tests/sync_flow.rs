//! End-to-end flows through the synchronizer and storefront against the
//! in-memory backing store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use shopkeep::application::repos::BackingStore;
use shopkeep::application::storefront::{CartError, Storefront};
use shopkeep::application::sync::{
    CatalogStrategy, CatalogSyncMode, StartupOutcome, Synchronizer,
};
use shopkeep::cache::{CartStore, CatalogCache, ConsentCache};
use shopkeep::domain::{CatalogVocabulary, ConsentRecord, Item, ItemRow};
use shopkeep::infra::memory::MemoryStore;

fn item_row(id: &str, category: &str, status: &str, unit: &str, quantity: f64) -> ItemRow {
    ItemRow {
        id: Some(json!(id)),
        category: Some(json!(category)),
        name: Some(json!(format!("Item {id}"))),
        description: Some(json!("")),
        price: Some(json!(10)),
        image_url: None,
        unit: Some(json!(unit)),
        available_quantity: Some(json!(quantity)),
        status: Some(json!(status)),
        order_steps: None,
    }
}

fn available(id: &str, category: &str) -> ItemRow {
    item_row(id, category, "Доступен", "шт", 5.0)
}

fn synchronizer(store: &Arc<MemoryStore>, strategy: CatalogStrategy) -> Arc<Synchronizer> {
    let backing: Arc<dyn BackingStore> = Arc::clone(store) as Arc<dyn BackingStore>;
    Arc::new(Synchronizer::new(
        backing,
        Arc::new(ConsentCache::default()),
        Arc::new(CatalogCache::default()),
        CatalogVocabulary::default(),
        strategy,
    ))
}

fn storefront(store: &Arc<MemoryStore>) -> (Arc<Synchronizer>, Storefront) {
    let sync = synchronizer(store, CatalogStrategy::Replace);
    let front = Storefront::new(Arc::clone(&sync), Arc::new(CartStore::new()));
    (sync, front)
}

fn sorted_ids(items: Vec<Item>) -> Vec<String> {
    let mut ids: Vec<String> = items.into_iter().map(|item| item.id).collect();
    ids.sort();
    ids
}

fn catalog_view(cache: &CatalogCache) -> Vec<(String, Vec<String>)> {
    cache
        .get_categories()
        .into_iter()
        .map(|category| {
            let ids = sorted_ids(cache.get_items_by_category(&category.name));
            (category.name, ids)
        })
        .collect()
}

#[tokio::test]
async fn consent_sync_applies_additions_and_removals() {
    let store = Arc::new(MemoryStore::default());
    store.set_accepted_users(&[1, 2, 3]);
    let sync = synchronizer(&store, CatalogStrategy::Replace);

    let first = sync.sync_consent().await.expect("initial sync");
    assert!(first.initialized);
    assert_eq!(first.total, 3);

    store.set_accepted_users(&[2, 3, 4]);
    let second = sync.sync_consent().await.expect("second sync");
    assert!(!second.initialized);
    assert_eq!((second.added, second.removed, second.total), (1, 1, 3));

    let cache = sync.consent_cache();
    assert_eq!(cache.snapshot(), HashSet::from([2, 3, 4]));
    assert!(!cache.is_accepted(1));
    assert!(cache.is_accepted(4));

    let third = sync.sync_consent().await.expect("third sync");
    assert!(third.unchanged);
    assert!(!cache.needs_update());
}

#[tokio::test]
async fn declined_users_are_not_cached_as_accepted() {
    let store = Arc::new(MemoryStore::default());
    store.set_users([
        ConsentRecord {
            user_id: 1,
            accepted: true,
        },
        ConsentRecord {
            user_id: 2,
            accepted: false,
        },
    ]);
    let sync = synchronizer(&store, CatalogStrategy::Replace);

    sync.sync_consent().await.expect("sync");
    assert_eq!(sync.consent_cache().snapshot(), HashSet::from([1]));
}

#[tokio::test]
async fn incremental_catalog_sync_matches_a_full_rebuild() {
    let store = Arc::new(MemoryStore::default());
    let incremental = synchronizer(&store, CatalogStrategy::Incremental);
    let replace = synchronizer(&store, CatalogStrategy::Replace);

    let tables = vec![
        vec![
            available("A", "Oils"),
            available("B", "Oils"),
            available("C", "Sets"),
        ],
        vec![
            available("A", "Oils"),
            available("B", "Sets"),
            item_row("C", "Sets", "Недоступен", "шт", 5.0),
            item_row("D", "Gifts", "Забронирован", "мл", 30.0),
        ],
        vec![
            item_row("A", "Oils", "Доступен", "шт", 1.0),
            available("D", "Gifts"),
            available("E", "Oils"),
        ],
    ];

    for (round, rows) in tables.into_iter().enumerate() {
        store.set_item_rows(rows);
        let report = incremental.sync_catalog().await.expect("incremental sync");
        replace.sync_catalog().await.expect("replace sync");

        let expected_mode = if round == 0 {
            CatalogSyncMode::Initialize
        } else {
            CatalogSyncMode::Incremental
        };
        assert_eq!(report.mode, expected_mode, "round {round}");

        let left = incremental.catalog_cache();
        let right = replace.catalog_cache();
        assert_eq!(catalog_view(left), catalog_view(right), "round {round}");
        assert_eq!(
            sorted_ids(left.all_items()),
            sorted_ids(right.all_items()),
            "round {round}"
        );
        assert_eq!(left.get_item("A"), right.get_item("A"), "round {round}");
        assert!(left.indices_agree(), "round {round}");
    }

    let cache = incremental.catalog_cache();
    assert!(cache.get_item("B").is_none());
    assert!(cache.get_item("C").is_none());
    assert_eq!(
        cache.get_item("A").map(|item| item.available_quantity),
        Some(1.0)
    );
}

#[tokio::test]
async fn incremental_sync_of_an_empty_sheet_falls_back_to_replace() {
    let store = Arc::new(MemoryStore::default());
    store.set_item_rows(vec![available("A", "Oils")]);
    let sync = synchronizer(&store, CatalogStrategy::Incremental);
    sync.sync_catalog().await.expect("initial sync");

    store.set_item_rows(Vec::new());
    let report = sync.sync_catalog().await.expect("second sync");

    assert_eq!(report.mode, CatalogSyncMode::Replace);
    assert!(sync.catalog_cache().get_categories().is_empty());
    assert!(sync.catalog_cache().all_items().is_empty());
}

#[tokio::test]
async fn unparseable_rows_are_dropped_without_failing_the_sync() {
    let store = Arc::new(MemoryStore::default());
    let mut broken = available("BAD", "Oils");
    broken.price = Some(Value::String("twelve".to_string()));
    let mut anonymous = available("", "Oils");
    anonymous.id = None;
    store.set_item_rows(vec![available("A", "Oils"), broken, anonymous]);
    let sync = synchronizer(&store, CatalogStrategy::Replace);

    let report = sync.sync_catalog().await.expect("sync");

    assert_eq!(report.rejected_rows, 2);
    assert_eq!(report.items, 1);
    assert!(sync.catalog_cache().get_item("A").is_some());
    assert!(sync.catalog_cache().get_item("BAD").is_none());
}

#[tokio::test(start_paused = true)]
async fn startup_degrades_when_the_store_stays_down() {
    let store = Arc::new(MemoryStore::default());
    store.set_accepted_users(&[1]);
    store.fail_next(usize::MAX);
    let sync = synchronizer(&store, CatalogStrategy::Replace);

    let outcome = sync.startup(3, Duration::from_secs(2)).await;

    assert_eq!(outcome, StartupOutcome::Degraded);
    assert!(!sync.consent_cache().is_initialized());
    assert!(!sync.catalog_cache().is_initialized());
    // consent and the first catalog statement on each of three attempts
    assert_eq!(store.calls(), 6);
}

#[tokio::test(start_paused = true)]
async fn startup_retries_only_the_target_that_failed() {
    let store = Arc::new(MemoryStore::default());
    store.set_accepted_users(&[1]);
    store.set_item_rows(vec![available("A", "Oils")]);
    store.fail_next(1);
    let sync = synchronizer(&store, CatalogStrategy::Replace);

    let outcome = sync.startup(3, Duration::from_secs(2)).await;

    assert_eq!(outcome, StartupOutcome::Ready);
    assert!(sync.consent_cache().is_accepted(1));
    assert!(sync.catalog_cache().get_item("A").is_some());
    // failed consent, catalog (labels + rows), retried consent
    assert_eq!(store.calls(), 4);
}

#[tokio::test]
async fn consent_check_reads_through_while_the_cache_is_cold() {
    let store = Arc::new(MemoryStore::default());
    store.set_accepted_users(&[5]);
    let (sync, front) = storefront(&store);

    assert!(front.is_accepted(5).await.expect("lookup"));
    assert!(!front.is_accepted(6).await.expect("lookup"));
    assert!(sync.consent_cache().is_accepted(5));
    assert_eq!(store.calls(), 2);
}

#[tokio::test]
async fn consent_check_uses_a_fresh_cache() {
    let store = Arc::new(MemoryStore::default());
    store.set_accepted_users(&[1]);
    let (sync, front) = storefront(&store);
    sync.sync_consent().await.expect("sync");
    let calls = store.calls();

    store.set_accepted_users(&[]);
    assert!(front.is_accepted(1).await.expect("lookup"));
    assert_eq!(store.calls(), calls);
}

#[tokio::test]
async fn accepting_the_policy_writes_the_store_then_the_cache() {
    let store = Arc::new(MemoryStore::default());
    let (sync, front) = storefront(&store);
    sync.sync_consent().await.expect("sync");

    assert!(front.register_user(9).await.expect("register"));
    assert!(!front.register_user(9).await.expect("register again"));
    assert!(!front.is_accepted(9).await.expect("lookup"));

    front.accept_policy(9).await.expect("accept");

    assert_eq!(
        store.users(),
        vec![ConsentRecord {
            user_id: 9,
            accepted: true
        }]
    );
    assert!(sync.consent_cache().is_accepted(9));
    assert!(front.is_accepted(9).await.expect("lookup"));
}

#[tokio::test]
async fn accepting_the_policy_registers_unknown_users() {
    let store = Arc::new(MemoryStore::default());
    let (_, front) = storefront(&store);

    front.accept_policy(3).await.expect("accept");

    assert_eq!(
        store.users(),
        vec![ConsentRecord {
            user_id: 3,
            accepted: true
        }]
    );
}

#[tokio::test]
async fn increase_is_clamped_to_stock() {
    let store = Arc::new(MemoryStore::default());
    store.set_item_rows(vec![item_row("X", "Perfume", "Доступен", "мл", 100.0)]);
    let (sync, front) = storefront(&store);
    sync.sync_catalog().await.expect("sync");

    let first = front.increase(1, "X", 7.0).await.expect("first add");
    assert_eq!((first.added, first.quantity), (7.0, 7.0));

    let second = front.increase(1, "X", 100.0).await.expect("second add");
    assert_eq!((second.added, second.quantity), (93.0, 100.0));
    assert_eq!(second.available, 100.0);

    let third = front.increase(1, "X", 1.0).await;
    assert!(matches!(third, Err(CartError::LimitReached(id)) if id == "X"));
    assert_eq!(front.carts().get_item_quantity(1, "X"), 100.0);
}

#[tokio::test]
async fn piece_items_take_whole_units() {
    let store = Arc::new(MemoryStore::default());
    store.set_item_rows(vec![available("P", "Sets")]);
    let (sync, front) = storefront(&store);
    sync.sync_catalog().await.expect("sync");

    let change = front.increase(1, "P", 2.7).await.expect("add");
    assert_eq!(change.added, 2.0);

    let rejected = front.increase(1, "P", 0.5).await;
    assert!(matches!(rejected, Err(CartError::LimitReached(_))));
    assert_eq!(front.carts().get_item_quantity(1, "P"), 2.0);
}

#[tokio::test]
async fn increase_rejects_missing_and_reserved_items() {
    let store = Arc::new(MemoryStore::default());
    store.set_item_rows(vec![item_row("R", "Sets", "Забронирован", "шт", 3.0)]);
    let (sync, front) = storefront(&store);
    sync.sync_catalog().await.expect("sync");

    let reserved = front.increase(1, "R", 1.0).await;
    assert!(matches!(reserved, Err(CartError::NotOrderable(id)) if id == "R"));

    let missing = front.increase(1, "nope", 1.0).await;
    assert!(matches!(missing, Err(CartError::ItemNotFound(id)) if id == "nope"));

    assert!(front.carts().get_cart(1).is_empty());
}

#[tokio::test]
async fn decrease_never_goes_below_zero() {
    let store = Arc::new(MemoryStore::default());
    store.set_item_rows(vec![item_row("X", "Perfume", "Доступен", "мл", 100.0)]);
    let (sync, front) = storefront(&store);
    sync.sync_catalog().await.expect("sync");
    front.increase(1, "X", 7.0).await.expect("add");

    assert_eq!(front.decrease(1, "X", 3.0), 4.0);
    assert_eq!(front.decrease(1, "X", -5.0), 4.0);
    assert_eq!(front.decrease(1, "X", 10.0), 0.0);
    assert!(front.carts().get_cart(1).is_empty());
}

#[tokio::test]
async fn cart_summary_skips_items_that_left_the_catalog() {
    let store = Arc::new(MemoryStore::default());
    store.set_item_rows(vec![available("A", "Oils"), available("B", "Oils")]);
    let (sync, front) = storefront(&store);
    sync.sync_catalog().await.expect("sync");

    front.increase(1, "A", 2.0).await.expect("add A");
    front.increase(1, "B", 1.0).await.expect("add B");

    store.set_item_rows(vec![available("A", "Oils")]);
    sync.sync_catalog().await.expect("resync");

    let summary = front.cart_summary(1).await.expect("summary");
    assert_eq!(summary.lines.len(), 1);
    assert_eq!(summary.lines[0].item.id, "A");
    assert_eq!(summary.lines[0].subtotal, 20.0);
    assert_eq!(summary.total, 20.0);

    front.clear_cart(1);
    assert!(front.cart_summary(1).await.expect("summary").is_empty());
}

#[tokio::test]
async fn item_lookup_on_a_cold_catalog_refreshes_one_row() {
    let store = Arc::new(MemoryStore::default());
    store.set_item_rows(vec![
        available("A", "Oils"),
        item_row("U", "Oils", "Недоступен", "шт", 5.0),
    ]);
    let (sync, front) = storefront(&store);

    let found = front.item("A").await.expect("lookup");
    assert_eq!(found.map(|item| item.id), Some("A".to_string()));
    assert!(front.item("U").await.expect("lookup").is_none());
    assert!(front.item("missing").await.expect("lookup").is_none());

    let cache = sync.catalog_cache();
    assert!(cache.get_item("A").is_some());
    assert!(!cache.is_initialized());
    assert!(cache.needs_update());
}

#[tokio::test]
async fn catalog_reads_trigger_a_sync_when_stale() {
    let store = Arc::new(MemoryStore::default());
    store.set_item_rows(vec![available("A", "Oils"), available("B", "Sets")]);
    let (sync, front) = storefront(&store);

    let categories: Vec<String> = front
        .categories()
        .await
        .expect("categories")
        .into_iter()
        .map(|category| category.name)
        .collect();
    assert_eq!(categories, vec!["Oils", "Sets"]);
    assert!(sync.catalog_cache().is_initialized());

    let oils = front.items_in_category("Oils").await.expect("items");
    assert_eq!(sorted_ids(oils), vec!["A"]);
}

#[tokio::test]
async fn forced_sync_reports_each_target() {
    let store = Arc::new(MemoryStore::default());
    store.set_accepted_users(&[1, 2]);
    store.set_item_rows(vec![available("A", "Oils")]);
    let (_, front) = storefront(&store);

    let report = front.force_sync().await;
    assert!(report.is_complete());
    assert_eq!(report.consent.as_ref().map(|r| r.total).ok(), Some(2));
    assert_eq!(report.catalog.as_ref().map(|r| r.items).ok(), Some(1));

    store.fail_next(1);
    let report = front.force_sync().await;
    assert!(!report.is_complete());
    assert!(report.consent.is_err());
    assert!(report.catalog.is_ok());
}

#[tokio::test]
async fn available_item_without_stock_is_not_orderable() {
    let store = Arc::new(MemoryStore::default());
    store.set_item_rows(vec![item_row("Z", "Oils", "Доступен", "шт", 0.0)]);
    let (sync, front) = storefront(&store);
    sync.sync_catalog().await.expect("sync");

    let result = front.increase(1, "Z", 1.0).await;

    assert!(matches!(result, Err(CartError::NotOrderable(id)) if id == "Z"));
    assert!(front.carts().get_cart(1).is_empty());
}

#[tokio::test]
async fn single_item_refresh_picks_the_same_duplicate_as_a_full_sync() {
    let store = Arc::new(MemoryStore::default());
    store.set_item_rows(vec![
        item_row("D", "Oils", "Доступен", "шт", 1.0),
        item_row("D", "Oils", "Доступен", "шт", 4.0),
    ]);
    let (_, cold_front) = storefront(&store);
    let (warm_sync, _) = storefront(&store);
    warm_sync.sync_catalog().await.expect("sync");

    let refreshed = cold_front
        .item("D")
        .await
        .expect("lookup")
        .map(|item| item.available_quantity);

    assert_eq!(refreshed, Some(4.0));
    assert_eq!(
        refreshed,
        warm_sync
            .catalog_cache()
            .get_item("D")
            .map(|item| item.available_quantity)
    );
}

