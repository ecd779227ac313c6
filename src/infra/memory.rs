//! In-process backing store.
//!
//! Holds user and item rows in memory and answers the same query surface as
//! the spreadsheet adapter. Used for local runs without a spreadsheet and by
//! the test suites, which can also make it fail on demand.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::application::repos::{BackingStore, ItemFilter, StoreError};
use crate::domain::cells::cell_text;
use crate::domain::{CatalogVocabulary, ConsentRecord, ItemRow, ItemStatus, UserId};

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<UserId, bool>,
    items: Vec<ItemRow>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    vocabulary: CatalogVocabulary,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new(vocabulary: CatalogVocabulary) -> Self {
        Self {
            vocabulary,
            ..Self::default()
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the user table.
    pub fn set_users(&self, records: impl IntoIterator<Item = ConsentRecord>) {
        self.tables().users = records
            .into_iter()
            .map(|record| (record.user_id, record.accepted))
            .collect();
    }

    /// Replace the user table with these users, all having accepted.
    pub fn set_accepted_users(&self, users: &[UserId]) {
        self.set_users(users.iter().map(|&user_id| ConsentRecord {
            user_id,
            accepted: true,
        }));
    }

    pub fn users(&self) -> Vec<ConsentRecord> {
        self.tables()
            .users
            .iter()
            .map(|(&user_id, &accepted)| ConsentRecord { user_id, accepted })
            .collect()
    }

    /// Replace the item table.
    pub fn set_item_rows(&self, rows: Vec<ItemRow>) {
        self.tables().items = rows;
    }

    /// Make the next `count` calls fail with a transport error.
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Number of statements executed so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn begin(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::transport("injected failure"));
        }
        Ok(())
    }

    fn matches(&self, row: &ItemRow, filter: &ItemFilter) -> bool {
        let text = |cell: &Option<Value>| cell_text(cell.as_ref());
        match filter {
            ItemFilter::All => true,
            ItemFilter::Category(name) => text(&row.category).as_deref() == Some(name.as_str()),
            ItemFilter::Id(id) => text(&row.id).as_deref() == Some(id.as_str()),
            ItemFilter::Visible => {
                text(&row.status).as_deref()
                    != Some(self.vocabulary.status_label(ItemStatus::Unavailable))
            }
        }
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn fetch_accepted_users(&self) -> Result<Vec<UserId>, StoreError> {
        self.begin()?;
        Ok(self
            .tables()
            .users
            .iter()
            .filter(|(_, accepted)| **accepted)
            .map(|(user_id, _)| *user_id)
            .collect())
    }

    async fn fetch_consent(&self, user_id: UserId) -> Result<Option<bool>, StoreError> {
        self.begin()?;
        Ok(self.tables().users.get(&user_id).copied())
    }

    async fn set_consent(&self, user_id: UserId, accepted: bool) -> Result<(), StoreError> {
        self.begin()?;
        if let Some(flag) = self.tables().users.get_mut(&user_id) {
            *flag = accepted;
        }
        Ok(())
    }

    async fn insert_user(&self, user_id: UserId) -> Result<bool, StoreError> {
        self.begin()?;
        let mut tables = self.tables();
        if tables.users.contains_key(&user_id) {
            return Ok(false);
        }
        tables.users.insert(user_id, false);
        Ok(true)
    }

    async fn fetch_category_labels(&self) -> Result<Vec<String>, StoreError> {
        self.begin()?;
        let mut labels: Vec<String> = Vec::new();
        for row in &self.tables().items {
            if let Some(label) = cell_text(row.category.as_ref())
                && !labels.contains(&label)
            {
                labels.push(label);
            }
        }
        Ok(labels)
    }

    async fn fetch_item_rows(&self, filter: ItemFilter) -> Result<Vec<ItemRow>, StoreError> {
        self.begin()?;
        Ok(self
            .tables()
            .items
            .iter()
            .filter(|row| self.matches(row, &filter))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn row(id: &str, category: &str, status: &str) -> ItemRow {
        ItemRow {
            id: Some(json!(id)),
            category: Some(json!(category)),
            status: Some(json!(status)),
            ..ItemRow::default()
        }
    }

    #[tokio::test]
    async fn visible_filter_hides_unavailable_rows() {
        let store = MemoryStore::new(CatalogVocabulary::default());
        store.set_item_rows(vec![
            row("a", "Oils", "Доступен"),
            row("b", "Oils", "Недоступен"),
            row("c", "Sets", "Забронирован"),
        ]);

        let visible = store
            .fetch_item_rows(ItemFilter::Visible)
            .await
            .expect("rows");
        assert_eq!(visible.len(), 2);

        let labels = store.fetch_category_labels().await.expect("labels");
        assert_eq!(labels, vec!["Oils", "Sets"]);
    }

    #[tokio::test]
    async fn insert_user_is_check_then_insert() {
        let store = MemoryStore::default();
        assert!(store.insert_user(5).await.expect("insert"));
        assert!(!store.insert_user(5).await.expect("insert"));
        assert_eq!(store.fetch_consent(5).await.expect("consent"), Some(false));
        assert_eq!(store.fetch_consent(6).await.expect("consent"), None);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let store = MemoryStore::default();
        store.fail_next(2);

        assert!(store.fetch_accepted_users().await.is_err());
        assert!(store.fetch_accepted_users().await.is_err());
        assert!(store.fetch_accepted_users().await.is_ok());
        assert_eq!(store.calls(), 3);
    }
}
