//! Spreadsheet backing store reached through a SQL-over-HTTP adapter.
//!
//! Every call is a single `POST {endpoint}` carrying `{"sql", "params"}` and
//! answered with `{"rows": [[cell, ...], ...]}`. Table and column names come
//! from configuration and are quoted as identifiers; values supplied at run
//! time only ever travel in `params`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use crate::application::repos::{BackingStore, ItemFilter, StoreError};
use crate::config::{ColumnSettings, StoreSettings};
use crate::domain::cells::{cell_flag, cell_text, cell_user_id};
use crate::domain::{CatalogVocabulary, ItemRow, ItemStatus, UserId};

use super::error::InfraError;

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    sql: &'a str,
    params: &'a [Value],
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    rows: Vec<Vec<Value>>,
}

/// Prepared statements for the configured tables and columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statements {
    accepted_users: String,
    consent_of: String,
    set_consent: String,
    user_exists: String,
    insert_user: String,
    category_labels: String,
    items_base: String,
    item_category_column: String,
    item_id_column: String,
    item_status_column: String,
}

impl Statements {
    pub fn new(users_table: &str, items_table: &str, columns: &ColumnSettings) -> Self {
        let users = quote_ident(users_table);
        let items = quote_ident(items_table);
        let user_id = quote_ident(&columns.users.user_id);
        let accepted = quote_ident(&columns.users.privacy_accepted);
        let item = &columns.items;

        let item_columns = [
            &item.id,
            &item.category,
            &item.name,
            &item.description,
            &item.price,
            &item.image_url,
            &item.unit,
            &item.available_quantity,
            &item.status,
            &item.order_steps,
        ]
        .map(|column| quote_ident(column))
        .join(", ");

        Self {
            accepted_users: format!("SELECT {user_id} FROM {users} WHERE {accepted} = ?"),
            consent_of: format!("SELECT {accepted} FROM {users} WHERE {user_id} = ?"),
            set_consent: format!("UPDATE {users} SET {accepted} = ? WHERE {user_id} = ?"),
            user_exists: format!("SELECT {user_id} FROM {users} WHERE {user_id} = ?"),
            insert_user: format!("INSERT INTO {users} ({user_id}, {accepted}) VALUES (?, ?)"),
            category_labels: format!(
                "SELECT DISTINCT {} FROM {items}",
                quote_ident(&item.category)
            ),
            items_base: format!("SELECT {item_columns} FROM {items}"),
            item_category_column: quote_ident(&item.category),
            item_id_column: quote_ident(&item.id),
            item_status_column: quote_ident(&item.status),
        }
    }

    /// Item select for `filter`, with the parameters it binds.
    pub fn items(&self, filter: &ItemFilter, vocabulary: &CatalogVocabulary) -> (String, Vec<Value>) {
        match filter {
            ItemFilter::All => (self.items_base.clone(), Vec::new()),
            ItemFilter::Category(name) => (
                format!("{} WHERE {} = ?", self.items_base, self.item_category_column),
                vec![Value::from(name.as_str())],
            ),
            ItemFilter::Id(id) => (
                format!("{} WHERE {} = ?", self.items_base, self.item_id_column),
                vec![Value::from(id.as_str())],
            ),
            ItemFilter::Visible => (
                format!("{} WHERE {} != ?", self.items_base, self.item_status_column),
                vec![Value::from(vocabulary.status_label(ItemStatus::Unavailable))],
            ),
        }
    }
}

/// Quote a configured table or column name as an SQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub struct SheetsClient {
    client: Client,
    endpoint: Url,
    access_token: Option<String>,
    statements: Statements,
    vocabulary: CatalogVocabulary,
}

impl SheetsClient {
    pub fn new(
        store: &StoreSettings,
        columns: &ColumnSettings,
        vocabulary: CatalogVocabulary,
    ) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(concat!("shopkeep/", env!("CARGO_PKG_VERSION")))
            .timeout(store.request_timeout)
            .build()
            .map_err(|err| InfraError::http(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            endpoint: store.endpoint.clone(),
            access_token: store.access_token.clone(),
            statements: Statements::new(&store.users_table, &store.items_table, columns),
            vocabulary,
        })
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>, StoreError> {
        debug!(sql, params = params.len(), "executing store statement");

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .json(&QueryRequest { sql, params });
        if let Some(token) = self.access_token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(StoreError::RateLimited);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: QueryResponse = response.json().await.map_err(|err| {
            if err.is_timeout() {
                StoreError::Timeout
            } else {
                StoreError::decode(err)
            }
        })?;
        Ok(body.rows)
    }
}

fn map_transport_error(err: reqwest::Error) -> StoreError {
    if err.is_timeout() {
        StoreError::Timeout
    } else {
        StoreError::transport(err)
    }
}

#[async_trait]
impl BackingStore for SheetsClient {
    #[instrument(skip(self))]
    async fn fetch_accepted_users(&self) -> Result<Vec<UserId>, StoreError> {
        let rows = self
            .query(&self.statements.accepted_users, &[Value::Bool(true)])
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| cell_user_id(row.first()))
            .collect())
    }

    #[instrument(skip(self))]
    async fn fetch_consent(&self, user_id: UserId) -> Result<Option<bool>, StoreError> {
        let rows = self
            .query(&self.statements.consent_of, &[Value::from(user_id)])
            .await?;
        Ok(rows.first().map(|row| cell_flag(row.first())))
    }

    #[instrument(skip(self))]
    async fn set_consent(&self, user_id: UserId, accepted: bool) -> Result<(), StoreError> {
        self.query(
            &self.statements.set_consent,
            &[Value::Bool(accepted), Value::from(user_id)],
        )
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn insert_user(&self, user_id: UserId) -> Result<bool, StoreError> {
        let existing = self
            .query(&self.statements.user_exists, &[Value::from(user_id)])
            .await?;
        if !existing.is_empty() {
            return Ok(false);
        }
        self.query(
            &self.statements.insert_user,
            &[Value::from(user_id), Value::Bool(false)],
        )
        .await?;
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn fetch_category_labels(&self) -> Result<Vec<String>, StoreError> {
        let rows = self.query(&self.statements.category_labels, &[]).await?;
        Ok(rows
            .iter()
            .filter_map(|row| cell_text(row.first()))
            .collect())
    }

    #[instrument(skip(self))]
    async fn fetch_item_rows(&self, filter: ItemFilter) -> Result<Vec<ItemRow>, StoreError> {
        let (sql, params) = self.statements.items(&filter, &self.vocabulary);
        let rows = self.query(&sql, &params).await?;
        Ok(rows.into_iter().map(ItemRow::from_cells).collect())
    }
}
