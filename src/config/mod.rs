//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::application::sync::CatalogStrategy;
use crate::domain::CatalogVocabulary;
use crate::domain::vocabulary::{
    DEFAULT_ORDER_STEPS, DEFAULT_STATUS_AVAILABLE, DEFAULT_STATUS_RESERVED,
    DEFAULT_STATUS_UNAVAILABLE, DEFAULT_UNIT_MILLILITER, DEFAULT_UNIT_PIECE,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "shopkeep";
const ENV_PREFIX: &str = "SHOPKEEP";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;
const DEFAULT_STALENESS_SECS: u64 = 300;
const DEFAULT_STARTUP_ATTEMPTS: u64 = 3;
const DEFAULT_STARTUP_BACKOFF_SECS: u64 = 5;

const DEFAULT_COL_USER_ID: &str = "tg_id";
const DEFAULT_COL_PRIVACY_ACCEPTED: &str = "privacy_accepted";
const DEFAULT_COL_ITEM_ID: &str = "ID Товара";
const DEFAULT_COL_ITEM_NAME: &str = "Название Товара";
const DEFAULT_COL_ITEM_CATEGORY: &str = "Категория";
const DEFAULT_COL_ITEM_DESCRIPTION: &str = "Описание";
const DEFAULT_COL_ITEM_PRICE: &str = "Цена за единицу";
const DEFAULT_COL_ITEM_IMAGE_URL: &str = "Ссылка на фото";
const DEFAULT_COL_ITEM_UNIT: &str = "Единица измерения";
const DEFAULT_COL_ITEM_QUANTITY: &str = "Доступное количество";
const DEFAULT_COL_ITEM_STATUS: &str = "Статус";
const DEFAULT_COL_ITEM_ORDER_STEPS: &str = "Шаг заказа";

/// Command-line arguments for the shopkeep binary.
#[derive(Debug, Parser)]
#[command(
    name = "shopkeep",
    version,
    about = "Storefront cache and spreadsheet synchronization service"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "SHOPKEEP_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Fill the caches and keep them synchronized until interrupted.
    Serve(ServeArgs),
    /// Reconcile both caches once against the backing store and exit.
    Sync(SyncArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct CommonOverrides {
    /// Override the backing store endpoint URL.
    #[arg(long = "store-endpoint", value_name = "URL")]
    pub store_endpoint: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub common: CommonOverrides,

    /// Override the background synchronization interval.
    #[arg(long = "sync-interval-seconds", value_name = "SECONDS")]
    pub sync_interval_seconds: Option<u64>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SyncArgs {
    #[command(flatten)]
    pub common: CommonOverrides,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub store: StoreSettings,
    pub columns: ColumnSettings,
    pub vocabulary: CatalogVocabulary,
    pub sync: SyncSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub endpoint: Url,
    pub access_token: Option<String>,
    pub users_table: String,
    pub items_table: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSettings {
    pub users: UserColumns,
    pub items: ItemColumns,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserColumns {
    pub user_id: String,
    pub privacy_accepted: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemColumns {
    pub id: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub price: String,
    pub image_url: String,
    pub unit: String,
    pub available_quantity: String,
    pub status: String,
    pub order_steps: String,
}

impl Default for ColumnSettings {
    fn default() -> Self {
        Self {
            users: UserColumns {
                user_id: DEFAULT_COL_USER_ID.to_string(),
                privacy_accepted: DEFAULT_COL_PRIVACY_ACCEPTED.to_string(),
            },
            items: ItemColumns {
                id: DEFAULT_COL_ITEM_ID.to_string(),
                name: DEFAULT_COL_ITEM_NAME.to_string(),
                category: DEFAULT_COL_ITEM_CATEGORY.to_string(),
                description: DEFAULT_COL_ITEM_DESCRIPTION.to_string(),
                price: DEFAULT_COL_ITEM_PRICE.to_string(),
                image_url: DEFAULT_COL_ITEM_IMAGE_URL.to_string(),
                unit: DEFAULT_COL_ITEM_UNIT.to_string(),
                available_quantity: DEFAULT_COL_ITEM_QUANTITY.to_string(),
                status: DEFAULT_COL_ITEM_STATUS.to_string(),
                order_steps: DEFAULT_COL_ITEM_ORDER_STEPS.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub interval: Duration,
    pub staleness: Duration,
    pub startup_attempts: NonZeroU32,
    pub startup_backoff: Duration,
    pub catalog_strategy: CatalogStrategy,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("vocabulary.default_order_steps")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(args),
        Some(Command::Sync(args)) => raw.apply_common_overrides(&args.common),
        None => raw.apply_serve_overrides(&ServeArgs::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    store: RawStoreSettings,
    columns: RawColumnSettings,
    vocabulary: RawVocabularySettings,
    sync: RawSyncSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, args: &ServeArgs) {
        self.apply_common_overrides(&args.common);
        if let Some(seconds) = args.sync_interval_seconds {
            self.sync.interval_seconds = Some(seconds);
        }
    }

    fn apply_common_overrides(&mut self, overrides: &CommonOverrides) {
        if let Some(endpoint) = overrides.store_endpoint.as_ref() {
            self.store.endpoint = Some(endpoint.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            store,
            columns,
            vocabulary,
            sync,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let store = build_store_settings(store)?;
        let columns = build_column_settings(columns)?;
        let vocabulary = build_vocabulary(vocabulary)?;
        let sync = build_sync_settings(sync)?;

        Ok(Self {
            logging,
            store,
            columns,
            vocabulary,
            sync,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let endpoint = required(store.endpoint, "store.endpoint")?;
    let endpoint = Url::parse(&endpoint)
        .map_err(|err| LoadError::invalid("store.endpoint", format!("invalid URL: {err}")))?;
    if !matches!(endpoint.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "store.endpoint",
            format!("unsupported scheme `{}`", endpoint.scheme()),
        ));
    }

    let access_token = store.access_token.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let users_table = required(store.users_table, "store.users_table")?;
    let items_table = required(store.items_table, "store.items_table")?;

    let timeout_secs = positive(
        store.request_timeout_seconds,
        DEFAULT_REQUEST_TIMEOUT_SECS,
        "store.request_timeout_seconds",
    )?;

    Ok(StoreSettings {
        endpoint,
        access_token,
        users_table,
        items_table,
        request_timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_column_settings(columns: RawColumnSettings) -> Result<ColumnSettings, LoadError> {
    let RawColumnSettings { users, items } = columns;
    let defaults = ColumnSettings::default();

    Ok(ColumnSettings {
        users: UserColumns {
            user_id: label(users.user_id, defaults.users.user_id, "columns.users.user_id")?,
            privacy_accepted: label(
                users.privacy_accepted,
                defaults.users.privacy_accepted,
                "columns.users.privacy_accepted",
            )?,
        },
        items: ItemColumns {
            id: label(items.id, defaults.items.id, "columns.items.id")?,
            name: label(items.name, defaults.items.name, "columns.items.name")?,
            category: label(
                items.category,
                defaults.items.category,
                "columns.items.category",
            )?,
            description: label(
                items.description,
                defaults.items.description,
                "columns.items.description",
            )?,
            price: label(items.price, defaults.items.price, "columns.items.price")?,
            image_url: label(
                items.image_url,
                defaults.items.image_url,
                "columns.items.image_url",
            )?,
            unit: label(items.unit, defaults.items.unit, "columns.items.unit")?,
            available_quantity: label(
                items.available_quantity,
                defaults.items.available_quantity,
                "columns.items.available_quantity",
            )?,
            status: label(items.status, defaults.items.status, "columns.items.status")?,
            order_steps: label(
                items.order_steps,
                defaults.items.order_steps,
                "columns.items.order_steps",
            )?,
        },
    })
}

fn build_vocabulary(vocabulary: RawVocabularySettings) -> Result<CatalogVocabulary, LoadError> {
    let default_order_steps = match vocabulary.default_order_steps {
        None => DEFAULT_ORDER_STEPS.to_vec(),
        Some(steps) if steps.is_empty() => {
            return Err(LoadError::invalid(
                "vocabulary.default_order_steps",
                "must contain at least one step",
            ));
        }
        Some(mut steps) => {
            if let Some(bad) = steps.iter().find(|step| !step.is_finite() || **step <= 0.0) {
                return Err(LoadError::invalid(
                    "vocabulary.default_order_steps",
                    format!("step `{bad}` must be a positive number"),
                ));
            }
            steps.sort_by(f64::total_cmp);
            steps.dedup();
            steps
        }
    };

    Ok(CatalogVocabulary {
        status_available: label(
            vocabulary.status_available,
            DEFAULT_STATUS_AVAILABLE.to_string(),
            "vocabulary.status_available",
        )?,
        status_reserved: label(
            vocabulary.status_reserved,
            DEFAULT_STATUS_RESERVED.to_string(),
            "vocabulary.status_reserved",
        )?,
        status_unavailable: label(
            vocabulary.status_unavailable,
            DEFAULT_STATUS_UNAVAILABLE.to_string(),
            "vocabulary.status_unavailable",
        )?,
        unit_piece: label(
            vocabulary.unit_piece,
            DEFAULT_UNIT_PIECE.to_string(),
            "vocabulary.unit_piece",
        )?,
        unit_milliliter: label(
            vocabulary.unit_milliliter,
            DEFAULT_UNIT_MILLILITER.to_string(),
            "vocabulary.unit_milliliter",
        )?,
        default_order_steps,
    })
}

fn build_sync_settings(sync: RawSyncSettings) -> Result<SyncSettings, LoadError> {
    let interval = positive(
        sync.interval_seconds,
        DEFAULT_SYNC_INTERVAL_SECS,
        "sync.interval_seconds",
    )?;
    let staleness = positive(
        sync.staleness_seconds,
        DEFAULT_STALENESS_SECS,
        "sync.staleness_seconds",
    )?;
    let attempts = non_zero_u32(
        sync.startup_attempts.unwrap_or(DEFAULT_STARTUP_ATTEMPTS),
        "sync.startup_attempts",
    )?;
    let backoff = sync
        .startup_backoff_seconds
        .unwrap_or(DEFAULT_STARTUP_BACKOFF_SECS);

    Ok(SyncSettings {
        interval: Duration::from_secs(interval),
        staleness: Duration::from_secs(staleness),
        startup_attempts: attempts,
        startup_backoff: Duration::from_secs(backoff),
        catalog_strategy: sync.catalog_strategy.unwrap_or_default(),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    endpoint: Option<String>,
    access_token: Option<String>,
    users_table: Option<String>,
    items_table: Option<String>,
    request_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawColumnSettings {
    users: RawUserColumns,
    items: RawItemColumns,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUserColumns {
    user_id: Option<String>,
    privacy_accepted: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawItemColumns {
    id: Option<String>,
    name: Option<String>,
    category: Option<String>,
    description: Option<String>,
    price: Option<String>,
    image_url: Option<String>,
    unit: Option<String>,
    available_quantity: Option<String>,
    status: Option<String>,
    order_steps: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawVocabularySettings {
    status_available: Option<String>,
    status_reserved: Option<String>,
    status_unavailable: Option<String>,
    unit_piece: Option<String>,
    unit_milliliter: Option<String>,
    default_order_steps: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSyncSettings {
    interval_seconds: Option<u64>,
    staleness_seconds: Option<u64>,
    startup_attempts: Option<u64>,
    startup_backoff_seconds: Option<u64>,
    catalog_strategy: Option<CatalogStrategy>,
}

fn required(value: Option<String>, key: &'static str) -> Result<String, LoadError> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| LoadError::invalid(key, "must be set"))
}

fn label(value: Option<String>, default: String, key: &'static str) -> Result<String, LoadError> {
    match value {
        None => Ok(default),
        Some(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Err(LoadError::invalid(key, "must not be empty"));
            }
            Ok(trimmed.to_string())
        }
    }
}

fn positive(value: Option<u64>, default: u64, key: &'static str) -> Result<u64, LoadError> {
    let value = value.unwrap_or(default);
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(value)
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
