use std::{process, sync::Arc};

use shopkeep::{
    application::{
        error::AppError,
        repos::BackingStore,
        scheduler::BackgroundSync,
        storefront::Storefront,
        sync::{StartupOutcome, SyncReport, Synchronizer},
    },
    cache::{CacheConfig, CartStore, CatalogCache, ConsentCache},
    config,
    infra::{error::InfraError, sheets::SheetsClient, telemetry},
};
use time::format_description::well_known::Rfc3339;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, transient = error.is_transient(), "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "failed to load configuration: {err}"
        )))
    })?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(config::ServeArgs::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let app = build_application_context(&settings)?;

    match command {
        config::Command::Serve(_) => run_serve(&settings, app).await,
        config::Command::Sync(_) => run_sync(app).await,
    }
}

struct ApplicationContext {
    sync: Arc<Synchronizer>,
    storefront: Arc<Storefront>,
}

fn build_application_context(settings: &config::Settings) -> Result<ApplicationContext, AppError> {
    let store: Arc<dyn BackingStore> = Arc::new(SheetsClient::new(
        &settings.store,
        &settings.columns,
        settings.vocabulary.clone(),
    )?);

    let cache_config = CacheConfig::from(&settings.sync);
    let sync = Arc::new(Synchronizer::new(
        store,
        Arc::new(ConsentCache::new(&cache_config)),
        Arc::new(CatalogCache::new(&cache_config)),
        settings.vocabulary.clone(),
        settings.sync.catalog_strategy,
    ));
    let storefront = Arc::new(Storefront::new(Arc::clone(&sync), Arc::new(CartStore::new())));

    Ok(ApplicationContext { sync, storefront })
}

async fn run_serve(settings: &config::Settings, app: ApplicationContext) -> Result<(), AppError> {
    info!(
        endpoint = %settings.store.endpoint,
        strategy = settings.sync.catalog_strategy.as_str(),
        "starting shopkeep"
    );

    let outcome = app
        .sync
        .startup(
            settings.sync.startup_attempts.get(),
            settings.sync.startup_backoff,
        )
        .await;
    if outcome == StartupOutcome::Degraded {
        warn!("serving with possibly empty caches until the next successful sync");
    }

    let background = BackgroundSync::start(Arc::clone(&app.sync), settings.sync.interval);

    let signal = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
    background.stop().await;

    signal.map_err(|err| AppError::from(InfraError::from(err)))
}

async fn run_sync(app: ApplicationContext) -> Result<(), AppError> {
    let SyncReport {
        consent,
        catalog,
        finished_at,
    } = app.storefront.force_sync().await;

    let consent = consent?;
    let catalog = catalog?;

    info!(
        finished_at = %finished_at.format(&Rfc3339).unwrap_or_default(),
        users = consent.total,
        users_added = consent.added,
        users_removed = consent.removed,
        categories = catalog.categories,
        items = catalog.items,
        rejected_rows = catalog.rejected_rows,
        "forced synchronization complete"
    );
    Ok(())
}
