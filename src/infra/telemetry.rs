//! Log output and metric descriptions for the shopkeep binary.

use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register units and help text for every metric the caches and the
/// synchronizer emit. Safe to call more than once.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "shopkeep_cache_hit_total",
            Unit::Count,
            "Reads answered from a fresh cache, labelled by cache."
        );
        describe_counter!(
            "shopkeep_cache_miss_total",
            Unit::Count,
            "Reads that found a stale cache and went to the backing store."
        );
        describe_counter!(
            "shopkeep_sync_total",
            Unit::Count,
            "Reconciliation passes, labelled by target and outcome."
        );
        describe_counter!(
            "shopkeep_item_rows_rejected_total",
            Unit::Count,
            "Item rows dropped because they could not be parsed."
        );
        describe_histogram!(
            "shopkeep_sync_ms",
            Unit::Milliseconds,
            "Reconciliation latency in milliseconds."
        );
    });
}
