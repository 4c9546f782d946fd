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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "quire_cache_saved_total",
            Unit::Count,
            "Total number of rendered pages written to the static cache."
        );
        describe_counter!(
            "quire_cache_skipped_total",
            Unit::Count,
            "Total number of responses not cached, labelled by reason."
        );
        describe_counter!(
            "quire_cache_invalidated_total",
            Unit::Count,
            "Total number of cached pages deleted by invalidation."
        );
        describe_counter!(
            "quire_invalidation_coalesced_total",
            Unit::Count,
            "Total number of mutations folded into an in-flight invalidation."
        );
        describe_counter!(
            "quire_transform_success_total",
            Unit::Count,
            "Total number of media transforms written."
        );
        describe_counter!(
            "quire_transform_failure_total",
            Unit::Count,
            "Total number of media transforms that failed."
        );
        describe_histogram!(
            "quire_warm_ms",
            Unit::Milliseconds,
            "Cache warm run latency in milliseconds."
        );
    });
}
