//! Logging setup
//!
//! Debug runs get human-readable output at DEBUG; everything else gets one
//! JSON object per event at INFO. `RUST_LOG` overrides the level either way.

use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Settings;

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed, in which case
/// nothing changes.
pub fn init(settings: &Settings) -> bool {
    let default_level = if settings.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let installed = if settings.debug {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init()
    };
    installed.is_ok()
}

/// Root span carrying `service` and `environment` on every event of the run
pub fn root_span(settings: &Settings) -> Span {
    tracing::info_span!(
        "runway",
        service = settings.service.as_deref().unwrap_or("-"),
        environment = settings.environment.as_deref().unwrap_or("-"),
    )
}
