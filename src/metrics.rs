//! Shutdown and callback counters, recorded through the `metrics` facade.
//!
//! No exporter is installed here; whatever recorder the binary installs
//! receives them.

pub const METRIC_SHUTDOWN_INITIATED: &str = "runway_shutdown_initiated_total";
pub const METRIC_SHUTDOWN_COMPLETED: &str = "runway_shutdown_completed_total";
pub const METRIC_SHUTDOWN_INCOMPLETE: &str = "runway_shutdown_incomplete_total";
pub const METRIC_CALLBACK_FAILURES: &str = "runway_callback_failures_total";

pub(crate) fn emit_shutdown_initiated(trigger: &str) {
    ::metrics::counter!(
        METRIC_SHUTDOWN_INITIATED,
        "trigger" => trigger.to_string()
    )
    .increment(1);
}

pub(crate) fn emit_shutdown_completed(drained: bool) {
    ::metrics::counter!(
        METRIC_SHUTDOWN_COMPLETED,
        "drained" => drained.to_string()
    )
    .increment(1);
    if !drained {
        ::metrics::counter!(METRIC_SHUTDOWN_INCOMPLETE).increment(1);
    }
}

pub(crate) fn emit_callback_failure(phase: &str) {
    ::metrics::counter!(
        METRIC_CALLBACK_FAILURES,
        "phase" => phase.to_string()
    )
    .increment(1);
}
