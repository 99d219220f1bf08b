//! Telemetry helpers for structured logging and tracing.

/// Initialize tracing for binaries and tests. Users can install their own
/// subscriber; this helper installs a default env-filtered fmt subscriber
/// (`RUST_LOG=prometheus_worker_pool=debug`) if none is set.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_thread_names(true)
        .try_init();
}

/// Short form of a pool id for log fields.
#[must_use]
pub fn short_id(id: &uuid::Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}
