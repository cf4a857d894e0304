use tracing_subscriber::{EnvFilter, fmt};

/// Install the global tracing subscriber. Safe to call more than once; later
/// calls are no-ops. Filter via `RUST_LOG`, e.g. `marketmaker=debug`.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
