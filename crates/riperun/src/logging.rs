//! Subscriber setup for binaries and tests.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_DIRECTIVE: &str = "riperun=info";

/// Installs a fmt subscriber filtered by `RUST_LOG`, falling back to
/// `riperun=info`. Later calls are no-ops.
pub fn init() {
    init_with(DEFAULT_DIRECTIVE);
}

pub fn init_with(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
