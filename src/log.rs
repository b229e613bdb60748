//! Global tracing subscriber installation, grounded on the one-shot `Once`
//! pattern used elsewhere in this family of tools.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber the first time it's called.
/// Subsequent calls (e.g. from multiple tests in the same process) are
/// no-ops. Honors `RUST_LOG`, defaulting to `info`.
pub fn init() {
    static START: Once = Once::new();
    START.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    });
}
