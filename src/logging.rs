//! Tracing setup.
//!
//! The bridge logs through `tracing`. Embedders that have no subscriber of
//! their own can call [`init_tracing`] once at startup.

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static INSTALLED: OnceCell<bool> = OnceCell::new();

/// Install a `fmt` subscriber filtered by `RUST_LOG`, falling back to `default_filter`.
///
/// Only the first call installs anything. Returns whether a subscriber from
/// this crate is active (false if another global subscriber was already set).
pub fn init_tracing(default_filter: &str) -> bool {
    *INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_filter))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .try_init()
            .is_ok()
    })
}
