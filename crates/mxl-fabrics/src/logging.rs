//! Process-wide logging bridge.
//!
//! Grounded on the `tracing_subscriber::registry().with(fmt::layer())...init()`
//! composition in `claudefs-gateway/src/main.rs` and
//! `claudefs-fuse/src/main.rs`. spec.md §9 calls for "exactly one: a logging
//! bridge initialised once per process with a memoised flag" and "a safe
//! re-entry guard" — a single `createInstance` call already runs this, but
//! nothing stops a process from creating more than one
//! [`crate::ffi::MxlFabricsInstance`], so `init()` must tolerate being
//! called many times.

use std::sync::Once;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

static INIT: Once = Once::new();

/// Install the global `tracing` subscriber, if one hasn't been installed by
/// an earlier call in this process. Safe to call from every
/// `createInstance`: only the first call takes effect.
pub fn init() {
    INIT.call_once(|| {
        tracing_subscriber::registry().with(fmt::layer()).with(EnvFilter::from_default_env()).init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init();
        init();
    }
}
