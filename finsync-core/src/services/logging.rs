//! Logging setup - tracing subscriber for host applications
//!
//! The engine only emits `tracing` events; installing a subscriber is left
//! to the host. `init_logging` is a convenience for hosts without their own.
//! Events carry ids and counts, never balances or descriptions.

use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is not set
pub const DEFAULT_DIRECTIVE: &str = "finsync_core=info";

/// Install a formatted subscriber filtered by `RUST_LOG`
///
/// `default_directive` applies on top of `RUST_LOG`, e.g.
/// `"finsync_core=debug"`. Returns `false` if a global subscriber was
/// already installed, which makes repeated calls harmless.
pub fn init_logging(default_directive: &str) -> bool {
    let mut filter = EnvFilter::from_default_env();
    match default_directive.parse() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(e) => eprintln!("Ignoring invalid log directive '{}': {}", default_directive, e),
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
