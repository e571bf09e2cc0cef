//! Logging initialization.
//!
//! Controlled by:
//! - `RUST_LOG` → standard `EnvFilter` directives (default `warn`, or `debug`
//!   when the CLI is run with `--debug`)
//! - `RBSCM_LOG_FORMAT=json` → JSON events to stderr instead of plain text
//!
//! Diff and patch output go to stdout, so logs always go to stderr.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

/// Install the global subscriber. A second call keeps the first subscriber.
pub fn init(debug: bool) {
    let default_level = if debug { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let json = std::env::var("RBSCM_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("warning: logging already initialized: {e}");
    }
}
