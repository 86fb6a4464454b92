//! Logging setup for the CLI.
//!
//! Library crates only emit tracing events; this is the one place a
//! subscriber is installed. `RUST_LOG` overrides the defaults unless a
//! verbosity flag is given.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. Call once, before any logging.
pub fn init_logger(verbose: bool, quiet: bool) {
    let filter = if verbose {
        EnvFilter::new("weft=debug,weft_graph=debug,weft_cli=debug")
    } else if quiet {
        EnvFilter::new("weft=error,weft_graph=error,weft_cli=error")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("weft=info,weft_graph=info,weft_cli=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_target(false).without_time())
        .init();
}
