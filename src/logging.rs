//! Diagnostic logging.
//!
//! Everything goes to **stderr**; stdout is reserved for command output.
//! `RUST_LOG` wins when set, otherwise the level follows `-v`:
//! none ⇒ `warn`, `-v` ⇒ `info`, `-vv` or more ⇒ `debug`.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn default_level(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(verbosity: u8) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level(verbosity)))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}
