//! Logging setup and the crate-wide tracing prelude.
//!
//! Modules pull in the macros with `use crate::tracing::prelude::*` so the
//! log call sites read the same everywhere.

use std::env;

use time::macros::format_description;
use tracing_subscriber::{EnvFilter, fmt::time::LocalTime, prelude::*};

pub mod prelude {
    pub use ::tracing::{debug, error, info, instrument, trace, warn};
}

const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber.
///
/// When started by systemd (JOURNAL_STREAM is set) records go to the
/// journal with their structured fields intact. Everywhere else they go to
/// stdout with local timestamps. Both honor RUST_LOG.
pub fn init_journald_or_stdout() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if env::var_os("JOURNAL_STREAM").is_some() {
        match tracing_journald::layer() {
            Ok(journald) => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(journald)
                    .init();
                return;
            }
            Err(e) => {
                eprintln!("journald unavailable, logging to stdout: {e}");
            }
        }
    }

    let timer = LocalTime::new(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    ));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_timer(timer))
        .init();
}
