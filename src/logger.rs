use crate::error::Result;
use std::io;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init(verbose: bool) -> Result<()> {
    init_with_filter(if verbose { "debug" } else { "info" })
}

/// Used by integration tests that want a specific, quieter filter instead of
/// the verbose/info binary choice the CLI offers.
pub fn init_with_filter(directive: &str) -> Result<()> {
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(io::stderr);

    // Subsequent calls (e.g. from repeated test setup) must not panic.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();

    Ok(())
}