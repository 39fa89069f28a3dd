//! Logging init: stderr by default, optional log file, ANSI only on a TTY.

use anyhow::{Context, Result};
use std::fs;
use std::io::{self, IsTerminal};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn env_filter(debug: bool, verbose: bool) -> EnvFilter {
    let default = if verbose {
        "trace"
    } else if debug {
        "debug"
    } else {
        "info"
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Initialize structured logging to stderr. Colorized only when stderr is a
/// terminal, matching the plain output daemons and pipes expect.
pub fn init_stderr(debug: bool, verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(debug, verbose))
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .init();
}

/// Initialize structured logging to a file (append). Returns Err if the file
/// cannot be opened so the caller can fall back to `init_stderr`.
pub fn init_file(debug: bool, verbose: bool, path: &Path) -> Result<()> {
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(debug, verbose))
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .init();

    tracing::info!("logging to {}", path.display());
    Ok(())
}

/// Init with an optional log file, falling back to stderr when the file is
/// absent or unopenable. Never fails; the process should not die over logging.
pub fn init(debug: bool, verbose: bool, logfile: Option<&Path>) {
    if let Some(path) = logfile {
        if let Err(e) = init_file(debug, verbose, path) {
            eprintln!("ddson: log file unavailable ({e:#}), using stderr");
            init_stderr(debug, verbose);
        }
    } else {
        init_stderr(debug, verbose);
    }
}
