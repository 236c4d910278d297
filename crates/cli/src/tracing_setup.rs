//! Tracing subscriber initialization.
//!
//! # Priority (highest to lowest)
//!
//! 1. `INDEXSYNC_LOG` env var (per-target directives, e.g. `indexsync_engine=debug`)
//! 2. `RUST_LOG` env var
//! 3. CLI flags (`-v` → debug, `-q` → error)
//! 4. Default: `info` for indexsync crates, `warn` for everything else

use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const CRATES: [&str; 4] = ["indexsync", "indexsync_core", "indexsync_storage", "indexsync_engine"];

/// Verbosity level derived from CLI flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// `--quiet`: only errors
    Quiet,
    /// Run lifecycle events
    Normal,
    /// `--verbose`: per-batch events
    Verbose,
}

impl Verbosity {
    /// Determine verbosity from the parsed CLI flags; verbose wins.
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        if verbose {
            Verbosity::Verbose
        } else if quiet {
            Verbosity::Quiet
        } else {
            Verbosity::Normal
        }
    }

    fn crate_level(self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
        }
    }
}

/// Install the global subscriber, writing to stderr.
pub fn init_subscriber(verbosity: Verbosity) {
    let use_ansi = std::io::IsTerminal::is_terminal(&std::io::stderr());
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(use_ansi)
        .with_target(verbosity == Verbosity::Verbose);

    // try_init: a second call (tests) must not panic
    let _ = tracing_subscriber::registry()
        .with(build_env_filter(verbosity))
        .with(layer.without_time().compact())
        .try_init();
}

fn build_env_filter(verbosity: Verbosity) -> EnvFilter {
    if let Ok(directives) = std::env::var("INDEXSYNC_LOG") {
        if let Ok(filter) = EnvFilter::try_new(directives) {
            return filter;
        }
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::new(default_directives(verbosity))
}

fn default_directives(verbosity: Verbosity) -> String {
    let level = verbosity.crate_level();
    let mut directives = vec![if verbosity == Verbosity::Quiet { "error" } else { "warn" }.to_string()];
    directives.extend(CRATES.iter().map(|c| format!("{}={}", c, level)));
    directives.join(",")
}
