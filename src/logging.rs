//! `tracing` subscriber setup.
//!
//! Logs go to stderr: stdout carries CLI output and, under `serve mcp`, the
//! MCP protocol stream. `RUST_LOG` overrides the default filter.

use tracing_subscriber::EnvFilter;

pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "docmem=debug,tower_http=debug"
    } else {
        "docmem=info"
    }
}

/// Install the global subscriber. Safe to call more than once; later calls are ignored.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
