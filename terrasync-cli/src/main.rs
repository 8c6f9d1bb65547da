//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

use tracing_subscriber::EnvFilter;

fn main() {
    init_tracing();
    if let Err(err) = terrasync_cli::run() {
        eprintln!("terrasync: {err}");
        std::process::exit(1);
    }
}

/// Log to stderr so the JSON summary on stdout stays machine-readable.
/// `RUST_LOG` overrides the default `info` filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
