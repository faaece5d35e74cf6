//! # refgraph
//!
//! Command-line front end for the refgraph codec and store.
//!
//! ## Usage
//!
//! ```bash
//! # Verify a document survives decode + re-encode unchanged
//! refgraph check graph.json
//!
//! # Apply batches to a snapshot and write the result
//! refgraph replay snapshot.json batch-1.json batch-2.json -o next.json
//!
//! # Summarize a snapshot
//! refgraph --json-mode inspect snapshot.json
//! ```

use clap::Parser;
use refgraph::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // REFGRAPH_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("REFGRAPH_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "refgraph=info,refgraph_core=info".into());

    // Logs go to stderr; stdout carries command output.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
