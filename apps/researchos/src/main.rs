//! # ros - ResearchOS command line
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │          apps/researchos (THE BINARY)        │
//! │                                              │
//! │   ┌───────────┐        ┌─────────────────┐   │
//! │   │   CLI     │        │ ros.toml +      │   │
//! │   │  (clap)   │        │ package files   │   │
//! │   └─────┬─────┘        └────────┬────────┘   │
//! │         └───────────┬───────────┘            │
//! │                     ▼                        │
//! │            ┌─────────────────┐               │
//! │            │ researchos-core │               │
//! │            │   (THE LOGIC)   │               │
//! │            └─────────────────┘               │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! ros init
//! ros status --json-mode
//! ros packages pkgs/gait.toml pkgs/stats.toml
//! ros link PR0123...
//! ros subset SS0123...
//! ```

use clap::Parser;
use researchos::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    // ROS_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("ROS_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "researchos=info,researchos_core=info".into());

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
