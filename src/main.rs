//! # pdf-harness CLI (`pdfh`)
//!
//! ## Usage
//!
//! ```bash
//! pdfh --config ./config/pdfh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pdfh serve` | Load or build the index and serve `POST /query` |
//! | `pdfh build` | Rebuild the index from the source directory |
//! | `pdfh status` | Show what the persisted index holds |
//! | `pdfh query "<text>"` | Answer one query and exit |
//!
//! Logs go to stderr; set `RUST_LOG` to change the level (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use pdf_harness::{build_cmd, config, search, server, status};

/// pdf-harness: semantic search over a directory of PDFs.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/pdfh.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "pdfh",
    about = "Semantic search over a directory of PDFs",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pdfh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    ///
    /// The listener binds immediately; `/query` answers 503 until the
    /// persisted index is loaded (or rebuilt from sources).
    Serve {
        /// Override the port from `[server] bind`.
        #[arg(long)]
        port: Option<u16>,

        /// Ignore the persisted index and rebuild before serving.
        #[arg(long)]
        rebuild: bool,
    },

    /// Rebuild the index from the source directory.
    Build,

    /// Show the persisted index: record counts, model, build time.
    Status,

    /// Answer one query from the command line.
    Query {
        /// The query text.
        text: String,

        /// Number of results (defaults to `[retrieval] top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve { port, rebuild } => {
            if let Some(port) = port {
                cfg.server = cfg.server.with_port(port);
            }
            server::run_server(&cfg, rebuild).await?;
        }
        Commands::Build => {
            build_cmd::run_build(&cfg).await?;
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
        Commands::Query { text, top_k } => {
            search::run_query(&cfg, &text, top_k).await?;
        }
    }

    Ok(())
}
