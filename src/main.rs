//! # mdvault CLI (`mdv`)
//!
//! The `mdv` binary is the primary interface for mdvault: index a vault of
//! Markdown files, search it with hybrid retrieval, inspect index status,
//! clear the index, and serve the HTTP tool API.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mdv index <dir>` | Index every `.md`/`.markdown` file under a directory |
//! | `mdv search "<query>"` | Search with semantic, bm25, graph, or hybrid mode |
//! | `mdv status` | Show index statistics |
//! | `mdv clear` | Delete all indexed data |
//! | `mdv serve mcp` | Start the HTTP tool server |
//!
//! ## Examples
//!
//! ```bash
//! mdv index ~/notes
//! mdv search "how to deploy" --mode hybrid
//! mdv search "NN" --mode graph --top-k 5
//! mdv status
//! mdv serve mcp
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mdvault::config;
use mdvault::models::SearchMode;
use mdvault::server;
use mdvault::service::{SearchOptions, VaultService};

/// mdvault — local-first hybrid retrieval over Markdown vaults.
#[derive(Parser)]
#[command(
    name = "mdv",
    about = "Local-first hybrid retrieval over Markdown vaults",
    version,
    long_about = "mdvault indexes a directory of Markdown documents into dense vector, \
    sparse BM25, and property-graph indices, and answers natural-language queries by \
    fusing all three with reciprocal rank fusion and cross-encoder reranking. \
    Everything runs locally; query time makes no network calls."
)]
struct Cli {
    /// Path to configuration file (TOML). Built-in defaults apply when the
    /// file does not exist.
    #[arg(long, global = true, default_value = "./mdv.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index every Markdown file under a directory.
    ///
    /// Unchanged files (same content checksum) are skipped; changed files
    /// are fully replaced in all stores. Per-file failures are reported at
    /// the end without aborting the batch.
    Index {
        /// Root directory of the vault.
        directory: PathBuf,

        /// Abort if indexing exceeds this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Search the index.
    Search {
        /// The search query.
        query: String,

        /// Retrieval mode: semantic, bm25, graph, or hybrid.
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Maximum number of results.
        #[arg(long)]
        top_k: Option<usize>,

        /// Skip cross-encoder reranking and return the fused ranking.
        #[arg(long)]
        no_rerank: bool,

        /// Skip query expansion.
        #[arg(long)]
        no_expand: bool,

        /// Abort if the search exceeds this many seconds.
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Show index statistics.
    Status,

    /// Delete all indexed data.
    Clear,

    /// Serve the HTTP tool API.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

#[derive(Subcommand)]
enum ServeService {
    /// Start the MCP-style tool server on the configured bind address.
    Mcp,
}

fn deadline_from(timeout: Option<u64>) -> Option<Instant> {
    timeout.map(|secs| Instant::now() + Duration::from_secs(secs))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Index { directory, timeout } => {
            let service = VaultService::open_for_index(cfg).await?;
            let outcome = service.index(&directory, deadline_from(timeout)).await?;

            println!("indexed {}", directory.display());
            println!("  files: {}", outcome.stats.files);
            println!("  chunks: {}", outcome.stats.chunks);
            println!("  entities: {}", outcome.stats.entities);
            println!("  edges: {}", outcome.stats.edges);
            if !outcome.failures.is_empty() {
                println!("  reported errors: {}", outcome.failures.len());
                for failure in &outcome.failures {
                    println!("    {}: {}", failure.path.display(), failure.message);
                }
            }
            println!("ok");
        }

        Commands::Search {
            query,
            mode,
            top_k,
            no_rerank,
            no_expand,
            timeout,
        } => {
            let options = SearchOptions {
                mode: mode.parse::<SearchMode>()?,
                top_k,
                rerank: !no_rerank,
                expand: !no_expand,
                deadline: deadline_from(timeout),
            };
            let service = VaultService::open(cfg).await?;
            let results = service.search(&query, &options).await?;

            if results.is_empty() {
                println!("No results.");
                return Ok(());
            }

            for (i, result) in results.iter().enumerate() {
                println!(
                    "{}. [{:.4}] {}",
                    i + 1,
                    result.score,
                    result.file_path.display()
                );
                if !result.heading_path.is_empty() {
                    println!("    section: {}", result.heading_path);
                }
                println!("    engines: {}", result.matched_engines.join(", "));
                println!("    excerpt: \"{}\"", result.snippet);
                println!("    id: {}", result.chunk_id);
                println!();
            }
        }

        Commands::Status => match VaultService::open(cfg).await {
            Ok(service) => match service.status().await? {
                Some(stats) => {
                    println!("files: {}", stats.files);
                    println!("chunks: {}", stats.chunks);
                    println!("entities: {}", stats.entities);
                    println!("edges: {}", stats.edges);
                    match stats.last_indexed {
                        Some(t) => println!("last indexed: {}", t.to_rfc3339()),
                        None => println!("last indexed: never"),
                    }
                }
                None => println!("No index yet."),
            },
            Err(mdvault::error::VaultError::IndexMissing(_)) => {
                println!("No index yet.");
            }
            Err(e) => return Err(e.into()),
        },

        Commands::Clear => {
            let service = VaultService::open_for_index(cfg).await?;
            service.clear().await?;
            println!("Index cleared.");
        }

        Commands::Serve { service } => match service {
            ServeService::Mcp => {
                server::run_server(&cfg).await?;
            }
        },
    }

    Ok(())
}
