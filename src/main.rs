//! # docmem CLI
//!
//! ```bash
//! docmem --config ./config/docmem.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docmem init` | Write a sample config (if missing) and create the database |
//! | `docmem scan <root>` | Show what an ingest of `<root>` would pick up |
//! | `docmem ingest <name> <root>` | Index a directory tree as knowledge base `<name>` |
//! | `docmem search "<query>"` | Semantic search over one or all knowledge bases |
//! | `docmem list` | List knowledge bases |
//! | `docmem stats <name>` | Document-type and chunk-kind breakdown |
//! | `docmem chunk-sets <name>` | Ingestion runs still present in a knowledge base |
//! | `docmem rename <old> <new>` | Rename a knowledge base |
//! | `docmem delete <name>` | Delete a knowledge base |
//! | `docmem delete-chunk-set <name> <ts>` | Delete the chunks of one ingestion run |
//! | `docmem serve http` | Start the HTTP API |
//! | `docmem serve mcp` | Serve MCP tools on stdio |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use docmem::config;
use docmem::context::AppContext;
use docmem::scan::ScanOptions;
use docmem::search::SearchRequest;
use docmem::store::sqlite::SqliteStore;
use docmem::{ingest, lifecycle, logging, mcp, scan, search, server};

/// docmem: a local, re-indexable memory of document and code collections
/// for AI assistants.
#[derive(Parser)]
#[command(
    name = "docmem",
    about = "A local, re-indexable memory of document and code collections for AI assistants",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docmem.toml")]
    config: PathBuf,

    /// Debug-level logging (overridden by RUST_LOG).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a sample config if none exists, then create the database.
    ///
    /// Idempotent: an existing config file is left untouched and migrations
    /// are safe to re-run.
    Init,

    /// Walk a directory and report what would be indexed.
    Scan {
        /// Root directory.
        root: PathBuf,
    },

    /// Index a directory tree into a knowledge base.
    ///
    /// Re-ingesting an existing knowledge base replaces its contents once the
    /// new run has been fully written.
    Ingest {
        /// Knowledge base name.
        name: String,

        /// Root directory.
        root: PathBuf,

        /// Scan and chunk only; embed and write nothing.
        #[arg(long)]
        dry_run: bool,
    },

    /// Semantic search.
    Search {
        query: String,

        /// Restrict to one knowledge base.
        #[arg(long)]
        kb: Option<String>,

        /// Restrict to a language tag (e.g. `rust`, `markdown`).
        #[arg(long)]
        language: Option<String>,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List knowledge bases.
    List,

    /// Show statistics for a knowledge base.
    Stats { name: String },

    /// List the ingestion runs present in a knowledge base.
    ChunkSets { name: String },

    /// Rename a knowledge base.
    Rename { old: String, new: String },

    /// Delete a knowledge base and all of its chunks.
    Delete { name: String },

    /// Delete every chunk written by one ingestion run.
    DeleteChunkSet {
        name: String,

        /// Ingestion timestamp (milliseconds), as shown by `chunk-sets`.
        timestamp: i64,
    },

    /// Start a server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

#[derive(Subcommand)]
enum ServeService {
    /// HTTP API on `[server].bind`.
    Http,
    /// MCP over stdin/stdout.
    Mcp,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    // Commands that don't need the embedding provider.
    match &cli.command {
        Commands::Init => {
            if config::write_sample_config(&cli.config)? {
                println!("Wrote {}", cli.config.display());
            }
            let cfg = config::load_config(&cli.config)?;
            SqliteStore::open(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
            return Ok(());
        }
        Commands::Scan { root } => {
            let cfg = config::load_config_or_default(&cli.config)?;
            scan::run_scan(root, &ScanOptions::from(&cfg.scan))?;
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;
    let ctx = AppContext::open(cfg).await?;

    match cli.command {
        Commands::Init | Commands::Scan { .. } => {}
        Commands::Ingest {
            name,
            root,
            dry_run,
        } => {
            ingest::run_ingest(&ctx, &name, &root, dry_run).await?;
        }
        Commands::Search {
            query,
            kb,
            language,
            limit,
        } => {
            let request = SearchRequest {
                query,
                knowledge_base: kb,
                language,
                max_results: limit,
            };
            search::run_search(&ctx.search, &request).await?;
        }
        Commands::List => lifecycle::run_list(&ctx.lifecycle).await?,
        Commands::Stats { name } => lifecycle::run_stats(&ctx.lifecycle, &name).await?,
        Commands::ChunkSets { name } => lifecycle::run_chunk_sets(&ctx.lifecycle, &name).await?,
        Commands::Rename { old, new } => lifecycle::run_rename(&ctx.lifecycle, &old, &new).await?,
        Commands::Delete { name } => lifecycle::run_delete(&ctx.lifecycle, &name).await?,
        Commands::DeleteChunkSet { name, timestamp } => {
            lifecycle::run_delete_chunk_set(&ctx.lifecycle, &name, timestamp).await?
        }
        Commands::Serve { service } => match service {
            ServeService::Http => server::run_server(Arc::new(ctx)).await?,
            ServeService::Mcp => mcp::run_mcp_stdio(Arc::new(ctx)).await?,
        },
    }

    Ok(())
}
