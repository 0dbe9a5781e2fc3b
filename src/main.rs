//! # Semdex CLI
//!
//! The `semdex` binary drives the indexing and retrieval engine. All
//! configuration comes from the environment (see the `config` module); the
//! CLI only selects the operation.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `semdex init` | Create the schema (extension, table, indexes) |
//! | `semdex index` | Incremental index update (`--reindex-all` rebuilds) |
//! | `semdex search "<query>"` | Similarity search with optional scope |
//! | `semdex status` | Index coverage and per-model statistics |
//! | `semdex reinit` | Delete all rows for this workspace+model |
//! | `semdex serve mcp` | Serve the MCP surface on stdin/stdout |
//! | `semdex serve console` | Serve the operator HTTP console |

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use semdex::config::Config;
use semdex::indexer::{IndexEngine, IndexOptions};
use semdex::progress::{ProgressCallback, ProgressEvent};
use semdex::retrieval::{self, SearchRequest, SearchScope};
use semdex::{console, mcp};

#[derive(Parser)]
#[command(
    name = "semdex",
    about = "Semantic retrieval service for local document trees",
    version,
    long_about = "Semdex chunks and embeds a workspace's documents into PostgreSQL/pgvector \
    and answers similarity queries scoped by files and folders. Configuration is read from \
    SEMDEX_* environment variables."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the vector extension, the chunks table sized to the
    /// configured embedding dimension, and all indexes. Idempotent.
    Init,

    /// Index the workspace.
    ///
    /// Diffs files against the store by modification time and re-indexes
    /// what changed. Serialized per workspace across processes.
    Index {
        /// Clear the workspace+model partition and rebuild everything.
        #[arg(long)]
        reindex_all: bool,

        /// Scan and chunk without writing; print what a run would do.
        #[arg(long)]
        dry_run: bool,
    },

    /// Search the index by semantic similarity.
    Search {
        /// The query text.
        query: String,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum cosine similarity in [-1, 1].
        #[arg(long)]
        min_similarity: Option<f32>,

        /// Restrict to exact workspace-relative paths (repeatable).
        #[arg(long = "file")]
        files: Vec<String>,

        /// Restrict to folders (repeatable): bare name matches anywhere,
        /// a leading slash anchors at the workspace root, globs pass
        /// through verbatim.
        #[arg(long = "folder")]
        folders: Vec<String>,
    },

    /// Show index status for this workspace.
    Status,

    /// Delete every row for this workspace and embedding model.
    Reinit,

    /// Serve a control surface.
    Serve {
        #[command(subcommand)]
        surface: Surface,
    },
}

#[derive(Subcommand)]
enum Surface {
    /// MCP protocol on stdin/stdout, for AI assistant integration.
    Mcp,
    /// Operator HTTP console (bind address from SEMDEX_CONSOLE_BIND).
    Console,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("invalid configuration")?;
    let engine = Arc::new(
        IndexEngine::new(config)
            .await
            .context("cannot construct engine")?,
    );

    match cli.command {
        Commands::Init => {
            let dimension = engine.client().dimension();
            engine
                .store()
                .migrate(dimension)
                .await
                .context("migration failed")?;
            println!("initialized (dimension {dimension})");
        }
        Commands::Index {
            reindex_all,
            dry_run,
        } => {
            if dry_run {
                let (files, chunks) = engine.preview()?;
                println!("index (dry-run)");
                println!("  files matched: {files}");
                println!("  estimated chunks: {chunks}");
                return Ok(());
            }

            let outcome = engine
                .update(IndexOptions { reindex_all }, Some(stderr_progress()))
                .await?;
            if outcome.cancelled {
                println!(
                    "cancelled after {} / {} chunks",
                    outcome.completed_chunks, outcome.total_chunks
                );
            } else {
                println!("indexed {} files", outcome.total_files);
                println!("  chunks embedded: {}", outcome.completed_chunks);
                println!("  files skipped: {}", outcome.skipped_files);
                if !outcome.failed_files.is_empty() {
                    println!("  files unreadable: {}", outcome.failed_files.len());
                }
                println!("ok");
            }
        }
        Commands::Search {
            query,
            limit,
            min_similarity,
            files,
            folders,
        } => {
            let request = SearchRequest {
                query,
                min_similarity,
                limit,
                scope: SearchScope { files, folders },
            };
            let results = retrieval::search(
                engine.store(),
                engine.client(),
                engine.config(),
                engine.workspace_root(),
                &request,
            )
            .await?;

            if results.is_empty() {
                println!("No results.");
            }
            for (i, result) in results.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {}:{}-{}",
                    i + 1,
                    result.similarity,
                    result.path,
                    result.start_line,
                    result.end_line
                );
                println!("    url: {}", result.url);
                let excerpt: String = result.content.chars().take(160).collect();
                println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
                println!();
            }
        }
        Commands::Status => {
            let status = engine.status().await?;
            println!("workspace: {}", engine.workspace_id());
            println!("  initialized: {}", status.initialized);
            println!("  model: {}", status.embedding_model);
            println!(
                "  files indexed: {} / {}",
                status.indexed_files, status.total_files
            );
            if let Some(ts) = status.last_updated {
                println!("  last updated (mtime ms): {ts}");
            }
            for stats in &status.per_model_stats {
                println!(
                    "  [{}] rows: {}, data: {} bytes",
                    stats.model, stats.row_count, stats.total_data_bytes
                );
            }
        }
        Commands::Reinit => {
            engine.reinitialize().await?;
            println!("reinitialized workspace {}", engine.workspace_id());
        }
        Commands::Serve { surface } => match surface {
            Surface::Mcp => mcp::run_stdio(engine).await?,
            Surface::Console => {
                let bind = engine.config().console_bind.clone();
                console::run_console(engine, &bind).await?;
            }
        },
    }

    Ok(())
}

/// Human progress on stderr so stdout stays parseable.
fn stderr_progress() -> ProgressCallback {
    Arc::new(|event: &ProgressEvent| match event {
        ProgressEvent::Start {
            total_files,
            total_chunks,
        } => eprintln!("indexing {total_files} files, {total_chunks} chunks"),
        ProgressEvent::Progress(update) => {
            let pct = update.percentage.unwrap_or(0);
            if update.waiting_for_rate_limit == Some(true) {
                eprintln!("  rate limited, backing off...");
            } else {
                eprintln!(
                    "  {} / {} chunks ({pct}%)",
                    update.completed_chunks, update.total_chunks
                );
            }
        }
        ProgressEvent::Warning { message } => eprintln!("warning: {message}"),
        ProgressEvent::Error { message } => eprintln!("error: {message}"),
        ProgressEvent::Complete { .. } | ProgressEvent::Cancelled { .. } => {}
    })
}
