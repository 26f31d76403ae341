//! # Askbase CLI (`askbase`)
//!
//! The `askbase` binary is the primary interface for Askbase. It
//! provides commands for database initialization, document upload,
//! question answering, search, chat message intake, digest management,
//! and running the timer-driven scheduler.
//!
//! ## Usage
//!
//! ```bash
//! askbase --config ./config/askbase.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `askbase init` | Create the SQLite database and run schema migrations |
//! | `askbase upload <path>` | Chunk, embed, and store a document as a new version |
//! | `askbase docs` | List active documents |
//! | `askbase reindex <id>` | Re-chunk and re-embed a document from its source file |
//! | `askbase ask "<question>"` | Answer a question from the knowledge base |
//! | `askbase search "<query>"` | Show raw hybrid search results |
//! | `askbase message` | Record a chat message for later digesting |
//! | `askbase digest run` | Generate the digest for one day |
//! | `askbase digest backfill` | Generate digests over a date range |
//! | `askbase cleanup` | Delete old non-kept messages |
//! | `askbase schedule` | Run the digest and cleanup timers in the foreground |

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use askbase::{config, db, digest, ingest, migrate, retrieve, scheduler};

/// Askbase CLI — retrieval-augmented question answering over a local
/// knowledge base.
///
/// All commands accept a `--config` flag pointing to a TOML
/// configuration file. See `config/askbase.example.toml` for a full
/// example.
#[derive(Parser)]
#[command(
    name = "askbase",
    about = "Askbase — retrieval-augmented question answering over a local knowledge base",
    version,
    long_about = "Askbase ingests documents, chunks and embeds them, and answers questions \
    through hybrid search (BM25 keyword + cosine vector) with weighted score fusion. Chat \
    messages can be recorded and rolled up into daily digests that are searched alongside \
    document chunks."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/askbase.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (docs, doc_chunks, digests, messages, chunks_fts). This command
    /// is idempotent.
    Init,

    /// Upload a document.
    ///
    /// Reads the file, chunks it with a format-appropriate strategy,
    /// embeds the chunks, and stores them under a new active document
    /// version. Older versions of the same title are deactivated.
    Upload {
        /// Path to the document (.txt, .md, .html).
        path: PathBuf,

        /// Document title. Defaults to the file stem.
        #[arg(long)]
        title: Option<String>,

        /// Show chunk counts without writing to the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// List active documents.
    Docs,

    /// Re-chunk and re-embed a document from its original source file.
    Reindex {
        /// Document id or active document title.
        id: String,
    },

    /// Answer a question from the knowledge base.
    ///
    /// Runs hybrid retrieval, feeds the top chunks to the chat model,
    /// and prints the answer with source citations. With no usable
    /// context, prints a canned fallback response.
    Ask {
        /// The question to answer.
        question: String,

        /// Include recent messages from this chat as extra context.
        #[arg(long)]
        chat_id: Option<i64>,
    },

    /// Show raw hybrid search results with scores.
    Search {
        /// The search query string.
        query: String,
    },

    /// Record a chat message for later digesting.
    Message {
        /// Chat the message belongs to.
        #[arg(long)]
        chat_id: i64,

        /// Sender of the message.
        #[arg(long)]
        sender_id: i64,

        /// Message text.
        text: String,

        /// Mark the message as kept — exempt from retention cleanup.
        #[arg(long)]
        kept: bool,
    },

    /// Manage daily digests.
    Digest {
        #[command(subcommand)]
        action: DigestAction,
    },

    /// Delete old non-kept messages.
    Cleanup {
        /// Retention window in days. Defaults to the configured value.
        #[arg(long)]
        days: Option<i64>,
    },

    /// Run the digest and cleanup timer jobs in the foreground.
    ///
    /// Fires the daily digest at the configured UTC hour and the
    /// message cleanup every Sunday. Runs until interrupted.
    Schedule,
}

/// Digest management subcommands.
#[derive(Subcommand)]
enum DigestAction {
    /// Generate the digest for one day. Defaults to yesterday (UTC).
    Run {
        /// Day to digest (YYYY-MM-DD).
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Generate digests for every day in a date range, inclusive.
    ///
    /// Days that fail are reported and skipped; the backfill continues.
    Backfill {
        /// First day (YYYY-MM-DD).
        #[arg(long)]
        start: NaiveDate,

        /// Last day (YYYY-MM-DD).
        #[arg(long)]
        end: NaiveDate,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("askbase=info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Upload {
            path,
            title,
            dry_run,
        } => {
            ingest::run_upload(&cfg, &path, title, dry_run).await?;
        }
        Commands::Docs => {
            ingest::run_list(&cfg).await?;
        }
        Commands::Reindex { id } => {
            ingest::run_reindex(&cfg, &id).await?;
        }
        Commands::Ask { question, chat_id } => {
            retrieve::run_ask(&cfg, &question, chat_id).await?;
        }
        Commands::Search { query } => {
            retrieve::run_search(&cfg, &query).await?;
        }
        Commands::Message {
            chat_id,
            sender_id,
            text,
            kept,
        } => {
            ingest::run_message(&cfg, chat_id, sender_id, &text, kept).await?;
        }
        Commands::Digest { action } => match action {
            DigestAction::Run { date } => {
                digest::run_digest(&cfg, date).await?;
            }
            DigestAction::Backfill { start, end } => {
                digest::run_backfill(&cfg, start, end).await?;
            }
        },
        Commands::Cleanup { days } => {
            digest::run_cleanup(&cfg, days).await?;
        }
        Commands::Schedule => {
            scheduler::run_schedule(&cfg).await?;
        }
    }

    Ok(())
}
