//! # embedstore CLI (`embstore`)
//!
//! The `embstore` binary is the primary interface for embedstore. It provides
//! commands for database initialization, group administration, ingestion,
//! embedding management, similarity search, and export.
//!
//! ## Usage
//!
//! ```bash
//! embstore --config ./config/embstore.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `embstore init` | Create the SQLite database and run schema migrations |
//! | `embstore group add/list/remove` | Manage groups and their flag bits |
//! | `embstore ingest <path> --group <g>` | Hash, deduplicate, and chunk a file or directory |
//! | `embstore embed pending` | Embed parts that have no vector yet |
//! | `embstore attach <part-id> --vector <v>` | Store an externally computed vector |
//! | `embstore search "<query>"` | Rank parts by cosine similarity |
//! | `embstore file list/show/disable/fail` | Inspect or soft-delete files |
//! | `embstore part show/disable` | Inspect or soft-delete parts |
//! | `embstore purge` | Physically remove disabled rows |
//! | `embstore export --out <dir>` | Write one JSON Lines file per group |
//! | `embstore stats` | Counts by state and by group |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `warn`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, EnvFilter};

use embedstore::{config, embed_cmd, export, files, groups, ingest, migrate, search, stats};

/// embedstore: hash, chunk, embed, and search documents by group.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/embstore.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "embstore",
    about = "embedstore: a local-first embedding store with group-scoped similarity search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/embstore.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables.
    /// Running it more than once is safe.
    Init,

    /// Manage groups.
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },

    /// Ingest a file, or every matching file under a directory.
    ///
    /// Files are hashed and deduplicated within the group, then split into
    /// parts. When an embedding provider is configured, parts are embedded
    /// inline; failures there leave parts pending rather than aborting.
    Ingest {
        /// File or directory to ingest.
        path: PathBuf,

        /// Group that owns the ingested files.
        #[arg(long)]
        group: String,

        /// Stored file name (single file only; defaults to the file name).
        #[arg(long)]
        name: Option<String>,

        /// Source URL (single file only; defaults to `file://<absolute path>`).
        #[arg(long)]
        url: Option<String>,

        /// Skip inline embedding.
        #[arg(long)]
        no_embed: bool,

        /// Show file and part counts without writing to the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Manage embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Attach an externally computed vector to a part.
    Attach {
        /// Part id.
        part_id: i64,

        /// Vector as a JSON array or comma-separated list.
        #[arg(long, allow_hyphen_values = true)]
        vector: String,

        /// Embedding model name (defaults to `embedding.model`).
        #[arg(long)]
        model: Option<String>,
    },

    /// Rank stored parts by cosine similarity.
    Search {
        /// Query text, embedded with the configured provider.
        query: Option<String>,

        /// Query vector as a JSON array or comma-separated list.
        #[arg(long, allow_hyphen_values = true)]
        vector: Option<String>,

        /// Embedding model to search (defaults to the provider's model).
        #[arg(long)]
        model: Option<String>,

        /// Restrict to these groups (repeatable).
        #[arg(long = "group")]
        groups: Vec<String>,

        /// Maximum number of results.
        #[arg(long)]
        top_k: Option<usize>,

        /// Drop results scoring below this value.
        #[arg(long, allow_hyphen_values = true)]
        min_similarity: Option<f32>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Inspect and soft-delete files.
    File {
        #[command(subcommand)]
        action: FileAction,
    },

    /// Inspect and soft-delete parts.
    Part {
        #[command(subcommand)]
        action: PartAction,
    },

    /// Physically delete disabled files and parts.
    Purge,

    /// Export parts as `<group>.jsonl` files.
    Export {
        /// Output directory.
        #[arg(long)]
        out: PathBuf,

        /// Only export this group.
        #[arg(long)]
        group: Option<String>,

        /// Include vectors (base64 of the stored blob).
        #[arg(long)]
        with_embeddings: bool,
    },

    /// Show database statistics.
    Stats,
}

#[derive(Subcommand)]
enum GroupAction {
    /// Register a group and assign it the next flag bit.
    Add { name: String },
    /// List groups with their flags.
    List,
    /// Remove a group. Its flag bit is never reused.
    Remove { name: String },
}

/// Embedding management subcommands.
#[derive(Subcommand)]
enum EmbedAction {
    /// Embed parts that have no vector yet.
    ///
    /// Parts whose text already has a vector under the same model reuse it
    /// instead of calling the provider.
    Pending {
        /// Maximum number of parts to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config (number of texts per API call).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand)]
enum FileAction {
    /// List files, optionally for one group.
    List {
        #[arg(long)]
        group: Option<String>,
    },
    /// Print a file's metadata and parts.
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// Disable a file and all of its parts.
    Disable { id: String },
    /// Mark a file as failed so it can be chunked again.
    Fail { id: String },
}

#[derive(Subcommand)]
enum PartAction {
    /// Print one part.
    Show { id: i64 },
    /// Disable one part.
    Disable { id: i64 },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Group { action } => match action {
            GroupAction::Add { name } => groups::run_group_add(&cfg, &name).await?,
            GroupAction::List => groups::run_group_list(&cfg).await?,
            GroupAction::Remove { name } => groups::run_group_remove(&cfg, &name).await?,
        },
        Commands::Ingest {
            path,
            group,
            name,
            url,
            no_embed,
            dry_run,
        } => {
            let options = ingest::IngestOptions {
                group,
                name,
                url,
                embed: !no_embed,
                dry_run,
            };
            ingest::run_ingest(&cfg, &path, &options).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run).await?;
            }
        },
        Commands::Attach {
            part_id,
            vector,
            model,
        } => {
            embed_cmd::run_attach(&cfg, part_id, &vector, model).await?;
        }
        Commands::Search {
            query,
            vector,
            model,
            groups,
            top_k,
            min_similarity,
            json,
        } => {
            let args = search::SearchArgs {
                query,
                vector,
                groups,
                model,
                top_k,
                min_similarity,
                json,
            };
            search::run_search(&cfg, args).await?;
        }
        Commands::File { action } => match action {
            FileAction::List { group } => files::run_file_list(&cfg, group.as_deref()).await?,
            FileAction::Show { id, json } => files::run_file_show(&cfg, &id, json).await?,
            FileAction::Disable { id } => files::run_file_disable(&cfg, &id).await?,
            FileAction::Fail { id } => files::run_file_fail(&cfg, &id).await?,
        },
        Commands::Part { action } => match action {
            PartAction::Show { id } => files::run_part_show(&cfg, id).await?,
            PartAction::Disable { id } => files::run_part_disable(&cfg, id).await?,
        },
        Commands::Purge => files::run_purge(&cfg).await?,
        Commands::Export {
            out,
            group,
            with_embeddings,
        } => {
            export::run_export(&cfg, &out, group.as_deref(), with_embeddings).await?;
        }
        Commands::Stats => stats::run_stats(&cfg).await?,
    }

    Ok(())
}
