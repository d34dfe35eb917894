//! # Custody CLI (`custody`)
//!
//! The `custody` binary ingests tabular files into an auditable store and
//! answers questions about them: where a row came from, whether its bytes
//! are intact, and which columns a query refers to.
//!
//! ## Usage
//!
//! ```bash
//! custody --config ./config/custody.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `custody init` | Create the SQLite database and run migrations |
//! | `custody ingest <paths>...` | Store, parse, and index files |
//! | `custody files` | List raw files |
//! | `custody get file\|record\|rows` | Inspect stored files and records |
//! | `custody integrity [id]` | Re-hash stored bytes |
//! | `custody schema show\|list\|history\|aliases\|rediscover` | Discovered schemas |
//! | `custody resolve <alias>` | Exact alias lookup |
//! | `custody map "<query>"` | Map a query onto columns |
//! | `custody lineage <id>` | Operation history of a file |
//! | `custody verify <lineage-id>` | Integrity check plus signature |
//! | `custody retrieval <record-id>...` | Log records used to answer a message |
//! | `custody citations <message-id>` | Sources cited for a message |
//! | `custody stats` | Database summary |
//!
//! ## Examples
//!
//! ```bash
//! custody init
//! custody ingest ./downloads/licitacoes --source-type portal
//! custody map "edital 10367 da SEINF"
//! custody lineage 6f1c...
//! ```

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

use custody::{audit, config, get, ingest, logging, migrate, schema_cmd, stats};

/// Custody CLI: auditable ingestion of tabular data.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/custody.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "custody",
    about = "Custody: auditable ingestion of tabular data with verifiable lineage",
    version,
    long_about = "Custody stores source files immutably, extracts their rows, discovers \
    column schemas and aliases, and keeps a lineage ledger that can prove which bytes \
    every answer was derived from."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/custody.toml`.
    #[arg(long, global = true, default_value = "./config/custody.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all tables. Running it again is
    /// safe.
    Init,

    /// Store, parse, and index files.
    ///
    /// Directories are walked using the `[ingest]` globs; explicit files are
    /// always taken. Identical bytes are stored once.
    Ingest {
        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Override `ingest.source_type` for this run.
        #[arg(long)]
        source_type: Option<String>,

        /// Override `ingest.workers` for this run.
        #[arg(long)]
        workers: Option<usize>,
    },

    /// List raw files, newest first.
    Files {
        /// Only files from this source type.
        #[arg(long)]
        source_type: Option<String>,

        /// Only files with this source identifier (requires --source-type).
        #[arg(long, requires = "source_type")]
        source_id: Option<String>,
    },

    /// Inspect a stored file or record.
    Get {
        #[command(subcommand)]
        target: GetTarget,
    },

    /// Re-hash stored bytes and compare with the recorded SHA-256.
    ///
    /// Checks one file, or every file when no ID is given. Exits non-zero if
    /// any check fails.
    Integrity {
        /// Raw file ID.
        id: Option<String>,
    },

    /// Inspect and manage discovered schemas.
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },

    /// Look up the columns an alias points to.
    Resolve {
        alias: String,

        /// Restrict to one schema (also matches non-active schemas).
        #[arg(long)]
        schema: Option<String>,
    },

    /// Map a natural-language query onto the columns of active schemas.
    Map {
        query: String,

        /// Number of mappings to show.
        #[arg(long, default_value_t = 10)]
        top: usize,

        /// Print mappings as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the operation history of a raw file.
    Lineage {
        /// Raw file ID.
        id: String,

        /// Include retrieval entries.
        #[arg(long)]
        retrievals: bool,

        #[arg(long)]
        json: bool,
    },

    /// Verify a lineage entry: integrity check plus signature.
    Verify {
        /// Lineage entry ID.
        id: String,
    },

    /// Log that records were retrieved to answer a message.
    Retrieval {
        /// Parsed record IDs, in rank order.
        #[arg(required = true)]
        record_ids: Vec<String>,

        #[arg(long)]
        session: Option<String>,

        #[arg(long)]
        message: Option<String>,

        /// Relevance score, once per record in the same order.
        #[arg(long = "score")]
        scores: Vec<f64>,
    },

    /// List the sources retrieved for a message.
    Citations {
        message_id: String,

        #[arg(long)]
        json: bool,
    },

    /// Show database statistics.
    Stats,

    /// Generate shell completions.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum GetTarget {
    /// Raw file metadata.
    File { id: String },

    /// One parsed record with its normalized values.
    Record { id: String },

    /// Parsed records of a file in row order.
    Rows {
        /// Raw file ID.
        id: String,

        #[arg(long, default_value_t = 0)]
        offset: u64,

        #[arg(long)]
        limit: Option<u64>,
    },
}

#[derive(Subcommand)]
enum SchemaAction {
    /// Print the active schema of a file.
    Show {
        /// Raw file ID.
        id: String,

        #[arg(long)]
        json: bool,
    },

    /// List all active schemas.
    List,

    /// Every schema version of a file, newest first.
    History {
        /// Raw file ID.
        id: String,
    },

    /// Aliases published for a schema.
    Aliases {
        /// Schema ID.
        id: String,
    },

    /// Re-run discovery and supersede the active schema.
    Rediscover {
        /// Raw file ID.
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "custody", &mut std::io::stdout());
        return Ok(());
    }

    let mut cfg = config::load_config(&cli.config)?;
    logging::init_logging(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest {
            paths,
            source_type,
            workers,
        } => {
            if let Some(workers) = workers {
                if workers == 0 {
                    anyhow::bail!("--workers must be >= 1");
                }
                cfg.ingest.workers = workers;
            }
            ingest::run_ingest(&cfg, &paths, source_type.as_deref()).await?;
        }
        Commands::Files {
            source_type,
            source_id,
        } => {
            get::run_files(&cfg, source_type.as_deref(), source_id.as_deref()).await?;
        }
        Commands::Get { target } => match target {
            GetTarget::File { id } => get::run_get_file(&cfg, &id).await?,
            GetTarget::Record { id } => get::run_get_record(&cfg, &id).await?,
            GetTarget::Rows { id, offset, limit } => {
                get::run_get_rows(&cfg, &id, offset, limit).await?
            }
        },
        Commands::Integrity { id } => {
            audit::run_integrity(&cfg, id.as_deref()).await?;
        }
        Commands::Schema { action } => match action {
            SchemaAction::Show { id, json } => schema_cmd::run_show(&cfg, &id, json).await?,
            SchemaAction::List => schema_cmd::run_list(&cfg).await?,
            SchemaAction::History { id } => schema_cmd::run_history(&cfg, &id).await?,
            SchemaAction::Aliases { id } => schema_cmd::run_aliases(&cfg, &id).await?,
            SchemaAction::Rediscover { id } => schema_cmd::run_rediscover(&cfg, &id).await?,
        },
        Commands::Resolve { alias, schema } => {
            audit::run_resolve(&cfg, &alias, schema.as_deref()).await?;
        }
        Commands::Map { query, top, json } => {
            audit::run_map(&cfg, &query, top, json).await?;
        }
        Commands::Lineage {
            id,
            retrievals,
            json,
        } => {
            audit::run_lineage(&cfg, &id, retrievals, json).await?;
        }
        Commands::Verify { id } => {
            audit::run_verify(&cfg, &id).await?;
        }
        Commands::Retrieval {
            record_ids,
            session,
            message,
            scores,
        } => {
            audit::run_retrieval(
                &cfg,
                &record_ids,
                session.as_deref(),
                message.as_deref(),
                &scores,
            )
            .await?;
        }
        Commands::Citations { message_id, json } => {
            audit::run_citations(&cfg, &message_id, json).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Completions { .. } => unreachable!(),
    }

    Ok(())
}
