//! # apivault CLI
//!
//! The `apivault` binary stores and serves versioned OpenAPI/Swagger schemas.
//!
//! ## Usage
//!
//! ```bash
//! apivault --config ./config/apivault.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `apivault init` | Create the SQLite database and run schema migrations |
//! | `apivault serve` | Start the HTTP API |
//! | `apivault upload <file> --app <app>` | Store a schema as the next version |
//! | `apivault latest <app>` | Print the latest stored schema |
//! | `apivault show <app> <version>` | Print one specific version |
//! | `apivault versions <app>` | List the version history of a key |
//! | `apivault apps` | List registered applications |
//! | `apivault services <app>` | List services under an application |
//! | `apivault stats` | Database and storage counts |
//! | `apivault check <app>` | Re-validate the latest stored artifact |
//! | `apivault reconcile` | Repair drift between database and storage |
//!
//! Log verbosity follows `RUST_LOG` (default `info`). Logs go to stderr so
//! command output on stdout stays pipeable.

use apivault::{commands, config, migrate, server};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// apivault: versioned storage for OpenAPI and Swagger schemas.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/apivault.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "apivault",
    about = "apivault — versioned storage for OpenAPI and Swagger schemas",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/apivault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and storage root.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Upload a schema file.
    ///
    /// Stores it as the next version of the key unless it is equal to the
    /// current latest version (ignoring object key order).
    Upload {
        /// Path to a `.json`, `.yaml` or `.yml` schema file.
        file: PathBuf,

        /// Application name.
        #[arg(long = "app")]
        application: String,

        /// Optional service name within the application.
        #[arg(long)]
        service: Option<String>,
    },

    /// Print the latest version of a schema.
    Latest {
        application: String,
        #[arg(long)]
        service: Option<String>,
    },

    /// Print a specific version of a schema.
    Show {
        application: String,
        version: i64,
        #[arg(long)]
        service: Option<String>,
    },

    /// List all versions of a schema, newest first.
    Versions {
        application: String,
        #[arg(long)]
        service: Option<String>,
    },

    /// List registered applications.
    Apps,

    /// List services registered under an application.
    Services { application: String },

    /// Show database and storage statistics.
    Stats,

    /// Re-validate the latest stored artifact of a schema.
    ///
    /// Exits non-zero when the stored document no longer validates.
    Check {
        application: String,
        #[arg(long)]
        service: Option<String>,
    },

    /// Reconcile the artifact tree with the database.
    ///
    /// Removes artifacts and temp files that have no database row and
    /// rewrites artifacts whose file has gone missing. Files touched in the
    /// last five minutes are left alone.
    Reconcile {
        /// Report what would change without touching anything.
        #[arg(long)]
        dry_run: bool,
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
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            std::fs::create_dir_all(&cfg.storage.root)?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Upload {
            file,
            application,
            service,
        } => {
            commands::run_upload(&cfg, &file, &application, service.as_deref()).await?;
        }
        Commands::Latest {
            application,
            service,
        } => {
            commands::run_latest(&cfg, &application, service.as_deref()).await?;
        }
        Commands::Show {
            application,
            version,
            service,
        } => {
            commands::run_show(&cfg, &application, version, service.as_deref()).await?;
        }
        Commands::Versions {
            application,
            service,
        } => {
            commands::run_versions(&cfg, &application, service.as_deref()).await?;
        }
        Commands::Apps => {
            commands::run_apps(&cfg).await?;
        }
        Commands::Services { application } => {
            commands::run_services(&cfg, &application).await?;
        }
        Commands::Stats => {
            commands::run_stats(&cfg).await?;
        }
        Commands::Check {
            application,
            service,
        } => {
            commands::run_check(&cfg, &application, service.as_deref()).await?;
        }
        Commands::Reconcile { dry_run } => {
            commands::run_reconcile(&cfg, dry_run).await?;
        }
    }

    Ok(())
}
