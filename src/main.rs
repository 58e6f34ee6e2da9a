use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "shopfloor")]
#[command(version, about = "Factory-operations dashboard: defect analytics, record tables and approvals")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .shopfloor/ with a default config and an empty database
    Init {
        /// Overwrite an existing shopfloor.toml
        #[arg(long)]
        force: bool,
    },
    /// Start the dashboard HTTP server
    Serve {
        /// Port to serve on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path (overrides config)
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Enable dev mode (CORS permissive, bind on all interfaces)
        #[arg(long)]
        dev: bool,

        /// Open a table tab in a browser once the server is up
        #[arg(long, value_name = "TAB")]
        open: Option<String>,
    },
    /// Load a JSON array of records into a collection
    Import {
        collection: String,
        file: PathBuf,

        /// Database name (defaults to config)
        #[arg(long)]
        db: Option<String>,
    },
    /// List the collections stored in a database
    Collections {
        /// Database name (defaults to config)
        #[arg(long)]
        db: Option<String>,
    },
    /// Delete one record by `_id`
    Delete {
        collection: String,
        id: String,

        /// Database name (defaults to config)
        #[arg(long)]
        db: Option<String>,
    },
    /// Print the table markup for a collection
    Render {
        tab: String,

        /// Database name (defaults to config)
        #[arg(long)]
        db: Option<String>,

        /// Sort column
        #[arg(long)]
        sort: Option<String>,

        /// Sort descending
        #[arg(long)]
        desc: bool,

        /// Apply dark-mode styling regardless of the saved preference
        #[arg(long)]
        dark: bool,
    },
    /// Show or change the saved theme
    Theme {
        #[command(subcommand)]
        command: Option<ThemeCommands>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ThemeCommands {
    /// Show the saved theme
    Show,
    /// Save an explicit theme (light or dark)
    Set { theme: String },
    /// Flip between light and dark
    Toggle,
    /// Forget the saved choice
    Reset,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    shopfloor::logging::init(cli.verbose, cli.log_json);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Init { force } => cmd::cmd_init(&project_dir, *force)?,
        Commands::Serve {
            port,
            db_path,
            dev,
            open,
        } => cmd::cmd_serve(&project_dir, *port, db_path.clone(), *dev, open.clone()).await?,
        Commands::Import {
            collection,
            file,
            db,
        } => cmd::cmd_import(&project_dir, collection, file, db.as_deref())?,
        Commands::Collections { db } => cmd::cmd_collections(&project_dir, db.as_deref())?,
        Commands::Delete { collection, id, db } => {
            cmd::cmd_delete(&project_dir, collection, id, db.as_deref())?
        }
        Commands::Render {
            tab,
            db,
            sort,
            desc,
            dark,
        } => cmd::cmd_render(&project_dir, tab, db.as_deref(), sort.as_deref(), *desc, *dark)?,
        Commands::Theme { command } => cmd::cmd_theme(&project_dir, command.clone())?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
