//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod config_cmd;
mod files;
mod helpers;
mod names;
mod render;
mod run;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "drivelens")]
#[command(about = "Batch document analysis from Google Drive through Gemini")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

/// Where to read documents from. Falls back to the `[source]` config section.
#[derive(Args, Debug, Clone, Default)]
pub struct SourceArgs {
    /// Drive folder ID or folder URL
    #[arg(long, conflicts_with_all = ["links", "sheet"])]
    pub folder: Option<String>,

    /// File with one Drive link per line
    #[arg(long, conflicts_with = "sheet")]
    pub links: Option<PathBuf>,

    /// Spreadsheet ID holding links to the documents
    #[arg(long)]
    pub sheet: Option<String>,

    /// A1 range of the link cells (with --sheet)
    #[arg(long)]
    pub range: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze each document with its own request
    Run {
        #[command(flatten)]
        source: SourceArgs,
        /// Render successful analyses to PDF afterwards
        #[arg(long)]
        render: bool,
        /// Do not list files already on the service (always upload)
        #[arg(long)]
        no_list: bool,
    },

    /// Upload everything and analyze it as one asynchronous batch job
    Batch {
        #[command(flatten)]
        source: SourceArgs,
        /// Give up waiting on the job after this many seconds
        #[arg(long)]
        max_wait: Option<u64>,
        /// Render successful analyses to PDF afterwards
        #[arg(long)]
        render: bool,
        /// Do not list files already on the service (always upload)
        #[arg(long)]
        no_list: bool,
    },

    /// Extract student names from document file names
    Names {
        #[command(flatten)]
        source: SourceArgs,
        /// Write `first, last, file` rows to this A1 range (cleared first)
        #[arg(long)]
        write_range: Option<String>,
        /// Spreadsheet to write to (defaults to the source spreadsheet)
        #[arg(long, requires = "write_range")]
        write_sheet: Option<String>,
    },

    /// Render a results file to PDFs
    Render {
        /// Results file (defaults to the configured responses.json)
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Output directory (defaults to the configured PDF directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage files uploaded to the analysis service
    Files {
        #[command(subcommand)]
        command: FilesCommands,
    },

    /// Show the effective configuration (secrets hidden)
    Config,
}

#[derive(Subcommand)]
enum FilesCommands {
    /// List uploaded files
    List,
    /// Delete one file by remote name (`files/...`) or display name
    Delete { name: String },
    /// Delete every uploaded file
    Purge {
        /// Skip the confirmation check
        #[arg(short, long)]
        yes: bool,
    },
}

/// Load config from the given path or by discovery, with environment overrides.
async fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Config::load_from_path(path).await?.with_env_overrides()
        }
        None => Config::load().await?,
    };
    Ok(config)
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref()).await?;

    match cli.command {
        Commands::Run {
            source,
            render,
            no_list,
        } => {
            config.output.render |= render;
            config.list_existing &= !no_list;
            run::cmd_run(&config, &source).await
        }
        Commands::Batch {
            source,
            max_wait,
            render,
            no_list,
        } => {
            if let Some(secs) = max_wait {
                config.batch.max_wait_secs = secs;
            }
            config.output.render |= render;
            config.list_existing &= !no_list;
            run::cmd_batch(&config, &source).await
        }
        Commands::Names {
            source,
            write_range,
            write_sheet,
        } => names::cmd_names(&config, &source, write_range.as_deref(), write_sheet.as_deref()).await,
        Commands::Render { input, output } => {
            render::cmd_render(&config, input.as_deref(), output.as_deref())
        }
        Commands::Files { command } => match command {
            FilesCommands::List => files::cmd_files_list(&config).await,
            FilesCommands::Delete { name } => files::cmd_files_delete(&config, &name).await,
            FilesCommands::Purge { yes } => files::cmd_files_purge(&config, yes).await,
        },
        Commands::Config => config_cmd::cmd_config_show(&config),
    }
}
