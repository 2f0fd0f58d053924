//! # Docent CLI (`docent`)
//!
//! ## Usage
//!
//! ```bash
//! docent --config ./config/docent.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docent base create <name>` | Create a document base |
//! | `docent base list` | List document bases |
//! | `docent base show <name>` | Show a base's documents and index state |
//! | `docent base clear <name>` | Remove every document from a base |
//! | `docent base delete <name>` | Delete a base and its index |
//! | `docent base rename <old> <new>` | Rename a base |
//! | `docent base check [--repair]` | Find (and fix) metadata/index drift |
//! | `docent ingest <files..>` | Add files to a base |
//! | `docent search "<query>"` | Show the chunks retrieved for a query |
//! | `docent ask "<question>"` | Answer one question with citations |
//! | `docent chat` | Interactive session with conversation history |
//!
//! ## Examples
//!
//! ```bash
//! docent base create handbook --description "Employee handbook"
//! docent ingest --base handbook ./handbook.pdf ./benefits.xlsx
//! docent ask --base handbook "How many vacation days do I get?"
//! docent chat --base handbook
//! ```

use std::io;
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing::debug;

use docent::config::{self, Config};
use docent::{base_cmd, ingest, logging, search, session};

const DEFAULT_CONFIG: &str = "./config/docent.toml";

/// Docent: ask questions of your documents and get cited answers.
///
/// Settings are read from a TOML file (see `config/docent.example.toml`).
/// Without `--config`, `./config/docent.toml` is used when present and
/// built-in defaults otherwise.
#[derive(Parser)]
#[command(
    name = "docent",
    about = "Docent: ask questions of your documents and get cited answers",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage document bases.
    Base {
        #[command(subcommand)]
        action: BaseAction,
    },

    /// Add documents to a base.
    ///
    /// Supported formats: PDF, DOCX, XLSX, XLS, TXT, MD. Each file is
    /// processed independently; a failing file does not stop the batch.
    Ingest {
        /// Target base (defaults to `[bases].default`).
        #[arg(long)]
        base: Option<String>,

        /// Create the base if it does not exist.
        #[arg(long)]
        create: bool,

        /// Files to ingest.
        files: Vec<PathBuf>,

        /// Also ingest every supported file under this directory.
        #[arg(long)]
        dir: Option<PathBuf>,
    },

    /// Retrieve the most relevant chunks for a query, without generation.
    Search {
        #[arg(long)]
        base: Option<String>,

        query: String,

        /// Number of chunks to retrieve (defaults to `[retrieval].top_k`).
        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Answer a single question with citations.
    Ask {
        #[arg(long)]
        base: Option<String>,

        question: String,

        #[arg(short, long)]
        k: Option<usize>,
    },

    /// Start an interactive chat. Follow-up questions use the history.
    Chat {
        #[arg(long)]
        base: Option<String>,
    },

    /// Print a shell completion script.
    Completions {
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum BaseAction {
    /// Create an empty base.
    Create {
        name: String,

        #[arg(long, default_value = "")]
        description: String,
    },
    /// List all bases.
    List,
    /// Show a base's metadata and documents.
    Show { name: String },
    /// Remove every document, keeping the base itself.
    Clear { name: String },
    /// Delete a base and its index.
    Delete { name: String },
    /// Rename a base.
    Rename { old: String, new: String },
    /// Compare every base's metadata against its index.
    Check {
        /// Rebuild drifted metadata from the index.
        #[arg(long)]
        repair: bool,
    },
}

fn resolve_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    match explicit {
        Some(path) => config::load_config(path),
        None if Path::new(DEFAULT_CONFIG).exists() => config::load_config(Path::new(DEFAULT_CONFIG)),
        None => {
            debug!("no config file found; using defaults");
            config::parse_config("")
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "docent", &mut io::stdout());
        return Ok(());
    }

    let cfg = resolve_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Base { action } => match action {
            BaseAction::Create { name, description } => {
                base_cmd::run_create(&cfg, &name, &description)?;
            }
            BaseAction::List => base_cmd::run_list(&cfg)?,
            BaseAction::Show { name } => base_cmd::run_show(&cfg, &name).await?,
            BaseAction::Clear { name } => base_cmd::run_clear(&cfg, &name).await?,
            BaseAction::Delete { name } => base_cmd::run_delete(&cfg, &name)?,
            BaseAction::Rename { old, new } => base_cmd::run_rename(&cfg, &old, &new)?,
            BaseAction::Check { repair } => base_cmd::run_check(&cfg, repair).await?,
        },
        Commands::Ingest {
            base,
            create,
            files,
            dir,
        } => {
            ingest::run_ingest(&cfg, base.as_deref(), create, &files, dir.as_deref()).await?;
        }
        Commands::Search { base, query, k } => {
            search::run_search(&cfg, base.as_deref(), &query, k).await?;
        }
        Commands::Ask { base, question, k } => {
            session::run_ask(&cfg, base.as_deref(), &question, k).await?;
        }
        Commands::Chat { base } => {
            session::run_chat(&cfg, base.as_deref()).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
