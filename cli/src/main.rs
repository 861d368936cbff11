//! Rewind CLI - start servers and run one-shot commands through transition graphs
//!
//! # Commands
//! - `rewind graph <server|import|shell>` - print the dependency graph (DOT or JSON)
//! - `rewind start` - start a server, wait for Ctrl-C, tear it down
//! - `rewind import` - import a file into a running or temporary server
//! - `rewind shell` - evaluate JavaScript against a running or temporary server

mod graph;
mod oneshot;
mod start;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rewind_process::LaunchConfig;
use std::path::{Path, PathBuf};

/// Rewind CLI
#[derive(Parser)]
#[command(name = "rewind")]
#[command(author, version, about = "Start and tear down process graphs")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Launch configuration (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the dependency graph of a default command graph
    Graph {
        command: GraphCommand,

        #[arg(short, long, value_enum, default_value_t = graph::Format::Dot)]
        format: graph::Format,
    },

    /// Start a server and keep it running until Ctrl-C
    Start {
        /// Port to listen on (default: from config, 0 = any free port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Import a file into a collection
    Import {
        #[arg(long)]
        file: PathBuf,

        #[arg(long)]
        db: String,

        #[arg(long)]
        collection: String,

        /// The file holds one JSON array
        #[arg(long)]
        json_array: bool,

        #[arg(long)]
        upsert: bool,

        /// Drop the collection before importing
        #[arg(long)]
        drop: bool,

        /// Running server as HOST:PORT (default: start a temporary one)
        #[arg(long)]
        host: Option<String>,
    },

    /// Evaluate JavaScript in the client shell
    Shell {
        #[arg(long)]
        eval: String,

        #[arg(long)]
        db: Option<String>,

        /// Running server as HOST:PORT (default: start a temporary one)
        #[arg(long)]
        host: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum GraphCommand {
    Server,
    Import,
    Shell,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.json_logs {
        rewind_observe::init_json_tracing();
    } else {
        rewind_observe::init_stdout_tracing();
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Graph { command, format } => graph::run_graph_command(&config, command, format),
        Commands::Start { port } => start::run_start_command(config, port).await,
        Commands::Import {
            file,
            db,
            collection,
            json_array,
            upsert,
            drop,
            host,
        } => {
            let arguments = rewind_process::ImportArguments::new(db, collection, file)
                .json_array(json_array)
                .upsert(upsert)
                .drop_collection(drop);
            oneshot::run_import_command(&config, arguments, host.as_deref()).await
        }
        Commands::Shell { eval, db, host } => {
            let mut arguments = rewind_process::ShellArguments::eval(eval);
            if let Some(db) = db {
                arguments = arguments.database(db);
            }
            oneshot::run_shell_command(&config, arguments, host.as_deref()).await
        }
    }
}

/// Config file if given, defaults otherwise; `REWIND_*` variables on top.
fn load_config(path: Option<&Path>) -> Result<LaunchConfig> {
    let config = match path {
        Some(path) => LaunchConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => LaunchConfig::default(),
    };
    Ok(config.with_env_overrides())
}
