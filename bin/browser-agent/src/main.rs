mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "browser-agent")]
#[command(about = "Browser automation agent with human-in-the-loop checkpoints", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Sandbox directory (defaults to .browser-agent under the project root)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the sandbox layout and a default config
    Init {
        /// Overwrite an existing config.json
        #[arg(long)]
        force: bool,
    },

    /// Show configuration, storage and driver status
    Status,

    /// Run a task on a thread
    Run {
        /// Thread id; a new one is generated when omitted
        #[arg(short, long)]
        thread: Option<String>,

        /// Task to run (read from stdin when omitted)
        #[arg(short, long)]
        message: Option<String>,

        /// Print interrupts and exit instead of prompting for answers
        #[arg(long)]
        no_interactive: bool,
    },

    /// List interrupts waiting on a human
    Pending {
        #[arg(short, long)]
        thread: String,
    },

    /// Answer an interrupt and resume the thread
    Respond {
        #[arg(short, long)]
        thread: String,

        /// Interrupt id as printed by `pending`
        #[arg(long)]
        id: String,

        /// Answer as JSON, or plain text
        value: String,
    },

    /// Continue a thread whose interrupts have been answered
    Resume {
        #[arg(short, long)]
        thread: String,
    },

    /// Delete a thread's checkpoints, sub-agent threads included
    Forget {
        #[arg(short, long)]
        thread: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let paths = commands::paths(cli.root);

    match cli.command {
        Commands::Init { force } => commands::init::run(&paths, force).await?,
        Commands::Status => commands::status::run(&paths).await?,
        Commands::Run {
            thread,
            message,
            no_interactive,
        } => commands::run::run(&paths, thread, message, !no_interactive).await?,
        Commands::Pending { thread } => commands::pending::run(&paths, &thread).await?,
        Commands::Respond { thread, id, value } => {
            commands::respond::run(&paths, &thread, &id, &value).await?
        }
        Commands::Resume { thread } => commands::resume::run(&paths, &thread).await?,
        Commands::Forget { thread } => commands::forget::run(&paths, &thread).await?,
    }

    Ok(())
}
