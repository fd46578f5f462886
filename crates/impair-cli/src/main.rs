mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    history::HistorySubcommand, router::RouterSubcommand, sequence::SequenceSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "impair",
    about = "Scheduled network impairment drills against lab routers",
    version,
    propagate_version = true
)]
struct Cli {
    /// Lab root (default: auto-detect from .impair/)
    #[arg(long, global = true, env = "IMPAIR_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize an impairment lab in the current directory
    Init {
        /// Lab name (defaults to the directory name)
        #[arg(long)]
        lab: Option<String>,
    },

    /// Serve the HTTP API and run the scheduler
    Serve {
        #[arg(long, default_value = "7070")]
        port: u16,
    },

    /// Manage router nodes
    Router {
        #[command(subcommand)]
        subcommand: RouterSubcommand,
    },

    /// Manage impairment sequences
    Sequence {
        #[command(subcommand)]
        subcommand: SequenceSubcommand,
    },

    /// Run a sequence now and wait for it to finish
    Run { id: String },

    /// Browse the action history
    History {
        #[command(subcommand)]
        subcommand: HistorySubcommand,
    },

    /// Show dashboard metrics
    Metrics,
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } | Commands::Run { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init { lab } => cmd::init::run(&root, lab.as_deref()),
        Commands::Serve { port } => cmd::serve::run(&root, port),
        Commands::Router { subcommand } => cmd::router::run(&root, subcommand, cli.json),
        Commands::Sequence { subcommand } => cmd::sequence::run(&root, subcommand, cli.json),
        Commands::Run { id } => cmd::run::run(&root, &id, cli.json),
        Commands::History { subcommand } => cmd::history::run(&root, subcommand, cli.json),
        Commands::Metrics => cmd::metrics::run(&root, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
