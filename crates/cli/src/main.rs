mod commands;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Arbiter policy decision point toolchain.
#[derive(Parser)]
#[command(name = "arbiter", version, about = "Arbiter policy decision point")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a subscription against a set of policy documents
    Eval {
        /// Policy document file or directory of .json documents
        #[arg(long)]
        documents: PathBuf,
        /// Subscription JSON file (plain form)
        #[arg(long)]
        subscription: PathBuf,
        /// PDP configuration JSON file; defaults to permit-overrides
        #[arg(long)]
        config: Option<PathBuf>,
        /// Keep the subscription open and print every decision change
        #[arg(long)]
        watch: bool,
    },

    /// Compile all documents and report errors
    Check {
        /// Policy document file or directory of .json documents
        #[arg(long)]
        documents: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Eval {
            documents,
            subscription,
            config,
            watch,
        } => commands::eval::run(&documents, &subscription, config.as_deref(), watch).await,
        Commands::Check { documents } => commands::check::run(&documents),
    };

    if let Err(message) = outcome {
        eprintln!("error: {}", message);
        process::exit(1);
    }
}
