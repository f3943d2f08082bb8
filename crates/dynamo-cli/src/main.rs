//! Dynamo unified CLI.
//!
//! A Dynamo-style replicated key-value store.
//!
//! # Quick Start
//!
//! ```bash
//! # Start a brand-new single-node cluster
//! dynamo start --hostname 127.0.0.1 --port 13337
//!
//! # Join an existing cluster (new terminal, different port/data dir)
//! dynamo start --hostname 127.0.0.1 --port 13338 --leader 127.0.0.1
//!
//! # Connect with the REPL (new terminal)
//! dynamo repl --address 127.0.0.1:13337
//! ```

mod commands;
mod style;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Dynamo - a Dynamo-style replicated key-value store.
#[derive(Parser)]
#[command(name = "dynamo")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version information.
    Version,

    /// Start a node.
    Start {
        /// Directory to load `dynamo.toml`/`dynamo.local.toml` from and
        /// resolve a relative `data_dir` against.
        #[arg(long)]
        node_dir: Option<String>,

        /// This node's own address, as other members dial it.
        #[arg(long)]
        hostname: Option<String>,

        /// Address of a running member to contact for cluster bootstrap.
        /// Omit to start a brand-new single-node cluster.
        #[arg(long)]
        leader: Option<String>,

        /// TCP port to listen on.
        #[arg(short, long)]
        port: Option<u16>,

        /// Directory holding this node's `<host>.db`/`.ring`/`.handoff`.
        #[arg(long)]
        data_dir: Option<String>,
    },

    /// Interactive add-node/remove-node/put/get REPL.
    Repl {
        /// Node address to connect to.
        #[arg(short, long, default_value = "127.0.0.1:13337")]
        address: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
        Commands::Start {
            node_dir,
            hostname,
            leader,
            port,
            data_dir,
        } => commands::start::run(node_dir.as_deref(), hostname, leader, port, data_dir),
        Commands::Repl { address } => commands::repl::run(&address),
    }
}
