//! Start command - runs a Dynamo node.

use anyhow::{Context, Result};
use dynamo_config::NodeConfig;
use dynamo_node::{Server, ServerError};
use tracing::info;

use crate::style::banner::print_mini_banner;
use crate::style::colors::SemanticStyle;
use crate::style::print_spacer;

#[allow(clippy::too_many_arguments)]
pub fn run(
    node_dir: Option<&str>,
    hostname: Option<String>,
    leader: Option<String>,
    port: Option<u16>,
    data_dir: Option<String>,
) -> Result<()> {
    let mut config = match node_dir {
        Some(dir) => NodeConfig::load_from_dir(dir).context("failed to load dynamo.toml")?,
        None => NodeConfig::load().context("failed to load configuration")?,
    };

    if let Some(hostname) = hostname {
        config.hostname = hostname;
    }
    if leader.is_some() {
        config.leader = leader;
    }
    if let Some(port) = port {
        config.tcp_port = port;
    }
    if let Some(data_dir) = data_dir {
        config.data_dir = data_dir.into();
    }
    config.resolve_paths(std::env::current_dir()?);
    config.validate().context("invalid node configuration")?;

    print_mini_banner();
    println!(" {}", "node".muted());
    print_spacer();
    println!("  {}: {}", "Hostname".muted(), config.hostname);
    println!(
        "  {}: {}",
        "Leader".muted(),
        config.leader.as_deref().unwrap_or("(none — this node bootstraps the cluster)")
    );
    println!("  {}: {}", "Port".muted(), config.tcp_port);
    println!("  {}: {}", "Data dir".muted(), config.data_dir.display());
    println!(
        "  {}: {} (r={}, w={})",
        "Replication".muted(),
        config.replication_factor,
        config.r,
        config.w
    );
    print_spacer();
    println!("Node is ready. Press Ctrl+C to stop.");
    print_spacer();

    info!(hostname = %config.hostname, port = config.tcp_port, "starting node");
    let mut server = Server::bind(&config).context("failed to bind node")?;
    if let Err(e) = server.run() {
        abort_if_fatal(&e);
        return Err(e).context("node error during operation");
    }

    println!("Node stopped gracefully.");
    Ok(())
}

/// A [`ServerError::Fatal`] means the node hit a broken invariant or
/// corrupt persisted state it cannot reason about — per the error
/// taxonomy, the process aborts and trusts an operator/supervisor to
/// restart it with a clean slate, rather than limping on.
fn abort_if_fatal(error: &ServerError) {
    if let ServerError::Fatal(reason) = error {
        tracing::error!(reason = %reason, "fatal node error, aborting process");
        std::process::abort();
    }
}
