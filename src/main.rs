use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser as _;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use slirc_xdcc::{Agent, Config, DiskAllocator, Node, Parser, Tree};

#[derive(clap::Parser, Debug)]
#[command(name = "slirc-xdcc", version, about = "Unattended XDCC grabber")]
struct Args {
    /// Configuration file.
    #[arg(short, long, default_value = "slirc-xdcc.toml")]
    config: PathBuf,

    /// Log filter, e.g. `info,slirc_xdcc=trace`. Overrides RUST_LOG.
    #[arg(long)]
    log: Option<String>,
}

fn init_logging(filter: Option<&str>) {
    let filter = filter
        .and_then(|f| EnvFilter::try_new(f).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info,slirc_xdcc=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Build the initial tree from the configured servers and channels.
fn seed(tree: &Tree, config: &Config) -> Result<()> {
    for server in &config.servers {
        let id = tree.add_child(None, Node::server(&server.host, server.port).enabled(server.enabled))?;
        for channel in &server.channels {
            tree.add_child(Some(id), Node::channel(channel).enabled(true))?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log.as_deref());

    let config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    std::fs::create_dir_all(&config.storage.temp_dir).context("creating temp directory")?;
    std::fs::create_dir_all(&config.storage.ready_dir).context("creating ready directory")?;

    let tree = Arc::new(Tree::new());
    seed(&tree, &config)?;
    info!(servers = config.servers.len(), "starting");

    let allocator = Arc::new(DiskAllocator::new(
        config.storage.temp_dir.clone(),
        config.storage.ready_dir.clone(),
    ));
    let parser = Arc::new(Parser::new(&config.irc.version));
    let agent = Agent::new(tree, Arc::new(config), allocator, parser);

    let mut notifications = agent.notifications();
    tokio::spawn(async move {
        loop {
            match notifications.recv().await {
                Ok(n) => info!(kind = ?n.kind, entity = %n.entity, "notification"),
                Err(RecvError::Lagged(missed)) => warn!(missed, "notification log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => signal.cancel(),
            Err(e) => error!("cannot listen for ctrl-c: {}", e),
        }
    });

    agent.run(shutdown).await;
    info!("bye");
    Ok(())
}
