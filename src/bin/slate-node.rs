//! SlateChain node binary

use clap::Parser;
use slatechain::config::load_config;
use slatechain::node::Node;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "slate-node", about = "Run a SlateChain node")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the chain data directory
    #[arg(long)]
    data_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut config = load_config(&args.config)?;
    if let Some(data_dir) = args.data_dir {
        config.chain.data_dir = data_dir;
    }

    let node = Arc::new(Node::init(config).await?);
    node.start().await
}
