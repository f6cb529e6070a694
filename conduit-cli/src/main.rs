//! Conduit admin console — drives a `conduit-core` `Core` directly from a
//! terminal: send a message to a named session, list sessions, inspect the
//! queue, tail history.

mod repl;
mod session;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use conduit_core::{Config, Core};

use crate::session::{StdoutObserver, StdoutOutboundSink};

/// Conduit admin console.
#[derive(Parser)]
#[command(name = "conduit")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a custom config file (overrides default search locations)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref()).context("Failed to load config")?;

    let observer = std::sync::Arc::new(StdoutObserver);
    let outbound = std::sync::Arc::new(StdoutOutboundSink);
    let core = Core::new(&config, observer, outbound)
        .await
        .context("Failed to initialize conduit core")?;

    let exit = repl::run(core.clone()).await;

    core.shutdown(std::time::Duration::from_secs(10)).await;

    exit
}
