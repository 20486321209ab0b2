//! Torii - JWT sign-in gate diagnostics
//!
//! Validates a configuration file and runs a header value through the gate
//! against an empty in-memory identity store.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use torii::auth::AuthRequest;
use torii::gate::{Gate, LogSessionManager};
use torii::session::MemoryIdentityStore;
use torii::{logging, metrics, Config};
use tracing::info;

/// Torii - check a sign-in gate configuration against real tokens
#[derive(Parser, Debug)]
#[command(name = "torii")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Value of the token header to evaluate (e.g. "Bearer eyJ...")
    #[arg(long)]
    header_value: Option<String>,

    /// Identity key of an already established session
    #[arg(long)]
    session: Option<String>,

    /// Fetch the JWKS before evaluating
    #[arg(long)]
    prefetch: bool,

    /// Print Prometheus metrics after evaluating
    #[arg(long)]
    metrics: bool,

    /// Override the configured log filter
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load configuration from {:?}", args.config))?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    logging::init_subscriber(&config.logging)?;

    info!("Starting Torii v{}", torii::VERSION);

    let settings = config.auth.settings()?;
    let gate = Gate::new(
        &settings,
        Arc::new(MemoryIdentityStore::new()),
        Arc::new(LogSessionManager),
    )?;
    info!(mode = gate.mode(), "Loaded configuration from {:?}", args.config);

    if args.prefetch {
        match gate.refresh_key_set().await {
            Some(Ok(set)) => info!(keys = ?set.key_ids(), "JWKS prefetched"),
            Some(Err(err)) => anyhow::bail!("JWKS prefetch failed: {}", err),
            None => info!("Shared secret mode, nothing to prefetch"),
        }
    }

    if let Some(value) = args.header_value {
        let request = AuthRequest::new().with_header(&settings.header, &value);
        let outcome = gate.handle(&request, args.session.as_deref()).await;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }

    if args.metrics {
        print!("{}", metrics::gather_text());
    }

    Ok(())
}
