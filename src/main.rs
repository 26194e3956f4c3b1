use std::path::Path;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use apphost::agent::NodeAgent;
use apphost::cli::{format_check, Args, Command};
use apphost::config::{default_config_path, load_config_from, Config};
use apphost::server::{create_router, AppState};
use apphost::spec::{parse_specification, Tier};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let config = match load_config_from(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(
                "Failed to load configuration {}: {}",
                config_path.display(),
                e
            );
            process::exit(1);
        }
    };

    let result = match args.command {
        Command::Check { spec_file, tier } => check(&spec_file, tier, &config),
        Command::Serve { bind_addr, port } => serve(config, bind_addr, port).await,
    };

    if let Err(e) = result {
        error!("{:#}", e);
        process::exit(1);
    }
}

fn check(spec_file: &Path, tier: Option<Tier>, config: &Config) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(spec_file)
        .with_context(|| format!("Failed to read {}", spec_file.display()))?;
    let spec = parse_specification(&content)
        .with_context(|| format!("Invalid specification {}", spec_file.display()))?;
    let tier = tier.unwrap_or(config.node.tier);
    println!("{}", format_check(&spec, tier, config));
    Ok(())
}

async fn serve(config: Config, bind_addr: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let bind_addr = bind_addr.unwrap_or_else(|| config.node.bind_addr.clone());
    let port = port.unwrap_or(config.node.api_port);
    let addr = format!("{}:{}", bind_addr, port);

    let agent = Arc::new(NodeAgent::with_host_capabilities(config));
    agent.start().await;

    let app = create_router(AppState::new(agent.clone()));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Server listening on {}", addr);
    info!("Endpoints:");
    info!("  GET    /health                       - Health check");
    info!("  GET    /v1/status                    - Node status");
    info!("  GET    /v1/apps                      - Installed apps");
    info!("  POST   /v1/apps                      - Install an app");
    info!("  DELETE /v1/apps/{{name}}               - Remove an app");
    info!("  POST   /v1/apps/{{name}}/redeploy      - Redeploy an app");
    info!("  GET    /v1/apps/{{id}}/monitoring      - Monitoring data");
    info!("  POST   /v1/ports/check               - Peer port check");
    info!("  POST   /v1/broadcast                 - Peer announcements");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("Server error")?;

    agent.shutdown().await;
    Ok(())
}
