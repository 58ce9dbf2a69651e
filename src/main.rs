use std::sync::Arc;

use dappconnect::{
    config::AppConfig,
    connection::{AppContext, NetworkEndpoints},
    contract::{ContractDescriptor, EthersBinder},
    error::AppResult,
    layers::{mcp::McpServer, service::ServiceLayer},
    network::HttpEndpoints,
    wallet::WalletManager,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(err) = run().await {
        error!("fatal error: {err}");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> AppResult<()> {
    init_tracing();

    info!("loading configuration");
    let config = AppConfig::load()?;

    let endpoints = HttpEndpoints::from_config(&config);
    let descriptor = ContractDescriptor::load(&config)?;
    info!(
        network = %config.network,
        contract = %format!("{:#x}", descriptor.address),
        "contract descriptor loaded"
    );

    info!("initialising wallet manager");
    let wallet_provider = endpoints.read_only(config.network)?;
    let wallet = WalletManager::from_config(&config, wallet_provider)?;

    let context = AppContext::new(
        Arc::new(wallet),
        Arc::new(EthersBinder::from_config(&config)),
        Arc::new(endpoints),
        Arc::new(descriptor),
        config.network,
    );
    let reconciler = context.start();

    if config.auto_connect {
        if let Err(err) = context.connect().await {
            warn!("auto-connect failed, continuing read-only: {err}");
        }
    }

    info!("starting JSON-RPC stdio server");
    let service = ServiceLayer::new(context, config.settle_timeout());
    let result = McpServer::new(service).run_stdio().await;

    reconciler.abort();
    result
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries JSON-RPC responses.
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_line_number(true)
        .init();
}
