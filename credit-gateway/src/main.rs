//! # Credit Gateway
//!
//! Encrypted credit-data submission server.
//!
//! ## Features
//!
//! - On-chain reputation scoring from public wallet history
//! - Network-aware encryption backend (relayer or local mock coprocessor)
//! - Six-value encrypted payloads bound to one (user, contract) pair
//! - Submission and evaluation lifecycle reconciled with the contract
//!
//! ## Usage
//!
//! ```bash
//! # Development mode (in-memory chain, mock coprocessor)
//! CREDIT_DEV_MODE=true cargo run
//!
//! # Sepolia
//! CREDIT_CONTRACT_ADDRESS=0x... CREDIT_RPC_URL=http://localhost:8545 cargo run
//! ```
//!
//! ## API Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /status` - Detailed server status
//! - `GET /api/v1/reputation/:account` - Wallet reputation scores
//! - `POST /api/v1/credit/submit` - Encrypt and submit credit data
//! - `DELETE /api/v1/credit/submit/:account` - Cancel a running submission
//! - `GET /api/v1/credit/status/:account` - Submission/evaluation status
//! - `POST /api/v1/credit/evaluate` - Trigger loan evaluation
//! - `GET /api/v1/network` - Active network profile

use std::sync::Arc;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use credit_gateway::chain::{
    ChainDataProvider, CreditContract, DevChain, JsonRpcClient, RpcCreditContract,
};
use credit_gateway::config::Config;
use credit_gateway::routes::create_routes;
use credit_gateway::services::{BackendConfigResolver, DefaultBackendFactory, InputVerifierSigner};
use credit_gateway::state::AppState;
use credit_gateway::types::Address;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        dev_mode = config.dev_mode,
        chain_id = config.chain_id,
        contract = %config.contract_address,
        deployment_mode = ?config.deployment_mode,
        "Starting Credit Gateway"
    );

    if config.contract_address == Address::ZERO {
        warn!("No contract address configured, writes will target the zero address");
    }

    // Initialize input verifier signer
    let signer = Arc::new(InputVerifierSigner::from_hex(
        config.verifier_secret_key.as_deref(),
    )?);
    info!(
        pubkey = %hex::encode(signer.public_key()),
        "Input verifier signer initialized"
    );

    let http = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()?;

    let factory = Arc::new(DefaultBackendFactory::new(
        http.clone(),
        signer.clone(),
        config.dev_mode,
    ));
    let resolver = Arc::new(BackendConfigResolver::new(
        config.deployment_mode,
        config.backend_endpoint.clone(),
        factory,
    ));

    let (provider, contract): (Arc<dyn ChainDataProvider>, Arc<dyn CreditContract>) =
        if config.dev_mode {
            info!("Running in DEVELOPMENT mode - chain and encryption are MOCKED");
            let chain = Arc::new(
                DevChain::new(config.chain_id, config.contract_address)
                    .with_input_verifier(signer.public_key()),
            );
            (
                chain.clone() as Arc<dyn ChainDataProvider>,
                chain as Arc<dyn CreditContract>,
            )
        } else {
            let rpc_url = match &config.rpc_url {
                Some(url) => url.clone(),
                None => resolver
                    .resolve(config.chain_id)?
                    .rpc_url
                    .with_context(|| format!("no RPC URL known for chain {}", config.chain_id))?,
            };
            info!(%rpc_url, "Using JSON-RPC chain provider");

            let client = Arc::new(JsonRpcClient::with_client(http.clone(), rpc_url));
            let contract = Arc::new(RpcCreditContract::new(
                client.clone(),
                config.contract_address,
                config.confirmation_policy(),
                config.decision_log_scan(),
            ));
            (
                client as Arc<dyn ChainDataProvider>,
                contract as Arc<dyn CreditContract>,
            )
        };

    match provider.chain_id().await {
        Ok(chain_id) if chain_id != config.chain_id => warn!(
            expected = config.chain_id,
            actual = chain_id,
            "Connected to an unexpected chain"
        ),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Could not read chain id at startup"),
    }

    // Create application state
    let state = AppState::new(provider, contract, resolver, config.dev_mode);

    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    let cors = if config.cors_origins.iter().any(|origin| origin == "*") {
        cors.allow_origin(Any)
    } else {
        let origins = config
            .cors_origins
            .iter()
            .map(|origin| origin.parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()
            .context("invalid CORS origin")?;
        cors.allow_origin(AllowOrigin::list(origins))
    };

    // Build router
    let app = create_routes(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors),
    );

    // Start server
    let addr = config.socket_addr()?;
    info!(%addr, "Server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Initialize logging based on configuration
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .init();
    }
}
