//! Vault-proposer HTTP entrypoint.
//!
//! This binary launches an Axum-based HTTP server that accepts signed
//! intentions, admits them against vault balances, and runs the background
//! bundle-proposer and deposit-watcher tasks that anchor bundles on-chain.
//!
//! Endpoints:
//! - `GET /health` – liveness
//! - `POST /intentions` – submit a signed intention
//! - `GET /bundles`, `GET /bundles/{nonce}`, `GET /bundles/{nonce}/cid` – bundle history
//! - `GET /store/status` – content store reachability
//! - `GET /vaults/{vault}/nonce`, `/controllers`, `/rules`, `/balances/{token}` – vault state
//! - `GET /controllers/{controller}/vaults` – vaults a controller can act on
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control binding address
//! - see [`config::Config`] for the full set of required/optional variables

mod bundle_codec;
mod bundle_proposer;
mod chain_gateway;
mod config;
mod deposit_watcher;
mod error;
mod handlers;
mod intention_handler;
mod model;
mod name_resolver;
mod pinner;
mod queue;
mod service;
mod store;
mod timestamp;
mod util;
mod validator;
mod webhook;

use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::handlers::AppState;
use crate::service::ProposerService;
use crate::util::SigDown;

/// Initializes the vault-proposer node.
///
/// - Loads `.env` variables.
/// - Initializes structured tracing.
/// - Connects to Postgres and the chain gateway, and starts the bundle
///   proposer and deposit watcher as background tasks.
/// - Starts an Axum HTTP server with the submission and query endpoints.
///
/// Binds to the address specified by the `HOST` and `PORT` env vars.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    crate::util::telemetry::init_tracing();

    let config = Config::load()?;

    let service = ProposerService::try_new(&config).await.unwrap_or_else(|e| {
        tracing::error!("failed to initialize proposer service: {e}");
        std::process::exit(1);
    });

    let sig_down = SigDown::try_new()?;
    let cancel = sig_down.cancellation_token();
    let _background_tasks = service.spawn_background_tasks(cancel.clone());

    let axum_state = AppState {
        store: service.store.clone(),
        chain: service.chain.clone(),
        intention_handler: service.intention_handler.clone(),
    };

    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(axum_state))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        });

    let axum_cancellation_token = cancel.clone();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    Ok(())
}
