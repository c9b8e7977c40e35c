use log::{error, info, warn};
use std::net::SocketAddr;
use warp::Filter;

use rusty_rooms::config::ServerConfig;
use rusty_rooms::context::AppContext;
use rusty_rooms::core::hub::Hub;
use rusty_rooms::handlers::routes;

#[tokio::main]
async fn main() {
    // Initialize env
    let dotenv_result = dotenvy::dotenv();

    // Initialize logging
    env_logger::init();

    match dotenv_result {
        Ok(path) => info!("Environment variables loaded from {}", path.display()),
        Err(e) => warn!("Failed to load .env file: {}", e),
    };

    // Load config from env
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!("Configuration: host={}, port={}", config.host, config.port);

    let ctx = match AppContext::from_config(config).await {
        Ok(ctx) => ctx,
        Err(e) => {
            error!("Failed to initialize backends: {}", e);
            std::process::exit(1);
        }
    };

    let hub = match Hub::start(ctx.clone()).await {
        Ok(hub) => hub,
        Err(e) => {
            error!("Failed to start hub: {}", e);
            std::process::exit(1);
        }
    };

    let routes = routes(ctx.clone(), hub).with(warp::log("rusty_rooms"));

    // Build the server address
    let addr: SocketAddr = match format!("{}:{}", ctx.config.host, ctx.config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Failed to parse server address: {}", e);
            std::process::exit(1);
        }
    };

    let tls_paths = ctx
        .config
        .tls_cert_path
        .clone()
        .zip(ctx.config.tls_key_path.clone());

    match tls_paths {
        Some((cert, key)) if ctx.config.enable_tls => {
            info!("Starting Rusty Rooms server on https://{}", addr);
            warp::serve(routes)
                .tls()
                .cert_path(cert)
                .key_path(key)
                .run(addr)
                .await;
        }
        _ => {
            info!("Starting Rusty Rooms server on http://{}", addr);
            warp::serve(routes).run(addr).await;
        }
    }
}
