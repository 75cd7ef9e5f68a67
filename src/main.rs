// src/main.rs
use env_logger::{Builder, Env};
use finance::api;
use finance::config::Config;
use log::{error, info};
use tokio::signal;

#[tokio::main]
async fn main() {
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    let state = match finance::build_state(&config) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize: {}", e);
            std::process::exit(1);
        }
    };

    // Define routes
    let routes = api::routes(state);
    let (addr, server) = match warp::serve(routes)
        .try_bind_with_graceful_shutdown(config.listen_addr, shutdown_signal())
    {
        Ok(bound) => bound,
        Err(e) => {
            error!("Failed to bind {}: {}", config.listen_addr, e);
            std::process::exit(1);
        }
    };

    // Start the server
    info!("Server running on http://{}", addr);
    server.await;
    info!("Server shutdown complete");
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
