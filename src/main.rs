//! Gateway entry point.
//!
//! Initializes configuration and shared state, then starts the web
//! server that fronts the protected origin.

use actix_web::{web, App, HttpServer};
use dotenv::dotenv;
use log::info;

use sentinel_gateway::api::{self, AppState};
use sentinel_gateway::config;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    env_logger::init();

    info!("starting sentinel gateway...");

    // Load configuration
    let config = config::load_config()?;

    // Build shared state: feature tracker, detector, mitigation engine,
    // metrics, and the origin client
    let state = web::Data::new(AppState::from_config(&config));

    info!(
        "listening on {}:{}, forwarding to {}",
        config.server.host, config.server.port, config.origin.url
    );

    HttpServer::new(move || App::new().app_data(state.clone()).configure(api::config))
        .bind((config.server.host.as_str(), config.server.port))?
        .run()
        .await?;

    Ok(())
}
