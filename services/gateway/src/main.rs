//! Recipe API Gateway - Main Entry Point

use std::path::Path;

use anyhow::Result;
use clap::{Arg, Command};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use recipe_gateway::{GatewayConfig, start_server};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "recipe_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse command line arguments
    let matches = Command::new("recipe-gateway")
        .version(env!("CARGO_PKG_VERSION"))
        .about("API gateway in front of the user and recipe services")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("gateway.toml"),
        )
        .arg(
            Arg::new("routes")
                .long("routes")
                .help("Print available routes and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("check-config")
                .long("check-config")
                .help("Validate the configuration and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .get_matches();

    // Load configuration
    let config_path = matches
        .get_one::<String>("config")
        .map_or("gateway.toml", String::as_str);
    let config = if Path::new(config_path).exists() {
        match GatewayConfig::from_file(config_path) {
            Ok(config) => {
                info!("Loaded configuration from: {}", config_path);
                config
            }
            Err(e) => {
                error!("Failed to load config from {}: {}", config_path, e);
                return Err(e.into());
            }
        }
    } else {
        error!("Config file {} not found", config_path);
        info!("Using default configuration");
        GatewayConfig::default()
    };

    if matches.get_flag("check-config") {
        config.validate()?;
        config.route_table()?;
        println!("Configuration OK");
        return Ok(());
    }

    // Print routes if requested
    if matches.get_flag("routes") {
        return recipe_gateway::server::print_routes(&config);
    }

    // Print startup information
    info!(
        "Starting Recipe API Gateway v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!("Server will bind to: {}", config.server_address());
    info!("Backend services:");
    info!(
        "  Users: {} (timeout {}ms)",
        config.services.user_service.base_url, config.services.user_service.timeout_ms
    );
    info!(
        "  Recipes: {} (timeout {}ms)",
        config.services.recipe_service.base_url, config.services.recipe_service.timeout_ms
    );

    info!("Features enabled:");
    info!("  CORS: {}", config.cors.enabled);
    info!("  Rate Limiting: {}", config.rate_limiting.enabled);
    info!("  Metrics: {}", config.monitoring.metrics_enabled);
    info!("  Compression: {}", config.server.compression);

    // Start the server
    if let Err(e) = start_server(config).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
