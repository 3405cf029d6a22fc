use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};

use parlor::{ChatHub, Config, WebServer};

const DEFAULT_CONFIG_PATH: &str = "parlor.toml";

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    // Load configuration
    let config = if Path::new(&config_path).exists() {
        match Config::load_with_env(&config_path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load {config_path}: {e}");
                std::process::exit(1);
            }
        }
    } else {
        eprintln!("{config_path} not found, using default configuration.");
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    };
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {e}");
        std::process::exit(1);
    }

    // Initialize logging
    if let Err(e) = parlor::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        parlor::logging::init_console_only(&config.logging.level);
    }

    info!("Parlor chat server");

    if let Err(e) = run(config).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> parlor::Result<()> {
    let store = parlor::store::open(&config.database).await?;
    info!(backend = ?config.database.backend, "Store opened");

    let hub = Arc::new(ChatHub::new(config.chat.clone(), store));
    let loaded = hub.load_history().await?;
    info!(messages = loaded, "Message history loaded");

    let server = WebServer::new(&config.server, hub)?;
    info!("Server configured on {}", server.addr());
    server.run().await
}
