//! `parley serve` — Start the HTTP gateway.

use std::path::Path;

use parley_config::AppConfig;

pub async fn run(config_path: &Path, port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = if config_path.exists() {
        AppConfig::load(config_path).map_err(|e| format!("Failed to load config: {e}"))?
    } else {
        AppConfig::from_env().map_err(|e| format!("Invalid configuration: {e}"))?
    };

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("Parley Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.model.name);

    parley_gateway::start(config).await?;

    Ok(())
}
