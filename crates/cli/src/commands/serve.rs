//! `parley serve` — Start the chat server.

use parley_config::AppConfig;
use tracing::info;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    info!(config = ?config, "Configuration loaded");

    println!("💬 Parley");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {} @ {}", config.llm.model, config.llm.base_url);
    println!("   History:   {}", config.memory.backend);

    parley_gateway::start(config).await?;

    Ok(())
}
