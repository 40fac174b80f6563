//! `physiogold serve`: Start the chat UI and session API.

use std::path::Path;

pub async fn run(
    config_path: Option<&Path>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config =
        super::load_config(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }

    println!("PhysioGold");
    println!(
        "   Open:     http://{}:{}/",
        config.gateway.host, config.gateway.port
    );
    println!("   Fallback: {}", config.provider.fallback_model);
    println!("   Prototype only: do not enter real patient data.");

    physiogold_gateway::start(config).await?;

    Ok(())
}
