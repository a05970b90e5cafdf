//! `pulsechat serve`: Start the HTTP API server.

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config()?;
    config.require_api_key()?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("PulseChat Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.provider.model);
    println!("   Database:  {}", config.database.url);

    pulsechat_gateway::start(config).await?;

    Ok(())
}
