//! `pulsechat status`: Show configuration and database summary.

use pulsechat_config::AppConfig;
use pulsechat_core::EntityStore;
use pulsechat_storage::SqliteStore;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;

    println!("PulseChat Status");
    println!("================");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Provider:     {} ({})", config.provider.name, config.provider.base_url);
    println!("  Model:        {}", config.provider.model);
    println!(
        "  Timeout:      {}s, {} retries",
        config.provider.timeout_secs, config.provider.max_retries
    );
    println!("  Temperature:  {}", config.sampling.temperature);
    println!("  History cap:  {} messages", config.history.max_messages);
    println!("  Gateway:      {}:{}", config.gateway.host, config.gateway.port);
    println!("  Database:     {}", config.database.url);
    println!(
        "  API key:      {}",
        if config.require_api_key().is_ok() {
            "configured"
        } else {
            "missing"
        }
    );

    match SqliteStore::new(&config.database.url, 1).await {
        Ok(store) => {
            match store.table_counts().await {
                Ok(counts) => println!(
                    "\n  Database reachable: {} users, {} devices, {} sessions",
                    counts.users, counts.devices, counts.sessions
                ),
                Err(e) => println!("\n  Database query failed: {e}"),
            }
            store.close().await;
        }
        Err(e) => println!("\n  Database unavailable: {e}"),
    }

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("  Config file found");
    } else {
        println!("  No config file, using defaults");
    }

    Ok(())
}
