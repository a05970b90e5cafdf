//! `pulsechat db`: Schema creation and table statistics.

use pulsechat_core::{EntityStore, TableCounts};
use pulsechat_storage::SqliteStore;

pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let store = SqliteStore::new(&config.database.url, config.database.max_connections).await?;
    store.run_migrations().await?;
    store.close().await;
    println!("Database schema ready at {}", config.database.url);
    Ok(())
}

pub async fn stats(json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;
    let store = SqliteStore::new(&config.database.url, 1).await?;
    let counts = store.table_counts().await?;
    store.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&counts)?);
    } else {
        print!("{}", render_counts(&counts));
    }
    Ok(())
}

fn render_counts(counts: &TableCounts) -> String {
    let rows = [
        ("users", counts.users),
        ("devices", counts.devices),
        ("sessions", counts.sessions),
        ("biosignal_readings", counts.biosignal_readings),
        ("analysis_results", counts.analysis_results),
        ("processing_logs", counts.processing_logs),
        ("system_metrics", counts.system_metrics),
    ];
    let mut out = String::new();
    for (table, count) in rows {
        out.push_str(&format!("  {table:<20} {count:>8}\n"));
    }
    out
}
