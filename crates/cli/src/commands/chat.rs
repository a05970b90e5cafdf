//! `pulsechat chat`: Interactive or single-message chat mode.

use pulsechat_chat::{ChatEngine, ChatOutcome, ChatRequest};
use pulsechat_core::{EntityStore, Snapshot};
use pulsechat_storage::SqliteStore;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn run(
    message: Option<String>,
    session: Option<String>,
    monitoring_session: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config()?;

    if let Err(e) = config.require_api_key() {
        eprintln!();
        eprintln!("  ERROR: {e}");
        eprintln!();
        eprintln!("  Config file:");
        eprintln!(
            "    {}",
            pulsechat_config::AppConfig::config_dir()
                .join("config.toml")
                .display()
        );
        eprintln!();
        return Err(e.into());
    }

    let engine = ChatEngine::from_config(&config)?;
    let session_id = session.unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4()));

    let snapshot = match monitoring_session.as_deref() {
        Some(id) => Some(load_snapshot(&config.database.url, id).await?),
        None => None,
    };

    if let Some(msg) = message {
        eprint!("  Thinking...");
        let outcome = engine
            .chat(ChatRequest::new(msg, Some(session_id), snapshot, true)?)
            .await;
        eprint!("\r              \r");
        return match outcome {
            ChatOutcome::Replied(reply) => {
                println!("{}", reply.response);
                Ok(())
            }
            ChatOutcome::Failed(failure) => {
                eprintln!("  [Error] {}", failure.error);
                println!("{}", failure.response);
                Err(failure.error.into())
            }
        };
    }

    println!();
    println!("  PulseChat — Interactive Mode");
    println!();
    println!("  Model:     {}", engine.model());
    println!("  Session:   {session_id}");
    match &snapshot {
        Some(s) => println!(
            "  Context:   snapshot of {}",
            s.timestamp.format("%Y-%m-%d %H:%M:%S")
        ),
        None => println!("  Context:   none"),
    }
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type '/clear' to reset the conversation, 'exit' or Ctrl+D to quit.");
    println!();

    repl(&engine, &session_id, snapshot).await?;

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

async fn repl(
    engine: &ChatEngine,
    session_id: &str,
    snapshot: Option<Snapshot>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    prompt()?;
    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        match input {
            "" => {}
            "exit" | "quit" => break,
            "/clear" => {
                engine.clear_history(session_id).await;
                println!("  (conversation cleared)");
            }
            _ => {
                let request = ChatRequest::new(
                    input,
                    Some(session_id.to_string()),
                    snapshot.clone(),
                    snapshot.is_some(),
                )?;
                eprint!("  ...");
                let outcome = engine.chat(request).await;
                eprint!("\r     \r");
                println!();
                if let ChatOutcome::Failed(failure) = &outcome {
                    eprintln!("  [Error] {}", failure.error);
                }
                for line in outcome.response().lines() {
                    println!("  PulseChat > {line}");
                }
                println!();
            }
        }
        prompt()?;
    }
    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

async fn load_snapshot(
    database_url: &str,
    monitoring_session: &str,
) -> Result<Snapshot, Box<dyn std::error::Error>> {
    let store = SqliteStore::new(database_url, 1).await?;
    let snapshot = store.latest_snapshot(monitoring_session).await?;
    store.close().await;
    snapshot.ok_or_else(|| {
        format!("Monitoring session '{monitoring_session}' has no readings yet").into()
    })
}
