use std::io::{BufRead, Write};

use tracing::{error, info};

use latka_core::{AgentConfig, LatkaAgent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "latka=info,latka_core=info".into()),
        )
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AgentConfig::load();
    let agent = LatkaAgent::init(config)?;
    agent.start()?;
    info!("Łatka is awake. Type a message, or Ctrl-C to leave.");

    // Read stdin on the blocking pool so the heartbeat keeps ticking while we
    // wait for input.
    let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(8);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            line = rx.recv() => {
                let Some(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match agent.handle_message(&line).await {
                    Ok(reply) => {
                        println!("{reply}");
                        let _ = std::io::stdout().flush();
                    }
                    Err(e) => error!(error = %e, "Message rejected"),
                }
            }
        }
    }

    agent.shutdown();
    Ok(())
}
