mod commands;

use anyhow::Context;
use mimic_core::config::MimicConfig;
use std::path::PathBuf;
use std::sync::Arc;
use storage::sqlite::SqliteStorage;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn config_path() -> Option<PathBuf> {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("MIMIC_CONFIG").ok())
        .map(PathBuf::from)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = MimicConfig::load(config_path().as_deref()).context("loading configuration")?;

    // stdout carries responses, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(database = %config.database_path, ai = %config.ai.provider, "starting mimic daemon");

    let sqlite = match SqliteStorage::new(&config.database_path).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("Failed to open database: {}", e);
            return Err(e.into());
        }
    };
    let service = Arc::new(commands::build_service(&config, sqlite)?);

    let scheduler = Arc::new(service.scheduler()?);
    tokio::spawn(scheduler.start());

    let (tx, mut rx) = mpsc::channel::<String>(64);
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let service = service.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let response = commands::handle_line(&service, &line).await;
            if tx.send(format!("{}\n", response)).await.is_err() {
                error!("response channel closed");
            }
        });
    }

    drop(tx);
    writer.await?;
    info!("stdin closed, shutting down");
    Ok(())
}
