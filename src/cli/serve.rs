// ABOUTME: CLI serve-stdio command - one connection speaking JSON-lines events over stdin/stdout
//
// stdin carries inbound events, one JSON object per line; stdout carries the
// outbound events from the connection's single writer loop. On EOF or a
// shutdown signal every session is ended and room containers are swept.

use anyhow::{Context, Result};
use roomshell::{
    AppConfig, Connection, ConnectionHandler, ContainerPool, DockerRuntime, InboundEvent,
    SessionRegistry,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// How long the writer gets to flush queued events after shutdown
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub async fn execute(config: AppConfig) -> Result<()> {
    let runtime = DockerRuntime::connect(&config).context("Failed to create Docker client")?;
    let pool = ContainerPool::new(Arc::new(runtime), config.container.clone());
    let registry = SessionRegistry::new(pool.clone(), config.clone());

    let (connection, mut outbound) = Connection::channel(config.session.output_buffer);
    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundEvent>(64);

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(event) = outbound.recv().await {
            let mut line = serde_json::to_vec(&event)?;
            line.push(b'\n');
            stdout.write_all(&line).await?;
            stdout.flush().await?;
        }
        Ok::<_, anyhow::Error>(())
    });

    let handler = tokio::spawn(ConnectionHandler::new(Arc::clone(&registry), connection).run(inbound_rx));

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match serde_json::from_str::<InboundEvent>(&line) {
                    Ok(event) => {
                        if inbound_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Ignoring malformed event: {}", e),
                },
                None => {
                    info!("stdin closed");
                    break;
                }
            },
            _ = &mut shutdown => {
                info!("Shutdown signal received, stopping containers...");
                break;
            }
        }
    }

    // A closed inbound channel is treated as a disconnect
    drop(inbound_tx);
    if let Err(e) = handler.await {
        warn!("Connection handler failed: {}", e);
    }

    registry.shutdown().await;
    pool.sweep_all().await;

    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer).await {
        Ok(Ok(Err(e))) => warn!("Writer loop failed: {}", e),
        Ok(Err(e)) => warn!("Writer task failed: {}", e),
        Ok(Ok(Ok(()))) | Err(_) => {}
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
