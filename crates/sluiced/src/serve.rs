//! Sender role: serve files until interrupted.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

use sluice_core::config::SluiceConfig;
use sluice_services::{new_session_table, FileStore, Listener, SessionConfig};

pub async fn run(config: &SluiceConfig) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.network.bind_addr, config.network.listen_port)
        .parse()
        .with_context(|| format!("invalid bind address {}", config.network.bind_addr))?;
    let socket = Arc::new(
        UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?,
    );

    let root = &config.serve.root;
    if !root.is_dir() {
        tracing::warn!(root = %root.display(), "serve root is not a directory, every request will fail");
    }

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let listener = Listener::new(
        socket,
        FileStore::new(root.clone()),
        SessionConfig::from(&config.transfer),
        new_session_table(),
        None,
        shutdown_tx.subscribe(),
    );
    tracing::info!(%addr, window = config.transfer.window_size, "sluiced serving");
    listener.run().await
}
