//! Receiver role: fetch one file, retrying the whole transfer on failure.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::net::UdpSocket;

use sluice_core::config::SluiceConfig;
use sluice_services::{fetch, FileStore, SessionConfig};

pub async fn run(
    config: &SluiceConfig,
    host: &str,
    port: u16,
    name: &str,
    dest: PathBuf,
) -> Result<()> {
    let peer = tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("failed to resolve {host}"))?
        .next()
        .with_context(|| format!("{host} has no addresses"))?;
    let session_config = SessionConfig::from(&config.transfer);
    let attempts = config.fetch.attempts.max(1);

    for attempt in 1..=attempts {
        tracing::info!(%peer, name, attempt, attempts, "fetching");

        // Fresh socket per attempt so a stale server-side session cannot
        // swallow the new request.
        let socket = Arc::new(bind_for(peer).await?);
        let sink = FileStore::open_for_write(&dest)
            .await
            .with_context(|| format!("failed to create {}", dest.display()))?;

        match fetch(socket, peer, name, sink, session_config.clone(), None).await {
            Ok((report, _)) => {
                let s = report.stats;
                println!(
                    "{} -> {} ({} bytes, {} acks, {} duplicates, {} corrupt)",
                    name,
                    dest.display(),
                    report.file_size,
                    s.acks_sent,
                    s.duplicates,
                    s.corrupt,
                );
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "fetch attempt failed");
                if attempt == attempts {
                    bail!("fetch of {name} from {peer} failed after {attempts} attempt(s): {e}");
                }
            }
        }
    }
    Ok(())
}

async fn bind_for(peer: SocketAddr) -> Result<UdpSocket> {
    let local = if peer.is_ipv6() { "[::]:0" } else { "0.0.0.0:0" };
    UdpSocket::bind(local)
        .await
        .with_context(|| format!("failed to bind {local}"))
}
