//! sluiced — reliable single-file transfer over UDP.
//!
//! `serve` answers requests for files under a root directory; `fetch`
//! requests one file from a server and writes it to a local path.

use std::path::PathBuf;

use anyhow::{Context, Result};

use sluice_core::config::SluiceConfig;

mod fetch;
mod serve;

fn print_usage() {
    println!("Usage: sluiced <command>");
    println!();
    println!("Commands:");
    println!("  serve [--port <port>] [--root <dir>]       Serve files from a directory");
    println!("  fetch <host> <port> <filename> <dest>      Fetch one file into <dest>");
    println!();
    println!("Configuration is read from $SLUICE_CONFIG or ~/.config/sluice/config.toml;");
    println!("SLUICE_* environment variables override the file.");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = SluiceConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = SluiceConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        SluiceConfig::default()
    });

    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse serve options
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                i += 1;
                config.network.listen_port = args
                    .get(i)
                    .context("--port requires a value")?
                    .parse()
                    .context("--port must be a number")?;
            }
            "--root" => {
                i += 1;
                config.serve.root = PathBuf::from(args.get(i).context("--root requires a value")?);
            }
            other => remaining.push(other),
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["serve"] => serve::run(&config).await,
        ["fetch", host, port, name, dest] => {
            let port: u16 = port.parse().context("port must be a number")?;
            fetch::run(&config, host, port, name, PathBuf::from(dest)).await
        }
        ["help"] | ["--help"] | ["-h"] | [] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
