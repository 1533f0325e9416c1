//! Pong relay: a RakNet listener that echoes every session datagram.
//!
//! ```text
//! pong-relay [BIND_ADDR] [UPSTREAM_ADDR]
//! ```
//!
//! With an upstream address the relay advertises the upstream server's
//! pong (rewritten to carry the relay's ID). Otherwise it answers with a
//! fixed descriptor. `RAKGATE_CONFIG` may point at a JSON
//! `ListenerConfig`; missing fields keep their defaults. Log verbosity
//! follows `RUST_LOG` (default `info`).

use std::sync::Arc;

use rakgate::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_BIND: &str = "0.0.0.0:19132";

async fn load_config() -> Result<ListenerConfig, Box<dyn std::error::Error>> {
    match std::env::var("RAKGATE_CONFIG") {
        Ok(path) => {
            let raw = tokio::fs::read_to_string(&path).await?;
            let config = serde_json::from_str(&raw)?;
            tracing::info!(%path, "loaded listener config");
            Ok(config)
        }
        Err(_) => Ok(ListenerConfig::default()),
    }
}

/// Echoes datagrams back until the peer's session closes.
async fn echo(session: Arc<RawSession>) {
    let addr = session.remote_addr();
    tracing::info!(%addr, guid = session.client_guid(), mtu = session.mtu(), "session accepted");

    loop {
        match session.recv().await {
            Ok(Some(datagram)) => {
                if let Err(e) = session.send(&datagram).await {
                    tracing::warn!(%addr, error = %e, "echo failed");
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(%addr, error = %e, "receive failed");
                break;
            }
        }
    }

    tracing::info!(%addr, "session ended");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let bind = args.next().unwrap_or_else(|| DEFAULT_BIND.to_string());
    let upstream = args.next();

    let listener = Listener::builder()
        .bind(&bind)
        .config(load_config().await?)
        .listen()
        .await
        .map_err(RakgateError::from)?;

    match upstream {
        Some(upstream) => listener.hijack_pong(&upstream).await?,
        None => listener.set_pong_payload(format!(
            "MCPE;Rakgate relay;390;1.14.60;0;10;{};Rakgate;Survival;",
            listener.id()
        ))?,
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok(session) => {
                    tokio::spawn(echo(session));
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                    break;
                }
            },
        }
    }

    listener.close().await?;
    Ok(())
}
