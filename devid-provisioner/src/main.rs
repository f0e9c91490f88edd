use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::info;

use devid_provisioner::allowlist::Allowlist;
use devid_provisioner::config::ServerConfig;
use devid_provisioner::http::{router, ProvisionerState};
use devid_provisioner::session::SessionCache;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/tpm-provisioner/server.yaml".to_string());
    let config = ServerConfig::load(&config_path)
        .with_context(|| format!("loading configuration from {config_path}"))?;

    let allowlist = Allowlist::load(&config.allowlist_path).context("loading allowlist")?;
    let sessions = SessionCache::new(Duration::from_secs(config.session_lifetime_secs));

    let state = Arc::new(ProvisionerState {
        sessions,
        allowlist,
        manufacturer_roots: config.manufacturer_roots,
        provider_ca_der: config.provider_ca_der,
        provider_key: config.provider_key,
        spire_tokens_url: config.spire_tokens_url,
    });

    let reaper_state = state.clone();
    let reaper = tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(120)).await;
            let removed = reaper_state.sessions.reap_expired();
            if removed > 0 {
                info!("reaped {removed} expired session(s)");
            }
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper.abort();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
