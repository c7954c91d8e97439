use clap::Parser;
use pkg_constants::api::DEFAULT_HOST_URL;
use pkg_constants::paths::DEFAULT_PEER_CONFIG;
use pkg_constants::state::LEASE_TTL_MS;
use pkg_state::leader::{ElectionConfig, ElectionEngine};
use pkg_state::remote::RemoteMedium;
use pkg_types::config::{PeerConfigFile, load_config_file};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "tablock-peer", about = "tablock peer process")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_PEER_CONFIG)]
    config: String,

    /// Host API endpoint
    #[arg(long)]
    host: Option<String>,

    /// Lease time-to-live in milliseconds
    #[arg(long)]
    lease_ttl_ms: Option<u64>,

    /// On Ctrl-C, hand this peer's identity to the next peer that starts
    /// instead of releasing the lease
    #[arg(long)]
    handoff_on_exit: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let file_cfg: PeerConfigFile = load_config_file(&cli.config)?;
    let host = cli
        .host
        .or(file_cfg.host)
        .unwrap_or_else(|| DEFAULT_HOST_URL.to_string());
    let ttl_ms = cli
        .lease_ttl_ms
        .or(file_cfg.lease_ttl_ms)
        .unwrap_or(LEASE_TTL_MS);
    if ttl_ms == 0 {
        anyhow::bail!("lease TTL must be positive");
    }

    let origin = format!(
        "proc-{}-{}",
        std::process::id(),
        &Uuid::new_v4().simple().to_string()[..6]
    );
    info!("Starting tablock-peer {} against {}", origin, host);

    let medium = Arc::new(RemoteMedium::connect(&host, origin)?);
    let config = ElectionConfig::with_ttl(Duration::from_millis(ttl_ms));
    let handle = ElectionEngine::new(medium, config).await.start().await;
    info!(
        "Peer id {} (primary={})",
        handle.peer_id(),
        handle.is_primary()
    );

    let mut primary_rx = handle.subscribe();
    loop {
        tokio::select! {
            changed = primary_rx.changed() => {
                if changed.is_err() {
                    warn!("Election loop ended unexpectedly");
                    break;
                }
                let primary = *primary_rx.borrow_and_update();
                info!(
                    "Peer {} is {}",
                    handle.peer_id(),
                    if primary { "PRIMARY: authoritative writes enabled" } else { "passive" }
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }

    if cli.handoff_on_exit {
        let peer_id = handle.peer_id().to_string();
        if let Err(e) = handle.request_handoff(&peer_id).await {
            warn!("Handoff failed, releasing normally: {}", e);
        }
    }
    handle.stop().await?;
    Ok(())
}
