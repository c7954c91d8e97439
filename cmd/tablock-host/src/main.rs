use clap::Parser;
use pkg_api::server::{ServerConfig, start_server};
use pkg_constants::api::DEFAULT_HOST_PORT;
use pkg_constants::paths::{DEFAULT_HOST_CONFIG, DEFAULT_HOST_DATA_DIR};
use pkg_constants::state::LEASE_TTL_MS;
use pkg_state::leader::ElectionConfig;
use pkg_types::config::{HostConfigFile, load_config_file};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "tablock-host", about = "tablock shared-medium host")]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_HOST_CONFIG)]
    config: String,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Directory for SlateDB state storage
    #[arg(long)]
    data_dir: Option<String>,

    /// Number of in-host peers (tabs) to open at startup
    #[arg(long)]
    peers: Option<usize>,

    /// Lease time-to-live in milliseconds
    #[arg(long)]
    lease_ttl_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    // Load config file (returns defaults if file not found)
    let file_cfg: HostConfigFile = load_config_file(&cli.config)?;
    info!("Config file: {}", cli.config);

    // Merge: CLI args > config file > defaults
    let port = cli.port.or(file_cfg.port).unwrap_or(DEFAULT_HOST_PORT);
    let data_dir = cli
        .data_dir
        .or(file_cfg.data_dir)
        .unwrap_or_else(|| DEFAULT_HOST_DATA_DIR.to_string());
    let initial_peers = cli.peers.or(file_cfg.peers).unwrap_or(0);
    let ttl_ms = cli
        .lease_ttl_ms
        .or(file_cfg.lease_ttl_ms)
        .unwrap_or(LEASE_TTL_MS);
    if ttl_ms == 0 {
        anyhow::bail!("lease TTL must be positive");
    }
    let election = ElectionConfig::with_ttl(Duration::from_millis(ttl_ms));

    info!("Starting tablock-host");
    info!("  Port:      {}", port);
    info!("  Data dir:  {}", data_dir);
    info!("  Peers:     {}", initial_peers);
    info!(
        "  Lease:     ttl={}ms renew={}ms",
        ttl_ms,
        election.renew_interval.as_millis()
    );

    let config = ServerConfig {
        addr: SocketAddr::from(([127, 0, 0, 1], port)),
        data_dir,
        initial_peers,
        election,
    };

    start_server(config).await?;

    Ok(())
}
