use clap::{Parser, Subcommand};
use pkg_constants::api::DEFAULT_HOST_URL;
use pkg_types::handoff::HandoffRequest;
use pkg_types::peer::{HostInfo, LeaseView, PeerStatus, ReopenResponse};
use tracing::info;

#[derive(Parser)]
#[command(name = "tablockctl", about = "CLI tool for a tablock host")]
struct Cli {
    /// Host API endpoint
    #[arg(long, default_value = DEFAULT_HOST_URL)]
    host: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show host information
    Host {
        #[command(subcommand)]
        action: HostAction,
    },
    /// Inspect the primary lease
    Lease {
        #[command(subcommand)]
        action: LeaseAction,
    },
    /// Manage peers hosted in the host process
    Peer {
        #[command(subcommand)]
        action: PeerAction,
    },
    /// Designate the identity the next starting peer adopts
    Handoff {
        /// Peer id to hand off to
        target_id: String,
    },
}

#[derive(Subcommand)]
enum HostAction {
    /// Display host info
    Info,
}

#[derive(Subcommand)]
enum LeaseAction {
    /// Display the current lease
    Show,
}

#[derive(Subcommand)]
enum PeerAction {
    /// List hosted peers
    List,
    /// Open a new peer
    Open,
    /// Close a peer gracefully
    Close { instance: String },
    /// Kill a peer without cleanup
    Kill { instance: String },
    /// Continue a peer in a new tab, keeping its identity
    Reopen { instance: String },
}

fn fail(status: reqwest::StatusCode) -> ! {
    eprintln!("Error: host returned {}", status);
    std::process::exit(1);
}

fn print_peers(peers: &[PeerStatus]) {
    println!(
        "{:<14} {:<26} {:<10} {}",
        "INSTANCE", "PEER ID", "ROLE", "OPENED"
    );
    for peer in peers {
        println!(
            "{:<14} {:<26} {:<10} {}",
            peer.instance,
            peer.peer_id,
            if peer.primary { "primary" } else { "secondary" },
            peer.opened_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    if peers.is_empty() {
        println!("(no peers open)");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let base = cli.host.trim_end_matches('/').to_string();
    let client = reqwest::Client::builder().build()?;

    match &cli.command {
        Commands::Host { action } => match action {
            HostAction::Info => {
                info!("Querying host info from {}", base);
                let resp = client
                    .get(format!("{}/api/v1/host/info", base))
                    .send()
                    .await?;
                if !resp.status().is_success() {
                    fail(resp.status());
                }
                let info: HostInfo = resp.json().await?;
                println!("Host Endpoint:  {}", info.endpoint);
                println!("Version:        {}", info.version);
                println!("State Store:    {}", info.state_store);
                println!("Event Seq:      {}", info.event_seq);
                println!("Hosted Peers:   {}", info.peer_count);
            }
        },
        Commands::Lease { action } => match action {
            LeaseAction::Show => {
                let resp = client.get(format!("{}/api/v1/lease", base)).send().await?;
                if !resp.status().is_success() {
                    fail(resp.status());
                }
                let view: LeaseView = resp.json().await?;
                match &view.lease {
                    Some(lease) => {
                        println!("Holder:     {}", lease.holder_id);
                        println!("Renewed:    {}ms ago", view.age_ms.unwrap_or_default());
                        println!("TTL:        {}ms", view.ttl_ms);
                        println!("Stale:      {}", view.stale);
                    }
                    None => println!("(no lease held)"),
                }
            }
        },
        Commands::Peer { action } => match action {
            PeerAction::List => {
                let resp = client.get(format!("{}/api/v1/peers", base)).send().await?;
                if !resp.status().is_success() {
                    fail(resp.status());
                }
                let peers: Vec<PeerStatus> = resp.json().await?;
                print_peers(&peers);
            }
            PeerAction::Open => {
                let resp = client.post(format!("{}/api/v1/peers", base)).send().await?;
                if !resp.status().is_success() {
                    fail(resp.status());
                }
                let peer: PeerStatus = resp.json().await?;
                print_peers(std::slice::from_ref(&peer));
            }
            PeerAction::Close { instance } => {
                let resp = client
                    .delete(format!("{}/api/v1/peers/{}", base, instance))
                    .send()
                    .await?;
                if !resp.status().is_success() {
                    fail(resp.status());
                }
                println!("Closed {}", instance);
            }
            PeerAction::Kill { instance } => {
                let resp = client
                    .post(format!("{}/api/v1/peers/{}/kill", base, instance))
                    .send()
                    .await?;
                if !resp.status().is_success() {
                    fail(resp.status());
                }
                println!("Killed {} (lease left to expire)", instance);
            }
            PeerAction::Reopen { instance } => {
                let resp = client
                    .post(format!("{}/api/v1/peers/{}/reopen", base, instance))
                    .send()
                    .await?;
                if !resp.status().is_success() {
                    fail(resp.status());
                }
                let reopened: ReopenResponse = resp.json().await?;
                println!("Closed {}", reopened.closed);
                print_peers(std::slice::from_ref(&reopened.opened));
            }
        },
        Commands::Handoff { target_id } => {
            let resp = client
                .post(format!("{}/api/v1/handoff", base))
                .json(&HandoffRequest {
                    target_id: target_id.clone(),
                })
                .send()
                .await?;
            if !resp.status().is_success() {
                let status = resp.status();
                eprintln!("Error: host returned {}: {}", status, resp.text().await?);
                std::process::exit(1);
            }
            println!("Next peer to start will adopt id {}", target_id);
        }
    }

    Ok(())
}
