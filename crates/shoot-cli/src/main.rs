use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

use shoot_core::config::{default_data_dir, KEY_INSTANCE_ID, KEY_OUTPUT_PATH};
use shoot_core::{Client, Identity, PeerId, RegistrySnapshot, ShootConfig, ShootPeer};
use storage::{LocalStorage, Preferences};
use transport_tcp::TcpOverlay;

type Node = Client<TcpOverlay, LocalStorage>;

const PREFERENCES_FILE: &str = "shoot.json";
const DISCOVERY_INTERVAL: Duration = Duration::from_secs(5);
const BROWSE_WINDOW: Duration = Duration::from_secs(3);

#[derive(Parser, Debug)]
#[command(name = "shoot", version, about = "Shoot files to peers on your network")]
struct Cli {
    /// Set log level: error,warn,info,debug,trace
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Directory holding preferences and the node key
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create preferences and a node key
    Init {
        /// Label shown to other peers (default user@hostname)
        #[arg(long)]
        instance_id: Option<String>,
    },

    /// Show node information
    Info,

    /// Read or change stored preferences
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List network interfaces
    Interfaces,

    /// Discover shoot nodes on the local network
    Discover {
        /// Discovery timeout in seconds
        #[arg(long, default_value_t = 5)]
        timeout: u64,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a node: greet peers, receive files, send on command
    Run {
        /// Port to listen on (default from preferences)
        #[arg(long)]
        port: Option<u16>,

        /// Output directory for received files (default from preferences)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Network interface to announce on
        #[arg(long)]
        interface: Option<String>,

        /// Skip mDNS announce/browse
        #[arg(long)]
        no_mdns: bool,

        /// Peer to dial at startup (host:port), repeatable
        #[arg(long)]
        connect: Vec<SocketAddr>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print one value
    Get { key: String },
    /// Store a value
    Set { key: String, value: String },
    /// Print every stored value
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    fmt()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .with_target(false)
        .init();

    // Determine data directory
    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let prefs_path = data_dir.join(PREFERENCES_FILE);

    match cli.cmd {
        Commands::Init { instance_id } => {
            let mut prefs = Preferences::open(&prefs_path)?;
            if let Some(id) = instance_id {
                prefs.set(KEY_INSTANCE_ID, &id)?;
            }
            let identity = Identity::load_or_generate(&mut prefs)?;
            let cfg = ShootConfig::from_preferences(&prefs, data_dir.clone())?;
            cfg.ensure_data_dir()?;

            println!("✓ Node initialized");
            print_info(&cfg, &identity);
        }

        Commands::Info => {
            if !prefs_path.exists() {
                anyhow::bail!("Node not initialized. Run 'shoot init' first.");
            }
            let mut prefs = Preferences::open(&prefs_path)?;
            let identity = Identity::load_or_generate(&mut prefs)?;
            let cfg = ShootConfig::from_preferences(&prefs, data_dir.clone())?;

            println!("Node Information:");
            print_info(&cfg, &identity);
        }

        Commands::Config { action } => {
            let mut prefs = Preferences::open(&prefs_path)?;
            match action {
                ConfigAction::Get { key } => println!("{}", prefs.get(&key, "")),
                ConfigAction::Set { key, value } => {
                    prefs.set(&key, &value)?;
                    println!("✓ {} = {}", key, value);
                }
                ConfigAction::List => {
                    for (key, value) in prefs.entries() {
                        // Never echo the node key.
                        if key != shoot_core::keys::KEY_PRIVATE_KEY {
                            println!("{} = {}", key, value);
                        }
                    }
                }
            }
        }

        Commands::Interfaces => {
            for item in mdns_core::net::list_interface_ips_result()? {
                let lo = if item.is_loopback { " (loopback)" } else { "" };
                println!("{:<12} {:<5} {}{}", item.name, item.family, item.ip, lo);
            }
        }

        Commands::Discover { timeout, json } => {
            let prefs = Preferences::open(&prefs_path)?;
            let cfg = ShootConfig::from_preferences(&prefs, data_dir.clone())?;
            discover_nodes(&cfg, timeout, json).await?;
        }

        Commands::Run { port, output, interface, no_mdns, connect } => {
            let mut prefs = Preferences::open(&prefs_path)?;
            let identity = Identity::load_or_generate(&mut prefs)?;
            let mut cfg = ShootConfig::from_preferences(&prefs, data_dir.clone())?;
            if let Some(port) = port {
                cfg.listen_port = port;
            }
            if output.is_some() {
                cfg.output_dir = output;
            }
            cfg.ensure_data_dir()?;

            run_node(identity, cfg, interface, !no_mdns, connect).await?;
        }
    }

    Ok(())
}

fn print_info(cfg: &ShootConfig, identity: &Identity) {
    println!("  Instance ID: {}", cfg.instance_id);
    println!("  Peer ID: {}", identity.peer_id());
    println!("  Fingerprint: {}", identity.fingerprint());
    match &cfg.output_dir {
        Some(dir) => println!("  Output directory: {}", dir.display()),
        None => println!("  Output directory: (not set, received files are refused; set '{}')", KEY_OUTPUT_PATH),
    }
    println!("  Listen port: {}", cfg.listen_port);
    println!("  Data directory: {}", cfg.data_dir.display());
}

async fn discover_nodes(cfg: &ShootConfig, timeout: u64, json: bool) -> Result<()> {
    let service_type = cfg.service_type.clone();
    let results = tokio::task::spawn_blocking(move || {
        mdns_core::discover::browse_blocking(&service_type, Duration::from_secs(timeout))
    })
    .await??;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        println!("Discovered {} node(s):", results.len());
        for svc in results {
            let instance = svc.txt_value(mdns_core::TXT_INSTANCE).unwrap_or("?");
            println!("\n  {} @ {}:{}", instance, svc.host_name, svc.port);
            if let Some(mid) = svc.txt_value(mdns_core::TXT_MID) {
                println!("    Peer ID: {}", mid);
            }
            for addr in &svc.addresses {
                println!("      - {}", addr);
            }
        }
    }

    Ok(())
}

async fn run_node(
    identity: Identity,
    cfg: ShootConfig,
    interface: Option<String>,
    mdns: bool,
    connect: Vec<SocketAddr>,
) -> Result<()> {
    let listen: SocketAddr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    let (overlay, events) = TcpOverlay::bind(identity, listen)
        .await
        .with_context(|| format!("Failed to listen on {}", listen))?;
    let port = overlay.local_addr().port();

    let client: Arc<Node> = Arc::new(Client::new(overlay.clone(), LocalStorage::new(), cfg.clone()));
    let runner = client.clone();
    tokio::spawn(async move { runner.run(events).await });
    tokio::spawn(print_registry(client.clone()));

    println!("✓ Running as {} ({})", cfg.instance_id, client.local_peer());
    println!("  Listening on port {}", port);
    match &cfg.output_dir {
        Some(dir) => println!("  Output directory: {}", dir.display()),
        None => println!("  Output directory not set; incoming files will be refused"),
    }

    for addr in connect {
        if let Err(e) = overlay.connect(addr).await {
            println!("✗ Could not connect to {}: {}", addr, e);
        }
    }

    // Held for the lifetime of the node.
    let _announcer = if mdns {
        let announcer = announce(&cfg, client.local_peer(), interface.as_deref(), port)?;
        tokio::spawn(discovery_loop(overlay.clone(), cfg.service_type.clone()));
        Some(announcer)
    } else {
        None
    };

    println!("  Commands: peers | send <peer> <path> | output <dir|none> | quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_command(&client, line.trim()).await {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    println!("Shutting down");
    Ok(())
}

fn announce(
    cfg: &ShootConfig,
    mid: PeerId,
    interface: Option<&str>,
    port: u16,
) -> Result<mdns_core::announce::Announcer> {
    use mdns_core::{announce::{instance_label, Announcer}, model::{ServiceAnnouncement, TxtRecord}};

    let ip = mdns_core::net::announce_ip(interface)?;
    let label = format!("{}-{}", instance_label(&cfg.instance_id), mid.short());
    let txt = vec![
        (mdns_core::TXT_MID.to_string(), mid.to_hex()),
        (mdns_core::TXT_INSTANCE.to_string(), cfg.instance_id.clone()),
    ];

    let ann = ServiceAnnouncement {
        service_type: cfg.service_type.clone(),
        instance_name: label.clone(),
        host_name: format!("{}.local.", label),
        ip_addr: ip.to_string(),
        port,
        txt: Some(TxtRecord(txt)),
    };

    let announcer = Announcer::register(ann)?;
    println!("✓ Announcing on {}:{}", ip, port);
    Ok(announcer)
}

/// Periodically browse mDNS and dial nodes we are not connected to.
async fn discovery_loop(overlay: Arc<TcpOverlay>, service_type: String) {
    use shoot_core::Overlay;

    let local = overlay.local_peer();
    loop {
        let st = service_type.clone();
        let found = tokio::task::spawn_blocking(move || {
            mdns_core::discover::browse_blocking(&st, BROWSE_WINDOW)
        })
        .await;

        match found {
            Ok(Ok(services)) => {
                for svc in services {
                    let Some(mid) = svc
                        .txt_value(mdns_core::TXT_MID)
                        .and_then(|hex| PeerId::from_hex(hex).ok())
                    else {
                        continue;
                    };
                    if mid == local || overlay.is_connected(&mid).await {
                        continue;
                    }
                    for addr in svc.socket_addrs() {
                        match overlay.connect(addr).await {
                            Ok(_) => break,
                            Err(e) => tracing::debug!("Dial {} failed: {}", addr, e),
                        }
                    }
                }
            }
            Ok(Err(e)) => tracing::warn!("mDNS browse failed: {:#}", e),
            Err(e) => tracing::warn!("mDNS browse task failed: {}", e),
        }

        tokio::time::sleep(DISCOVERY_INTERVAL).await;
    }
}

async fn print_registry(client: Arc<Node>) {
    let mut observer = client.registry().observe();
    while let Some(snapshot) = observer.next().await {
        if snapshot.version == 0 {
            continue;
        }
        print_peers(&snapshot);
    }
}

fn print_peers(snapshot: &RegistrySnapshot) {
    println!("Peers now: {}", snapshot.len());
    for (i, peer) in snapshot.sorted().iter().enumerate() {
        println!("  [{}] {}", i + 1, peer);
    }
}

/// Returns false when the node should stop.
async fn handle_command(client: &Node, line: &str) -> bool {
    let mut parts = line.splitn(3, ' ');
    match parts.next().unwrap_or("") {
        "" => {}
        "peers" => print_peers(&client.registry().current()),
        "send" => {
            let (Some(target), Some(path)) = (parts.next(), parts.next()) else {
                println!("usage: send <peer> <path>");
                return true;
            };
            match select_peer(&client.registry().current(), target) {
                Some(peer) => match client.send_file(&peer, Path::new(path.trim())).await {
                    Ok(receipt) => println!(
                        "→ {} ({} bytes) handed off to {}, nonce {}",
                        receipt.file_name, receipt.size, peer, receipt.nonce
                    ),
                    Err(e) => println!("✗ {}", e),
                },
                None => println!("✗ No unique peer matches '{}'", target),
            }
        }
        "output" => client.set_output_dir(output_dir_arg(line)).await,
        "quit" | "exit" => return false,
        other => println!("Unknown command '{}'", other),
    }
    true
}

/// Everything after the `output` keyword; `none` or nothing clears it.
fn output_dir_arg(line: &str) -> Option<PathBuf> {
    let rest = line.split_once(' ').map(|(_, rest)| rest.trim()).unwrap_or("");
    match rest {
        "" | "none" => None,
        dir => Some(PathBuf::from(dir)),
    }
}

/// Pick a peer by 1-based list index or by mid hex prefix.
fn select_peer(snapshot: &RegistrySnapshot, target: &str) -> Option<ShootPeer> {
    let peers = snapshot.sorted();
    if let Ok(index) = target.parse::<usize>() {
        if index >= 1 && index <= peers.len() {
            return Some(peers[index - 1].clone());
        }
    }
    let target = target.to_ascii_lowercase();
    let mut matches = peers.into_iter().filter(|p| p.mid().to_hex().starts_with(&target));
    match (matches.next(), matches.next()) {
        (Some(peer), None) => Some(peer),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoot_core::PeerHandle;

    fn snapshot() -> RegistrySnapshot {
        RegistrySnapshot::default()
            .with_peer(ShootPeer::new("bob@b", PeerHandle::new(PeerId([0xbb; 20]))))
            .with_peer(ShootPeer::new("amy@a", PeerHandle::new(PeerId([0xab; 20]))))
    }

    #[test]
    fn test_select_peer_by_index_and_prefix() {
        let snap = snapshot();
        assert_eq!(select_peer(&snap, "1").unwrap().display_name, "amy@a");
        assert_eq!(select_peer(&snap, "2").unwrap().display_name, "bob@b");
        assert_eq!(select_peer(&snap, "BBbb").unwrap().display_name, "bob@b");
        // Ambiguous, out of range, or unknown.
        assert!(select_peer(&snap, "").is_none());
        assert!(select_peer(&snap, "3").is_none());
        assert!(select_peer(&snap, "cc").is_none());
    }

    #[test]
    fn test_output_dir_keeps_spaces() {
        assert_eq!(
            output_dir_arg("output /home/me/My Downloads/shoot"),
            Some(PathBuf::from("/home/me/My Downloads/shoot"))
        );
        assert_eq!(output_dir_arg("output none"), None);
        assert_eq!(output_dir_arg("output"), None);
    }
}
