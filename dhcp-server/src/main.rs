use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use dhcp_core::{DhcpPacket, LeaseTable, NetworkConfig, ServerSettings};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::time;
use tracing::{debug, info, warn};

type SharedLeases = Arc<Mutex<LeaseTable>>;

const SERVER_PORT: u16 = 67;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .compact()
        .init();

    let config_path = parse_config_path();
    let settings = load_settings(&config_path)?;
    let net = settings
        .network_config()
        .context("invalid network configuration")?;
    info!(
        "serving {}/{} pool [{}, {}], lease {}s",
        net.network,
        net.prefix,
        net.range_start,
        net.range_end,
        net.lease_duration.as_secs()
    );

    let server_ip = net.gateway;
    let socket = Arc::new(bind_server_socket(settings.bind_interface.as_deref())?);
    let leases: SharedLeases = Arc::new(Mutex::new(LeaseTable::new()));

    let sweeper_leases = leases.clone();
    tokio::spawn(async move {
        sweep_loop(sweeper_leases).await;
    });

    let worker_count = settings.worker_count.clamp(1, 3);
    info!("starting {} dispatch worker(s)", worker_count);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut workers = Vec::with_capacity(worker_count);
    for id in 0..worker_count {
        let socket = socket.clone();
        let leases = leases.clone();
        let net = net.clone();
        let shutdown_rx = shutdown_rx.clone();
        workers.push(tokio::spawn(async move {
            recv_loop(id, socket, leases, net, server_ip, shutdown_rx).await;
        }));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, stopping new work and draining in-flight dispatches");
    let _ = shutdown_tx.send(true);

    for worker in workers {
        let _ = worker.await;
    }
    info!("all workers stopped, exiting");

    Ok(())
}

fn load_settings(path: &PathBuf) -> Result<ServerSettings> {
    let mut settings = if !path.exists() {
        info!("no config file at {}, using defaults", path.display());
        ServerSettings::default()
    } else {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&raw).with_context(|| "failed to parse config file")?
    };

    if let Ok(cidr) = std::env::var("DHCP_CIDR") {
        info!("DHCP_CIDR override: {}", cidr);
        settings.cidr = cidr;
    }
    if let Ok(secs) = std::env::var("DHCP_LEASE_SECS") {
        let secs: u64 = secs
            .parse()
            .with_context(|| format!("invalid DHCP_LEASE_SECS value: {}", secs))?;
        info!("DHCP_LEASE_SECS override: {}", secs);
        settings.lease_duration_secs = secs;
    }

    Ok(settings)
}

fn parse_config_path() -> PathBuf {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--config" {
            if let Some(path) = args.get(i + 1) {
                return PathBuf::from(path);
            }
        }
        if let Some(path) = args[i].strip_prefix("--config=") {
            return PathBuf::from(path);
        }
    }
    PathBuf::from("/etc/dhcp-server/config.toml")
}

fn bind_server_socket(bind_interface: Option<&str>) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;

    let addr: SocketAddr = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), SERVER_PORT);
    socket.bind(&addr.into())?;

    #[cfg(target_os = "linux")]
    if let Some(iface) = bind_interface {
        socket.bind_device(Some(iface.as_bytes()))?;
        info!("bound to interface {}", iface);
    }
    #[cfg(not(target_os = "linux"))]
    let _ = bind_interface;

    socket.set_nonblocking(true)?;
    info!("listening on 0.0.0.0:{}", SERVER_PORT);
    Ok(UdpSocket::from_std(socket.into())?)
}

async fn recv_loop(
    worker_id: usize,
    socket: Arc<UdpSocket>,
    leases: SharedLeases,
    net: NetworkConfig,
    server_ip: Ipv4Addr,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = [0u8; 1500];
    loop {
        let (len, src) = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!("worker {}: shutdown signal observed, stopping", worker_id);
                break;
            }
            result = socket.recv_from(&mut buf) => match result {
                Ok(r) => r,
                Err(e) => {
                    warn!("worker {}: recv error: {}", worker_id, e);
                    continue;
                }
            },
        };

        let packet = match DhcpPacket::parse(&buf[..len]) {
            Ok(p) => p,
            Err(e) => {
                debug!("worker {}: invalid packet from {}: {}", worker_id, src, e);
                continue;
            }
        };

        if packet.op != dhcp_core::packet::BOOTREQUEST {
            continue;
        }

        let response = {
            let mut table = leases.lock().await;
            dhcp_core::handle_message(&packet, &net, &mut table, server_ip, SystemTime::now())
        };

        let Some(response) = response else { continue };
        // Always reply to the datagram's source, never broadcast. When a
        // relay is in the path that source is the relay itself; broadcasting
        // onward to the client is the relay's job, not the server's.
        if let Err(e) = socket.send_to(&response.to_bytes(), src).await {
            warn!("worker {}: failed to send reply to {}: {}", worker_id, src, e);
        }
    }
}

async fn sweep_loop(leases: SharedLeases) {
    let mut ticker = time::interval(Duration::from_secs(1));
    loop {
        ticker.tick().await;
        let removed = leases.lock().await.sweep(SystemTime::now());
        if removed > 0 {
            debug!("sweeper removed {} expired lease(s)", removed);
        }
    }
}
