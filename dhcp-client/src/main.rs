mod state;

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use dhcp_core::DhcpPacket;
use rand::Rng;
use socket2::{Domain, Protocol, Socket, Type};
use state::ClientSession;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time;
use tracing::{info, warn};

const CLIENT_PORT: u16 = 68;
const SERVER_PORT: u16 = 67;
const LEASE_TIME_SECS: u64 = 20;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .compact()
        .init();

    let bind_interface = parse_interface_arg();
    let socket = bind_client_socket(bind_interface.as_deref())?;

    let xid: u32 = rand::rng().random();
    let chaddr = random_chaddr();
    let mut session = ClientSession::new(xid, chaddr);

    let (release_tx, mut release_rx) = mpsc::channel(1);
    tokio::spawn(watch_stdin_for_release(release_tx));

    info!("sending DHCPDISCOVER (xid={:#010x})", xid);
    let discover = session.build_discover();
    socket
        .send_to(&discover.to_bytes(), broadcast_addr(SERVER_PORT))
        .await?;

    let mut buf = [0u8; 1500];

    // SELECTING: block for the matching OFFER.
    loop {
        let (len, _src) = socket.recv_from(&mut buf).await?;
        let Ok(offer) = DhcpPacket::parse(&buf[..len]) else { continue };
        if let Some(request) = session.build_request(&offer) {
            info!("received DHCPOFFER for {}, sending DHCPREQUEST", offer.yiaddr);
            socket
                .send_to(&request.to_bytes(), broadcast_addr(SERVER_PORT))
                .await?;
            break;
        }
    }

    // REQUESTING: block for the matching ACK.
    loop {
        let (len, _src) = socket.recv_from(&mut buf).await?;
        let Ok(ack) = DhcpPacket::parse(&buf[..len]) else { continue };
        if session.accept_ack(&ack) {
            info!("bound to {}", session.yiaddr);
            break;
        }
    }

    println!("Press SPACE then Enter to release the IP address");

    // BOUND / RENEWING: drive the lease timer, incoming ACKs, and the
    // release trigger from one select loop. No busy polling: every branch
    // here is a genuine suspension point.
    let mut lease_timer = time::interval(Duration::from_secs(LEASE_TIME_SECS));
    lease_timer.tick().await; // first tick fires immediately, arm the real interval

    loop {
        tokio::select! {
            _ = lease_timer.tick() => {
                info!("lease timer expired, sending DHCPREQUEST (renew)");
                let renew = session.build_renew();
                socket.send_to(&renew.to_bytes(), SocketAddr::new(session.siaddr.into(), SERVER_PORT)).await?;

                match socket.recv_from(&mut buf).await {
                    Ok((len, _)) => {
                        if let Ok(ack) = DhcpPacket::parse(&buf[..len]) {
                            if session.accept_renew_ack(&ack) {
                                info!("lease renewed for {}", session.yiaddr);
                            } else {
                                warn!("renew response did not match, keeping current lease");
                            }
                        }
                    }
                    Err(e) => warn!("renew recv error: {}", e),
                }
            }
            Some(()) = release_rx.recv() => {
                info!("user requested release of {}", session.yiaddr);
                let release = session.build_release();
                socket.send_to(&release.to_bytes(), broadcast_addr(SERVER_PORT)).await?;
                info!("client terminating");
                break;
            }
        }
    }

    Ok(())
}

fn broadcast_addr(port: u16) -> SocketAddr {
    SocketAddr::new(Ipv4Addr::BROADCAST.into(), port)
}

fn bind_client_socket(bind_interface: Option<&str>) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;

    let addr: SocketAddr = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), CLIENT_PORT);
    socket
        .bind(&addr.into())
        .with_context(|| format!("failed to bind client socket to {}", addr))?;

    #[cfg(target_os = "linux")]
    if let Some(iface) = bind_interface {
        socket.bind_device(Some(iface.as_bytes()))?;
        info!("bound to interface {}", iface);
    }
    #[cfg(not(target_os = "linux"))]
    let _ = bind_interface;

    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(socket.into())?)
}

fn parse_interface_arg() -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--interface" {
            return args.get(i + 1).cloned();
        }
        if let Some(iface) = args[i].strip_prefix("--interface=") {
            return Some(iface.to_string());
        }
    }
    None
}

fn random_chaddr() -> [u8; 16] {
    let mut chaddr = [0u8; 16];
    rand::rng().fill(&mut chaddr[0..6]);
    chaddr
}

/// Out-of-core terminal collaborator: reads lines from stdin on a blocking
/// task and forwards a release trigger when the user types "release" or a
/// bare space, matching the reference client's spacebar prompt without
/// needing raw terminal mode.
async fn watch_stdin_for_release(tx: mpsc::Sender<()>) {
    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("release") {
            let _ = tx.send(()).await;
            return;
        }
    }
}
