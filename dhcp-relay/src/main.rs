use std::net::{Ipv4Addr, SocketAddr};

use anyhow::{bail, Context, Result};
use dhcp_core::relay::rewrite_for_forward;
use dhcp_core::DhcpPacket;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

const RELAY_PORT: u16 = 67;
const CLIENT_PORT: u16 = 68;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .compact()
        .init();

    let server_ip = parse_server_ip_arg()?;
    let relay_ip = local_relay_ip(server_ip)?;
    info!("relay IP (stamped into giaddr): {}", relay_ip);

    let client_socket = bind_client_facing_socket()?;
    let server_socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .context("failed to bind server-facing socket")?;

    info!(
        "DHCP relay running: client-facing 0.0.0.0:{}, forwarding to {}:{}",
        RELAY_PORT, server_ip, RELAY_PORT
    );

    let mut client_buf = [0u8; 1500];
    let mut server_buf = [0u8; 1500];

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received, stopping");
                break;
            }
            result = client_socket.recv_from(&mut client_buf) => {
                let (len, src) = match result {
                    Ok(r) => r,
                    Err(e) => { warn!("client-facing recv error: {}", e); continue; }
                };
                forward(&client_buf[..len], src, &client_socket, &server_socket,
                        SocketAddr::new(server_ip.into(), RELAY_PORT), relay_ip, "client->server").await;
            }
            result = server_socket.recv_from(&mut server_buf) => {
                let (len, src) = match result {
                    Ok(r) => r,
                    Err(e) => { warn!("server-facing recv error: {}", e); continue; }
                };
                forward(&server_buf[..len], src, &server_socket, &client_socket,
                        SocketAddr::new(Ipv4Addr::BROADCAST.into(), CLIENT_PORT), relay_ip, "server->client").await;
            }
        }
    }

    Ok(())
}

/// Parse, rewrite, and forward one datagram. `recv_socket` is only used for
/// the source-address log line; `send_socket` carries the forwarded bytes.
async fn forward(
    data: &[u8],
    src: SocketAddr,
    _recv_socket: &UdpSocket,
    send_socket: &UdpSocket,
    dest: SocketAddr,
    relay_ip: Ipv4Addr,
    direction: &str,
) {
    let packet = match DhcpPacket::parse(data) {
        Ok(p) => p,
        Err(e) => {
            debug!("{}: dropping unparseable datagram from {}: {}", direction, src, e);
            return;
        }
    };

    let Some(forwarded) = rewrite_for_forward(packet, relay_ip) else {
        warn!("{}: dropping looping datagram from {} (hops limit reached)", direction, src);
        return;
    };

    if let Err(e) = send_socket.send_to(&forwarded.to_bytes(), dest).await {
        warn!("{}: failed to forward to {}: {}", direction, dest, e);
        return;
    }
    debug!("{}: relayed datagram from {} to {}", direction, src, dest);
}

fn bind_client_facing_socket() -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    let addr: SocketAddr = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), RELAY_PORT);
    socket
        .bind(&addr.into())
        .with_context(|| format!("failed to bind client-facing socket to {}", addr))?;
    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(socket.into())?)
}

fn parse_server_ip_arg() -> Result<Ipv4Addr> {
    let args: Vec<String> = std::env::args().collect();
    let Some(ip_arg) = args.get(1) else {
        bail!("usage: dhcp-relay <server-ip> [relay-ip]");
    };
    ip_arg
        .parse()
        .with_context(|| format!("invalid server IP: {}", ip_arg))
}

/// The relay's own IP stamped into `giaddr` for client-originated traffic.
/// Taken from an optional second CLI argument, falling back to the
/// `DHCP_RELAY_IP` environment variable, and finally to auto-detection from
/// the interface the kernel would route through to reach `server_ip`.
fn local_relay_ip(server_ip: Ipv4Addr) -> Result<Ipv4Addr> {
    if let Some(ip) = std::env::args().nth(2).and_then(|s| s.parse().ok()) {
        return Ok(ip);
    }
    if let Some(ip) = std::env::var("DHCP_RELAY_IP").ok().and_then(|s| s.parse().ok()) {
        return Ok(ip);
    }
    detect_bound_interface_ip(server_ip)
        .with_context(|| "failed to auto-detect relay IP; pass it as the second CLI argument")
}

/// Discover the local address the kernel would use to reach `server_ip`, by
/// `connect`ing a throwaway UDP socket and reading back its bound address.
/// `connect` on a datagram socket only consults the routing table (no
/// packet is sent), so this is a pure local query.
fn detect_bound_interface_ip(server_ip: Ipv4Addr) -> Result<Ipv4Addr> {
    let probe = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .context("failed to open interface-detection probe socket")?;
    probe
        .connect((server_ip, RELAY_PORT))
        .context("failed to route to server IP for interface detection")?;
    match probe.local_addr()?.ip() {
        std::net::IpAddr::V4(ip) => Ok(ip),
        std::net::IpAddr::V6(_) => bail!("unexpected IPv6 local address during interface detection"),
    }
}
