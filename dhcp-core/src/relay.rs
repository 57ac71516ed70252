//! Relay-agent packet rewriting (RFC 2131 §4.3.2's relay-agent step). Pure
//! transform, no sockets — the binary's select loop calls this once per
//! forwarded datagram.

use std::net::Ipv4Addr;

use crate::packet::{DhcpPacket, BOOTREQUEST};

/// Maximum `hops` before a message is considered looping and dropped.
pub const MAX_HOPS: u8 = 16;

/// Rewrite one packet for forwarding through the relay.
///
/// - Always increments `hops`; a packet that would exceed `MAX_HOPS` is
///   dropped (`None`) rather than forwarded, breaking relay loops.
/// - For client→server traffic (`op == BOOTREQUEST`) with `giaddr` unset,
///   stamps `giaddr` with the relay's own address so the server knows
///   where to route the reply.
/// - For server→client traffic, `giaddr` is left untouched: it already
///   names the relay that should receive the reply.
pub fn rewrite_for_forward(mut packet: DhcpPacket, relay_ip: Ipv4Addr) -> Option<DhcpPacket> {
    if packet.hops >= MAX_HOPS {
        return None;
    }
    packet.hops += 1;

    if packet.op == BOOTREQUEST && packet.giaddr == Ipv4Addr::UNSPECIFIED {
        packet.giaddr = relay_ip;
    }

    Some(packet)
}
