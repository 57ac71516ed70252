//! Client state machine (RFC 2131 §4.4): INIT → SELECTING → REQUESTING →
//! BOUND → RENEWING → TERMINATED. Packet construction is kept pure (no
//! socket access) so transitions are unit-testable without binding a port.

use std::net::Ipv4Addr;

use dhcp_core::options::{self, DhcpOption};
use dhcp_core::packet::{DhcpPacket, BOOTREQUEST};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Init,
    Selecting,
    Requesting,
    Bound,
    Renewing,
    Terminated,
}

/// Everything the client remembers about its current lease, correlated by
/// `xid` exactly as the reference client does.
#[derive(Debug, Clone)]
pub struct ClientSession {
    pub state: ClientState,
    pub xid: u32,
    pub chaddr: [u8; 16],
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
}

impl ClientSession {
    pub fn new(xid: u32, chaddr: [u8; 16]) -> Self {
        Self {
            state: ClientState::Init,
            xid,
            chaddr,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
        }
    }

    fn skeleton(&self) -> DhcpPacket {
        DhcpPacket {
            op: BOOTREQUEST,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid: self.xid,
            secs: 0,
            flags: 0x8000,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: self.chaddr,
            sname: [0u8; 64],
            file: [0u8; 128],
            options: vec![],
        }
    }

    /// INIT → SELECTING: build and mark a DISCOVER sent.
    pub fn build_discover(&mut self) -> DhcpPacket {
        self.state = ClientState::Selecting;
        let mut pkt = self.skeleton();
        pkt.options = vec![DhcpOption::msg_type(options::DHCPDISCOVER)];
        pkt
    }

    /// SELECTING → REQUESTING, on a matching OFFER.
    pub fn build_request(&mut self, offer: &DhcpPacket) -> Option<DhcpPacket> {
        if offer.xid != self.xid || offer.msg_type() != Some(options::DHCPOFFER) {
            return None;
        }
        self.yiaddr = offer.yiaddr;
        self.siaddr = offer.siaddr;
        self.state = ClientState::Requesting;

        let mut pkt = self.skeleton();
        pkt.yiaddr = offer.yiaddr;
        pkt.options = vec![
            DhcpOption::msg_type(options::DHCPREQUEST),
            DhcpOption::requested_ip(offer.yiaddr),
        ];
        Some(pkt)
    }

    /// REQUESTING → BOUND, on a matching ACK.
    pub fn accept_ack(&mut self, ack: &DhcpPacket) -> bool {
        if ack.xid != self.xid || ack.msg_type() != Some(options::DHCPACK) {
            return false;
        }
        self.yiaddr = ack.yiaddr;
        self.siaddr = ack.siaddr;
        self.state = ClientState::Bound;
        true
    }

    /// BOUND → RENEWING, on lease timer expiry.
    pub fn build_renew(&mut self) -> DhcpPacket {
        self.state = ClientState::Renewing;
        let mut pkt = self.skeleton();
        pkt.ciaddr = self.yiaddr;
        pkt.yiaddr = self.yiaddr;
        pkt.options = vec![
            DhcpOption::msg_type(options::DHCPREQUEST),
            DhcpOption::server_id(self.siaddr),
        ];
        pkt
    }

    /// RENEWING → BOUND, on a matching ACK.
    pub fn accept_renew_ack(&mut self, ack: &DhcpPacket) -> bool {
        self.accept_ack(ack)
    }

    /// BOUND/RENEWING → TERMINATED, on user-triggered release.
    pub fn build_release(&mut self) -> DhcpPacket {
        self.state = ClientState::Terminated;
        let mut pkt = self.skeleton();
        pkt.yiaddr = self.yiaddr;
        pkt.options = vec![
            DhcpOption::msg_type(options::DHCPRELEASE),
            DhcpOption::server_id(self.siaddr),
        ];
        pkt
    }
}
