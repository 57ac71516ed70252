//! DHCPv4 / BOOTP packet parser and serializer (RFC 2131).
//!
//! The wire layout is fixed: a 236-byte header followed by a 312-byte
//! options area (cookie + TLVs + padding), for an exact 548-byte message.
//! Fields are read/written byte-by-byte against a slice rather than
//! transmuted through a `#[repr(C)]` struct, so the layout is independent
//! of host alignment.

use std::net::Ipv4Addr;
use thiserror::Error;

use crate::options::{self, DhcpOption, OPT_MSG_TYPE, OPT_REQUESTED_IP, OPT_SERVER_ID};

/// DHCP magic cookie, the first four bytes of the options area.
pub const MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// Size of the fixed BOOTP header, in bytes.
pub const HEADER_LEN: usize = 236;
/// Size of the options area (cookie included), in bytes.
pub const OPTIONS_AREA_LEN: usize = 312;
/// Total wire size of a DHCP message.
pub const PACKET_LEN: usize = HEADER_LEN + OPTIONS_AREA_LEN;

#[derive(Error, Debug)]
pub enum DhcpParseError {
    #[error("packet too short: {0} bytes (minimum {HEADER_LEN})")]
    TooShort(usize),
    #[error("invalid magic cookie")]
    InvalidMagic,
}

/// A parsed DHCPv4 message.
#[derive(Debug, Clone, PartialEq)]
pub struct DhcpPacket {
    pub op: u8,
    pub htype: u8,
    pub hlen: u8,
    pub hops: u8,
    pub xid: u32,
    pub secs: u16,
    pub flags: u16,
    pub ciaddr: Ipv4Addr,
    pub yiaddr: Ipv4Addr,
    pub siaddr: Ipv4Addr,
    pub giaddr: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub sname: [u8; 64],
    pub file: [u8; 128],
    pub options: Vec<DhcpOption>,
}

/// `op` value for client→server messages.
pub const BOOTREQUEST: u8 = 1;
/// `op` value for server→client messages.
pub const BOOTREPLY: u8 = 2;

impl DhcpPacket {
    /// Parse a DHCP message from raw bytes. Accepts anything at least
    /// `HEADER_LEN + 4` bytes long (header plus the magic cookie); a buffer
    /// shorter than the full 548-byte wire size is tolerated by treating
    /// whatever options bytes are present as the complete options area —
    /// the TLV parser's own bounds check handles the rest.
    pub fn parse(data: &[u8]) -> Result<Self, DhcpParseError> {
        if data.len() < HEADER_LEN + MAGIC_COOKIE.len() {
            return Err(DhcpParseError::TooShort(data.len()));
        }

        if data[HEADER_LEN..HEADER_LEN + 4] != MAGIC_COOKIE {
            return Err(DhcpParseError::InvalidMagic);
        }

        let mut chaddr = [0u8; 16];
        chaddr.copy_from_slice(&data[28..44]);
        let mut sname = [0u8; 64];
        sname.copy_from_slice(&data[44..108]);
        let mut file = [0u8; 128];
        file.copy_from_slice(&data[108..236]);

        // TLVs start right after the cookie, and are bounds-checked by
        // parse_options against whatever remains of the options area (up
        // to OPTIONS_AREA_LEN - 4, the 312-byte area minus the cookie).
        let tlv_start = HEADER_LEN + 4;
        let tlv_end = (HEADER_LEN + OPTIONS_AREA_LEN).min(data.len());
        let options = if tlv_end > tlv_start {
            options::parse_options(&data[tlv_start..tlv_end])
        } else {
            vec![]
        };

        Ok(DhcpPacket {
            op: data[0],
            htype: data[1],
            hlen: data[2],
            hops: data[3],
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
            yiaddr: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
            siaddr: Ipv4Addr::new(data[20], data[21], data[22], data[23]),
            giaddr: Ipv4Addr::new(data[24], data[25], data[26], data[27]),
            chaddr,
            sname,
            file,
            options,
        })
    }

    /// Serialize to the exact 548-byte wire format.
    pub fn to_bytes(&self) -> [u8; PACKET_LEN] {
        let mut buf = [0u8; PACKET_LEN];

        buf[0] = self.op;
        buf[1] = self.htype;
        buf[2] = self.hlen;
        buf[3] = self.hops;
        buf[4..8].copy_from_slice(&self.xid.to_be_bytes());
        buf[8..10].copy_from_slice(&self.secs.to_be_bytes());
        buf[10..12].copy_from_slice(&self.flags.to_be_bytes());
        buf[12..16].copy_from_slice(&self.ciaddr.octets());
        buf[16..20].copy_from_slice(&self.yiaddr.octets());
        buf[20..24].copy_from_slice(&self.siaddr.octets());
        buf[24..28].copy_from_slice(&self.giaddr.octets());
        buf[28..44].copy_from_slice(&self.chaddr);
        buf[44..108].copy_from_slice(&self.sname);
        buf[108..236].copy_from_slice(&self.file);
        buf[236..240].copy_from_slice(&MAGIC_COOKIE);

        let opt_bytes = options::encode_options(&self.options);
        let tlv_start = HEADER_LEN + 4;
        let copy_len = opt_bytes.len().min(PACKET_LEN - tlv_start);
        buf[tlv_start..tlv_start + copy_len].copy_from_slice(&opt_bytes[..copy_len]);
        // Remaining bytes stay zero (OPT_PAD), matching an RFC 2131 sender.

        buf
    }

    /// MAC address as `aa:bb:cc:dd:ee:ff`, using `hlen` bytes of `chaddr`.
    pub fn mac_str(&self) -> String {
        let len = (self.hlen as usize).min(self.chaddr.len());
        self.chaddr[..len]
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Find an option by code.
    pub fn get_option(&self, code: u8) -> Option<&DhcpOption> {
        self.options.iter().find(|o| o.code == code)
    }

    /// DHCP message type (option 53), if present and well-formed.
    pub fn msg_type(&self) -> Option<u8> {
        self.get_option(OPT_MSG_TYPE)?.as_u8()
    }

    /// Requested IP (option 50), if present.
    pub fn requested_ip_option(&self) -> Option<Ipv4Addr> {
        self.get_option(OPT_REQUESTED_IP)?.as_ipv4()
    }

    /// Server identifier (option 54), if present.
    pub fn server_id(&self) -> Option<Ipv4Addr> {
        self.get_option(OPT_SERVER_ID)?.as_ipv4()
    }

    /// Whether the broadcast flag (bit 15 of `flags`) is set.
    pub fn is_broadcast(&self) -> bool {
        self.flags & 0x8000 != 0
    }

    /// Build a reply to this request, copying `xid`/`htype`/`hlen`/`chaddr`
    /// as every handler in §4.3 must.
    pub fn build_reply(
        &self,
        msg_type: u8,
        yiaddr: Ipv4Addr,
        siaddr: Ipv4Addr,
        ciaddr: Ipv4Addr,
        mut options: Vec<DhcpOption>,
    ) -> DhcpPacket {
        let mut opts = vec![DhcpOption::msg_type(msg_type)];
        opts.append(&mut options);

        DhcpPacket {
            op: BOOTREPLY,
            htype: self.htype,
            hlen: self.hlen,
            hops: 0,
            xid: self.xid,
            secs: 0,
            flags: self.flags,
            ciaddr,
            yiaddr,
            siaddr,
            giaddr: self.giaddr,
            chaddr: self.chaddr,
            sname: [0u8; 64],
            file: [0u8; 128],
            options: opts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::DHCPDISCOVER;

    fn make_discover() -> DhcpPacket {
        DhcpPacket {
            op: BOOTREQUEST,
            htype: 1,
            hlen: 6,
            hops: 0,
            xid: 0x1234_5678,
            secs: 0,
            flags: 0x8000,
            ciaddr: Ipv4Addr::UNSPECIFIED,
            yiaddr: Ipv4Addr::UNSPECIFIED,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: Ipv4Addr::UNSPECIFIED,
            chaddr: [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
            sname: [0u8; 64],
            file: [0u8; 128],
            options: vec![DhcpOption::msg_type(DHCPDISCOVER)],
        }
    }

    #[test]
    fn encode_is_exactly_548_bytes() {
        let pkt = make_discover();
        assert_eq!(pkt.to_bytes().len(), PACKET_LEN);
    }

    #[test]
    fn roundtrip_preserves_fields() {
        let pkt = make_discover();
        let bytes = pkt.to_bytes();
        let decoded = DhcpPacket::parse(&bytes).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn mac_str_formats_lowercase_hex() {
        let pkt = make_discover();
        assert_eq!(pkt.mac_str(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn rejects_bad_cookie() {
        let mut bytes = make_discover().to_bytes();
        bytes[HEADER_LEN] = 0;
        bytes[HEADER_LEN + 1] = 0;
        bytes[HEADER_LEN + 2] = 0;
        bytes[HEADER_LEN + 3] = 0;
        let err = DhcpPacket::parse(&bytes).unwrap_err();
        assert!(matches!(err, DhcpParseError::InvalidMagic));
    }

    #[test]
    fn rejects_too_short() {
        let err = DhcpPacket::parse(&[0u8; 100]).unwrap_err();
        assert!(matches!(err, DhcpParseError::TooShort(100)));
    }

    #[test]
    fn truncated_final_option_does_not_panic() {
        // A buffer shorter than the full 548-byte wire size: header, cookie,
        // one option tag, one length byte claiming 100 bytes of value that
        // never arrive. Bounds-checking must terminate cleanly here instead
        // of reading past the end of the slice.
        let mut bytes = make_discover().to_bytes()[..HEADER_LEN + 4].to_vec();
        bytes.push(51); // lease time tag
        bytes.push(100); // claimed length, but the buffer ends right here
        let decoded = DhcpPacket::parse(&bytes).unwrap();
        assert!(decoded.options.is_empty());
    }

    #[test]
    fn build_reply_copies_correlation_fields() {
        let req = make_discover();
        let reply = req.build_reply(
            2,
            Ipv4Addr::new(10, 0, 0, 5),
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::UNSPECIFIED,
            vec![],
        );
        assert_eq!(reply.op, BOOTREPLY);
        assert_eq!(reply.xid, req.xid);
        assert_eq!(reply.chaddr, req.chaddr);
        assert_eq!(reply.hlen, req.hlen);
        assert_eq!(reply.yiaddr, Ipv4Addr::new(10, 0, 0, 5));
    }
}
