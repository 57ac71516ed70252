//! DHCP option TLV model (RFC 2132), trimmed to the tags this system implements.

use std::net::Ipv4Addr;

/// DHCP option codes this system understands (RFC 2132 §6 subset).
pub const OPT_SUBNET_MASK: u8 = 1;
pub const OPT_ROUTER: u8 = 3;
pub const OPT_DNS_SERVER: u8 = 6;
pub const OPT_REQUESTED_IP: u8 = 50;
pub const OPT_LEASE_TIME: u8 = 51;
pub const OPT_MSG_TYPE: u8 = 53;
pub const OPT_SERVER_ID: u8 = 54;
pub const OPT_END: u8 = 255;
pub const OPT_PAD: u8 = 0;

/// DHCP message types (the subset this system emits/consumes).
pub const DHCPDISCOVER: u8 = 1;
pub const DHCPOFFER: u8 = 2;
pub const DHCPREQUEST: u8 = 3;
pub const DHCPACK: u8 = 5;
pub const DHCPRELEASE: u8 = 7;

/// A single option TLV. Codes outside the table above are kept as opaque
/// bytes so a decode/encode roundtrip never drops a byte, even though this
/// system only interprets the handful of codes it names above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpOption {
    pub code: u8,
    pub data: Vec<u8>,
}

impl DhcpOption {
    pub fn new(code: u8, data: Vec<u8>) -> Self {
        Self { code, data }
    }

    pub fn msg_type(t: u8) -> Self {
        Self::new(OPT_MSG_TYPE, vec![t])
    }

    pub fn server_id(ip: Ipv4Addr) -> Self {
        Self::new(OPT_SERVER_ID, ip.octets().to_vec())
    }

    pub fn requested_ip(ip: Ipv4Addr) -> Self {
        Self::new(OPT_REQUESTED_IP, ip.octets().to_vec())
    }

    pub fn lease_time(secs: u32) -> Self {
        Self::new(OPT_LEASE_TIME, secs.to_be_bytes().to_vec())
    }

    pub fn subnet_mask(mask: Ipv4Addr) -> Self {
        Self::new(OPT_SUBNET_MASK, mask.octets().to_vec())
    }

    pub fn router(ip: Ipv4Addr) -> Self {
        Self::new(OPT_ROUTER, ip.octets().to_vec())
    }

    pub fn dns_server(ip: Ipv4Addr) -> Self {
        Self::new(OPT_DNS_SERVER, ip.octets().to_vec())
    }

    /// Extract an IPv4 address from option data (requires exactly 4 bytes).
    pub fn as_ipv4(&self) -> Option<Ipv4Addr> {
        if self.data.len() == 4 {
            Some(Ipv4Addr::new(self.data[0], self.data[1], self.data[2], self.data[3]))
        } else {
            None
        }
    }

    /// Extract a u32 from option data (requires exactly 4 bytes, network order).
    pub fn as_u32(&self) -> Option<u32> {
        if self.data.len() == 4 {
            Some(u32::from_be_bytes([self.data[0], self.data[1], self.data[2], self.data[3]]))
        } else {
            None
        }
    }

    /// Extract a u8 from option data.
    pub fn as_u8(&self) -> Option<u8> {
        self.data.first().copied()
    }
}

/// Parse DHCP options from the TLV stream that follows the magic cookie.
///
/// `data` is the remainder of the 312-byte options area after the 4-byte
/// cookie (so bounds are checked against `data.len()`, i.e. up to 308 bytes).
/// A truncated or malformed tail terminates parsing without error — this is
/// RFC 2131's documented tolerance, not a defect.
pub fn parse_options(data: &[u8]) -> Vec<DhcpOption> {
    let mut options = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let code = data[i];
        if code == OPT_END {
            break;
        }
        if code == OPT_PAD {
            i += 1;
            continue;
        }

        i += 1;
        if i >= data.len() {
            break;
        }

        let len = data[i] as usize;
        i += 1;

        if i + len > data.len() {
            break;
        }

        options.push(DhcpOption::new(code, data[i..i + len].to_vec()));
        i += len;
    }

    options
}

/// Encode DHCP options back into TLV bytes, terminated by the END option.
/// Does not pad to the fixed options-area size; callers that need the fixed
/// 312-byte area pad the result themselves (see `packet::DhcpPacket::to_bytes`).
pub fn encode_options(options: &[DhcpOption]) -> Vec<u8> {
    let mut buf = Vec::new();
    for opt in options {
        buf.push(opt.code);
        buf.push(opt.data.len() as u8);
        buf.extend_from_slice(&opt.data);
    }
    buf.push(OPT_END);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_options() {
        let data = [53, 1, 1, 51, 4, 0, 0, 0, 20, 255];
        let opts = parse_options(&data);
        assert_eq!(opts.len(), 2);
        assert_eq!(opts[0].code, OPT_MSG_TYPE);
        assert_eq!(opts[0].as_u8(), Some(1));
        assert_eq!(opts[1].code, OPT_LEASE_TIME);
        assert_eq!(opts[1].as_u32(), Some(20));
    }

    #[test]
    fn pad_options_are_skipped() {
        let data = [0, 0, 53, 1, 2, 255];
        let opts = parse_options(&data);
        assert_eq!(opts.len(), 1);
        assert_eq!(opts[0].as_u8(), Some(2));
    }

    #[test]
    fn truncated_length_terminates_without_panic() {
        // code=51, claimed length=4, but only 1 byte follows.
        let data = [51, 4, 0];
        let opts = parse_options(&data);
        assert!(opts.is_empty());
    }

    #[test]
    fn truncated_code_terminates_without_panic() {
        let data = [51];
        let opts = parse_options(&data);
        assert!(opts.is_empty());
    }

    #[test]
    fn encode_roundtrip() {
        let opts = vec![
            DhcpOption::msg_type(DHCPOFFER),
            DhcpOption::lease_time(3600),
            DhcpOption::subnet_mask(Ipv4Addr::new(255, 255, 255, 0)),
        ];
        let bytes = encode_options(&opts);
        let decoded = parse_options(&bytes);
        assert_eq!(decoded, opts);
    }

    #[test]
    fn unknown_option_survives_roundtrip_opaque() {
        let opts = vec![DhcpOption::new(99, vec![1, 2, 3])];
        let bytes = encode_options(&opts);
        let decoded = parse_options(&bytes);
        assert_eq!(decoded, opts);
    }
}
