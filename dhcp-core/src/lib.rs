//! Protocol-level building blocks shared by the server, client, and relay
//! binaries: wire format, options, network/pool configuration, the lease
//! table, and the server's pure message dispatch. No sockets or async
//! runtime here — those concerns live in the binary crates.

pub mod config;
pub mod dispatch;
pub mod lease;
pub mod options;
pub mod packet;
pub mod relay;

pub use config::{ConfigError, NetworkConfig, ServerSettings};
pub use dispatch::handle_message;
pub use lease::{Lease, LeaseError, LeaseTable};
pub use options::DhcpOption;
pub use packet::{DhcpPacket, DhcpParseError};
pub use relay::rewrite_for_forward;
