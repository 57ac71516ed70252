//! Network/pool configuration, computed once at startup from a CIDR string.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid CIDR notation: {0}")]
    InvalidCidr(String),
    #[error("CIDR prefix must be <= 24 (got /{0}); a narrower network leaves no room for a pool")]
    PrefixTooNarrow(u8),
    #[error("pool range [{0}, {1}] is empty or inverted")]
    EmptyPool(Ipv4Addr, Ipv4Addr),
    #[error("pool range [{0}, {1}] does not fit inside the /{2} network")]
    PoolOutsideNetwork(Ipv4Addr, Ipv4Addr, u8),
}

/// Network parameters derived from a CIDR string plus a pool window within
/// that network. Computed once at startup and treated as immutable
/// afterward: there is no hot-reload path, a restart is already a full
/// reset since leases aren't persisted.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub network: Ipv4Addr,
    pub prefix: u8,
    pub netmask: Ipv4Addr,
    pub broadcast: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub range_start: Ipv4Addr,
    pub range_end: Ipv4Addr,
    pub dns_server: Ipv4Addr,
    pub lease_duration: Duration,
}

impl NetworkConfig {
    /// Derive network/mask/broadcast/gateway from `cidr` and carve a pool
    /// of `pool_size` addresses starting `pool_offset` hosts past the
    /// network address (the reference server uses offset 2, size 10).
    ///
    /// A `/32` or any prefix narrower than 24 is rejected: a degenerate
    /// single-address network leaves no room for a pool and a gateway, and
    /// silently accepting it (as the historical default CIDR did) just
    /// defers the failure to the first DISCOVER.
    pub fn from_cidr(
        cidr: &str,
        pool_offset: u32,
        pool_size: u32,
        dns_server: Ipv4Addr,
        lease_duration: Duration,
    ) -> Result<Self, ConfigError> {
        let (addr_str, prefix_str) = cidr
            .split_once('/')
            .ok_or_else(|| ConfigError::InvalidCidr(cidr.to_string()))?;
        let addr: Ipv4Addr = addr_str
            .parse()
            .map_err(|_| ConfigError::InvalidCidr(cidr.to_string()))?;
        let prefix: u8 = prefix_str
            .parse()
            .map_err(|_| ConfigError::InvalidCidr(cidr.to_string()))?;
        if prefix > 32 {
            return Err(ConfigError::InvalidCidr(cidr.to_string()));
        }
        if prefix > 24 {
            return Err(ConfigError::PrefixTooNarrow(prefix));
        }

        let mask_bits: u32 = if prefix == 0 { 0 } else { !0u32 << (32 - prefix) };
        let netmask = Ipv4Addr::from(mask_bits);
        let network = Ipv4Addr::from(u32::from(addr) & mask_bits);
        let broadcast = Ipv4Addr::from(u32::from(network) | !mask_bits);
        let gateway = Ipv4Addr::from(u32::from(network) + 1);

        let range_start = Ipv4Addr::from(u32::from(network) + pool_offset);
        if pool_size == 0 {
            return Err(ConfigError::EmptyPool(range_start, range_start));
        }
        let range_end = Ipv4Addr::from(u32::from(range_start) + pool_size - 1);

        if u32::from(range_end) < u32::from(range_start) {
            return Err(ConfigError::EmptyPool(range_start, range_end));
        }
        if u32::from(range_end) > u32::from(broadcast) || u32::from(range_start) <= u32::from(network) {
            return Err(ConfigError::PoolOutsideNetwork(range_start, range_end, prefix));
        }

        Ok(NetworkConfig {
            network,
            prefix,
            netmask,
            broadcast,
            gateway,
            range_start,
            range_end,
            dns_server,
            lease_duration,
        })
    }

    pub fn ip_in_pool(&self, ip: Ipv4Addr) -> bool {
        let ip = u32::from(ip);
        ip >= u32::from(self.range_start) && ip <= u32::from(self.range_end)
    }
}

/// On-disk server settings (TOML), with the defaults the reference
/// implementation used baked in so an empty/missing config file still
/// produces a runnable server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub cidr: String,
    pub pool_offset: u32,
    pub pool_size: u32,
    pub dns_server: String,
    pub lease_duration_secs: u64,
    pub worker_count: usize,
    pub bind_interface: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            cidr: "192.17.0.0/24".to_string(),
            pool_offset: 2,
            pool_size: 10,
            dns_server: "8.8.8.8".to_string(),
            lease_duration_secs: 20,
            worker_count: 1,
            bind_interface: None,
        }
    }
}

impl ServerSettings {
    pub fn network_config(&self) -> Result<NetworkConfig, ConfigError> {
        let dns_server: Ipv4Addr = self
            .dns_server
            .parse()
            .map_err(|_| ConfigError::InvalidCidr(self.dns_server.clone()))?;
        NetworkConfig::from_cidr(
            &self.cidr,
            self.pool_offset,
            self.pool_size,
            dns_server,
            Duration::from_secs(self.lease_duration_secs),
        )
    }
}
