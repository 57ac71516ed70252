//! Server-side lease table: the active set of (IP, hardware address,
//! expiration) tuples and the operations the message handlers need.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::info;

/// A single lease entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub ip: Ipv4Addr,
    pub chaddr: [u8; 16],
    pub lease_start: SystemTime,
    pub lease_expiration: SystemTime,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LeaseError {
    #[error("IP {0} is already leased")]
    AlreadyLeased(Ipv4Addr),
    #[error("no lease found for this client/IP pair")]
    NotFound,
}

/// In-memory lease table, keyed by IP with a secondary index by hardware
/// address. The pool is small (bounded by the configured range) so both
/// indexes cost nothing asymptotically interesting; `allocate` still walks
/// the range in ascending order exactly as a linear scan over a fixed-size
/// array would.
#[derive(Debug, Default)]
pub struct LeaseTable {
    by_ip: HashMap<Ipv4Addr, Lease>,
    by_chaddr: HashMap<[u8; 16], Ipv4Addr>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lowest IP in `[range_start, range_end]` not currently present in the
    /// table, or `None` if the pool is exhausted.
    pub fn allocate(&self, range_start: Ipv4Addr, range_end: Ipv4Addr) -> Option<Ipv4Addr> {
        let start = u32::from(range_start);
        let end = u32::from(range_end);
        (start..=end)
            .map(Ipv4Addr::from)
            .find(|ip| !self.by_ip.contains_key(ip))
    }

    /// Commit a new lease. Fails if `ip` is already present (invariant:
    /// lease IPs are unique).
    pub fn commit(
        &mut self,
        ip: Ipv4Addr,
        chaddr: [u8; 16],
        now: SystemTime,
        lease_duration: Duration,
    ) -> Result<(), LeaseError> {
        if self.by_ip.contains_key(&ip) {
            return Err(LeaseError::AlreadyLeased(ip));
        }
        let lease = Lease {
            ip,
            chaddr,
            lease_start: now,
            lease_expiration: now + lease_duration,
        };
        self.by_chaddr.insert(chaddr, ip);
        self.by_ip.insert(ip, lease);
        Ok(())
    }

    /// Extend the expiration of the lease matching both `chaddr` and
    /// `ciaddr`. Fails if no such lease exists.
    pub fn renew(
        &mut self,
        chaddr: [u8; 16],
        ciaddr: Ipv4Addr,
        now: SystemTime,
        lease_duration: Duration,
    ) -> Result<(), LeaseError> {
        let lease = self.by_ip.get_mut(&ciaddr).ok_or(LeaseError::NotFound)?;
        if lease.chaddr != chaddr {
            return Err(LeaseError::NotFound);
        }
        lease.lease_expiration = now + lease_duration;
        Ok(())
    }

    /// Remove the lease whose IP and hardware address both match.
    /// Idempotent: absence of a match is not an error.
    pub fn release(&mut self, chaddr: [u8; 16], yiaddr: Ipv4Addr) {
        if let Some(lease) = self.by_ip.get(&yiaddr) {
            if lease.chaddr == chaddr {
                self.by_ip.remove(&yiaddr);
                self.by_chaddr.remove(&chaddr);
            }
        }
    }

    /// Remove every entry whose expiration has passed. Returns the count
    /// removed, for the sweeper's log line.
    pub fn sweep(&mut self, now: SystemTime) -> usize {
        let expired: Vec<Ipv4Addr> = self
            .by_ip
            .iter()
            .filter(|(_, lease)| lease.lease_expiration < now)
            .map(|(ip, _)| *ip)
            .collect();

        for ip in &expired {
            if let Some(lease) = self.by_ip.remove(ip) {
                self.by_chaddr.remove(&lease.chaddr);
            }
        }

        if !expired.is_empty() {
            info!("swept {} expired lease(s)", expired.len());
        }
        expired.len()
    }

    pub fn get(&self, ip: Ipv4Addr) -> Option<&Lease> {
        self.by_ip.get(&ip)
    }

    pub fn get_by_chaddr(&self, chaddr: &[u8; 16]) -> Option<&Lease> {
        let ip = self.by_chaddr.get(chaddr)?;
        self.by_ip.get(ip)
    }

    pub fn len(&self) -> usize {
        self.by_ip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ip.is_empty()
    }
}
