//! Resource pool interfaces (UID, subnet, port) and the `Network`/`Resources`
//! values a container holds out of them while it is alive.
//!
//! The pools themselves are specified only by this trait surface; the
//! in-memory reference implementations in this module exist so the pool
//! (and its tests) are runnable without host privileges. A production
//! deployment is expected to supply its own implementations backed by the
//! real host UID range, subnet allocator and port allocator.
mod port_pool;
mod subnet_pool;
mod uid_pool;

pub use port_pool::RangePortPool;
pub use subnet_pool::CidrSubnetPool;
pub use uid_pool::RangeUidPool;

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("pool exhausted")]
    Exhausted,
    #[error("value {0} is not held by this pool")]
    NotHeld(String),
    #[error("value {0} is already held by this pool")]
    AlreadyHeld(String),
    #[error("invalid CIDR {0:?}: {1}")]
    InvalidCidr(String, String),
}

type Result<T> = std::result::Result<T, PoolError>;

/// A pool of host user IDs, two of which (`user_uid`, `root_uid`) are held
/// per unprivileged container.
pub trait UidPool: Send + Sync {
    fn acquire(&self) -> Result<u32>;
    fn release(&self, uid: u32);
    /// Marks `uid` as already taken, e.g. when reconstructing from a snapshot.
    fn remove(&self, uid: u32) -> Result<()>;
    fn initial_size(&self) -> usize;
}

/// A pool of `/30`-style subnets, one of which is held per container.
pub trait SubnetPool: Send + Sync {
    /// `requested` is an optional caller-supplied CIDR; `None` means "any".
    fn acquire(&self, requested: Option<&str>) -> Result<Network>;
    fn release(&self, network: &Network);
    fn remove(&self, network: &Network) -> Result<()>;
    fn initial_size(&self) -> usize;
}

/// A pool of host ports, zero or more of which may be held per container.
pub trait PortPool: Send + Sync {
    fn acquire(&self) -> Result<u32>;
    fn release(&self, port: u32);
    fn remove(&self, port: u32) -> Result<()>;
    fn initial_size(&self) -> usize;
}

/// The `(ip, subnet)` pair allocated to a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Network {
    #[serde(rename = "IP")]
    pub ip: Ipv4Addr,
    /// CIDR notation, e.g. `10.2.0.0/30`.
    pub subnet: String,
}

impl Network {
    pub fn prefix_len(&self) -> Result<u8> {
        self.subnet
            .split('/')
            .nth(1)
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| PoolError::InvalidCidr(self.subnet.clone(), "missing prefix length".into()))
    }

    /// The host-side IP of the `/30`: the subnet's broadcast address minus one.
    ///
    /// `host_ip` derivation is delegated to the subnet pool that produced
    /// this `Network` (see resources/subnet_pool.rs); this helper is the
    /// canonical definition the reference pool uses, kept here because the
    /// `/30` convention is part of the `Network` contract, not an
    /// implementation detail of one pool.
    pub fn host_ip(&self) -> Result<Ipv4Addr> {
        let (network_addr, prefix) = parse_cidr(&self.subnet)
            .map_err(|e| PoolError::InvalidCidr(self.subnet.clone(), e))?;
        let broadcast = broadcast_address(network_addr, prefix);
        Ok(Ipv4Addr::from(u32::from(broadcast) - 1))
    }
}

/// Resources held out of the pools on behalf of one live container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resources {
    pub user_uid: u32,
    pub root_uid: u32,
    pub network: Network,
    pub ports: Vec<u32>,
}

pub(crate) fn parse_cidr(cidr: &str) -> std::result::Result<(Ipv4Addr, u8), String> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| "missing '/'".to_string())?;
    let addr: Ipv4Addr = addr.parse().map_err(|e| format!("{e}"))?;
    let prefix: u8 = prefix.parse().map_err(|e| format!("{e}"))?;
    if prefix > 32 {
        return Err("prefix length out of range".to_string());
    }
    Ok((addr, prefix))
}

pub(crate) fn broadcast_address(network_addr: Ipv4Addr, prefix: u8) -> Ipv4Addr {
    let mask: u32 = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    };
    let base = u32::from(network_addr) & mask;
    Ipv4Addr::from(base | !mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_ip_is_broadcast_minus_one() {
        let network = Network {
            ip: "10.2.0.1".parse().unwrap(),
            subnet: "10.2.0.0/30".to_string(),
        };
        assert_eq!(network.host_ip().unwrap(), "10.2.0.2".parse::<Ipv4Addr>().unwrap());
    }

    #[test]
    fn host_ip_for_wider_subnet() {
        let network = Network {
            ip: "10.3.0.2".parse().unwrap(),
            subnet: "10.3.0.0/29".to_string(),
        };
        assert_eq!(network.host_ip().unwrap(), "10.3.0.6".parse::<Ipv4Addr>().unwrap());
    }
}
