use std::collections::BTreeSet;
use std::sync::Mutex;

use super::{broadcast_address, parse_cidr, Network, PoolError, Result, SubnetPool};

/// Carves `/30` subnets out of a parent CIDR, handing out the first usable
/// address of each as the container's IP.
pub struct CidrSubnetPool {
    parent_addr: u32,
    parent_prefix: u8,
    subnet_prefix: u8,
    taken: Mutex<BTreeSet<u32>>,
}

impl CidrSubnetPool {
    pub fn new(parent_cidr: &str, subnet_prefix: u8) -> std::result::Result<Self, String> {
        let (addr, prefix) = parse_cidr(parent_cidr)?;
        if subnet_prefix < prefix || subnet_prefix > 32 {
            return Err(format!(
                "subnet prefix /{subnet_prefix} must be within parent /{prefix}"
            ));
        }
        Ok(Self {
            parent_addr: u32::from(addr),
            parent_prefix: prefix,
            subnet_prefix,
            taken: Mutex::new(BTreeSet::new()),
        })
    }

    fn subnet_count(&self) -> usize {
        1usize << (self.subnet_prefix - self.parent_prefix)
    }

    fn subnet_base(&self, index: u32) -> u32 {
        let block_size = 1u32 << (32 - self.subnet_prefix);
        self.parent_addr + index * block_size
    }

    fn network_for_base(&self, base: u32) -> Network {
        let ip = std::net::Ipv4Addr::from(base + 1);
        let subnet = format!(
            "{}/{}",
            std::net::Ipv4Addr::from(base),
            self.subnet_prefix
        );
        Network { ip, subnet }
    }

    fn index_of(&self, network: &Network) -> Result<u32> {
        let (addr, prefix) = parse_cidr(&network.subnet)
            .map_err(|e| PoolError::InvalidCidr(network.subnet.clone(), e))?;
        if prefix != self.subnet_prefix {
            return Err(PoolError::NotHeld(network.subnet.clone()));
        }
        let base = u32::from(addr);
        let block_size = 1u32 << (32 - self.subnet_prefix);
        if base < self.parent_addr {
            return Err(PoolError::NotHeld(network.subnet.clone()));
        }
        Ok((base - self.parent_addr) / block_size)
    }
}

impl SubnetPool for CidrSubnetPool {
    fn acquire(&self, requested: Option<&str>) -> Result<Network> {
        let mut taken = self.taken.lock().unwrap();

        if let Some(requested) = requested.filter(|s| !s.is_empty()) {
            let (addr, _prefix) =
                parse_cidr(requested).map_err(|e| PoolError::InvalidCidr(requested.to_string(), e))?;
            let block_size = 1u32 << (32 - self.subnet_prefix);
            let base = u32::from(addr) & !(block_size - 1);
            if base < self.parent_addr {
                return Err(PoolError::InvalidCidr(
                    requested.to_string(),
                    "outside parent range".to_string(),
                ));
            }
            let index = (base - self.parent_addr) / block_size;
            if index as usize >= self.subnet_count() {
                return Err(PoolError::InvalidCidr(
                    requested.to_string(),
                    "outside parent range".to_string(),
                ));
            }
            if !taken.insert(index) {
                return Err(PoolError::AlreadyHeld(requested.to_string()));
            }
            return Ok(self.network_for_base(self.subnet_base(index)));
        }

        for index in 0..self.subnet_count() as u32 {
            if taken.insert(index) {
                return Ok(self.network_for_base(self.subnet_base(index)));
            }
        }
        Err(PoolError::Exhausted)
    }

    fn release(&self, network: &Network) {
        if let Ok(index) = self.index_of(network) {
            self.taken.lock().unwrap().remove(&index);
        }
    }

    fn remove(&self, network: &Network) -> Result<()> {
        let index = self.index_of(network)?;
        let mut taken = self.taken.lock().unwrap();
        if taken.insert(index) {
            Ok(())
        } else {
            Err(PoolError::AlreadyHeld(network.subnet.clone()))
        }
    }

    fn initial_size(&self) -> usize {
        self.subnet_count()
    }
}
