use std::collections::BTreeSet;
use std::sync::Mutex;

use super::{PoolError, PortPool, Result};

/// A contiguous range `[start, start+size)` of host ports, zero or more of
/// which may be held per container.
pub struct RangePortPool {
    start: u32,
    size: usize,
    taken: Mutex<BTreeSet<u32>>,
}

impl RangePortPool {
    pub fn new(start: u32, size: usize) -> Self {
        Self {
            start,
            size,
            taken: Mutex::new(BTreeSet::new()),
        }
    }
}

impl PortPool for RangePortPool {
    fn acquire(&self) -> Result<u32> {
        let mut taken = self.taken.lock().unwrap();
        for port in self.start..self.start + self.size as u32 {
            if taken.insert(port) {
                return Ok(port);
            }
        }
        Err(PoolError::Exhausted)
    }

    fn release(&self, port: u32) {
        self.taken.lock().unwrap().remove(&port);
    }

    fn remove(&self, port: u32) -> Result<()> {
        let mut taken = self.taken.lock().unwrap();
        if taken.insert(port) {
            Ok(())
        } else {
            Err(PoolError::AlreadyHeld(port.to_string()))
        }
    }

    fn initial_size(&self) -> usize {
        self.size
    }
}
