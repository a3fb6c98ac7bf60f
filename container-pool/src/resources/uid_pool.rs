use std::collections::BTreeSet;
use std::sync::Mutex;

use super::{PoolError, Result, UidPool};

/// A contiguous range `[start, start+size)` of host UIDs, each handed out at
/// most once at a time.
pub struct RangeUidPool {
    start: u32,
    size: usize,
    taken: Mutex<BTreeSet<u32>>,
}

impl RangeUidPool {
    pub fn new(start: u32, size: usize) -> Self {
        Self {
            start,
            size,
            taken: Mutex::new(BTreeSet::new()),
        }
    }
}

impl UidPool for RangeUidPool {
    fn acquire(&self) -> Result<u32> {
        let mut taken = self.taken.lock().unwrap();
        for uid in self.start..self.start + self.size as u32 {
            if taken.insert(uid) {
                return Ok(uid);
            }
        }
        Err(PoolError::Exhausted)
    }

    fn release(&self, uid: u32) {
        self.taken.lock().unwrap().remove(&uid);
    }

    fn remove(&self, uid: u32) -> Result<()> {
        let mut taken = self.taken.lock().unwrap();
        if taken.insert(uid) {
            Ok(())
        } else {
            Err(PoolError::AlreadyHeld(uid.to_string()))
        }
    }

    fn initial_size(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_from_start() {
        let pool = RangeUidPool::new(10000, 2);
        assert_eq!(pool.acquire().unwrap(), 10000);
        assert_eq!(pool.acquire().unwrap(), 10001);
        assert!(matches!(pool.acquire().unwrap_err(), PoolError::Exhausted));
    }

    #[test]
    fn release_frees_for_reuse() {
        let pool = RangeUidPool::new(10000, 1);
        let uid = pool.acquire().unwrap();
        pool.release(uid);
        assert_eq!(pool.acquire().unwrap(), uid);
    }

    #[test]
    fn remove_marks_taken_without_acquire() {
        let pool = RangeUidPool::new(10000, 3);
        pool.remove(10001).unwrap();
        assert!(pool.remove(10001).is_err());
        assert_eq!(pool.acquire().unwrap(), 10000);
        assert_eq!(pool.acquire().unwrap(), 10002);
    }
}
