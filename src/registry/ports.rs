//! Host port allocation for registry containers
//!
//! The used set is rebuilt from the live container list on every run, so it
//! covers every registry on the host, not only ksail-managed ones.
//! Concurrent ksail invocations can still race; that surfaces as a bind
//! error from the runtime and is accepted.

use std::collections::HashSet;

use anyhow::{bail, Result};

pub const AUTO_ALLOC_START: u16 = 5000;

pub struct PortAllocator {
    used: HashSet<u16>,
}

impl PortAllocator {
    pub fn new(used: HashSet<u16>) -> Self {
        Self { used }
    }

    /// Allocate a host port. A desired port already in use falls back to
    /// auto allocation from 5000 upward. The returned port is recorded as
    /// used for subsequent calls.
    pub fn allocate(&mut self, desired: Option<u16>) -> Result<u16> {
        if let Some(port) = desired {
            if !self.used.contains(&port) {
                self.used.insert(port);
                return Ok(port);
            }
        }
        let mut candidate = AUTO_ALLOC_START;
        loop {
            if !self.used.contains(&candidate) {
                self.used.insert(candidate);
                return Ok(candidate);
            }
            if candidate == u16::MAX {
                bail!("no free host port available for registry (5000-65535 all bound)");
            }
            candidate += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desired_port_respected() {
        let mut allocator = PortAllocator::new(HashSet::new());
        assert_eq!(allocator.allocate(Some(5001)).unwrap(), 5001);
    }

    #[test]
    fn test_desired_port_conflict_falls_back() {
        let mut allocator = PortAllocator::new(HashSet::from([5001, 5000]));
        assert_eq!(allocator.allocate(Some(5001)).unwrap(), 5002);
    }

    #[test]
    fn test_sequential_allocations_never_collide() {
        let mut allocator = PortAllocator::new(HashSet::new());
        let a = allocator.allocate(None).unwrap();
        let b = allocator.allocate(None).unwrap();
        assert_ne!(a, b);
        assert_eq!((a, b), (5000, 5001));
    }

    #[test]
    fn test_allocation_skips_used_set() {
        let used: HashSet<u16> = (5000..5010).collect();
        let mut allocator = PortAllocator::new(used.clone());
        let port = allocator.allocate(None).unwrap();
        assert!(!used.contains(&port));
        assert_eq!(port, 5010);
    }

    #[test]
    fn test_exhaustion_at_top_of_range() {
        // Used from 5000 through 65534: the last port wins.
        let used: HashSet<u16> = (5000..=65534).collect();
        let mut allocator = PortAllocator::new(used);
        assert_eq!(allocator.allocate(None).unwrap(), 65535);

        // Full through 65535: bind error.
        let used: HashSet<u16> = (5000..=65535).collect();
        let mut allocator = PortAllocator::new(used);
        assert!(allocator.allocate(None).is_err());
    }
}
