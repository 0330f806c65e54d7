//! Stream port assignment.
//!
//! A thread's port is `base + hash(thread_id) % range`, so a retried request
//! for the same thread reconnects to the same stream address. The table only
//! records which threads currently hold a port; it does not survive a restart.

use browser_agent_core::ThreadId;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};

pub struct PortAllocator {
    base: u16,
    range: u16,
    assigned: Mutex<HashMap<ThreadId, u16>>,
}

impl PortAllocator {
    pub fn new(base: u16, range: u16) -> Self {
        Self {
            base,
            range: range.max(1),
            assigned: Mutex::new(HashMap::new()),
        }
    }

    /// The port a thread maps to, whether or not it is currently allocated.
    pub fn port_for(&self, thread_id: &ThreadId) -> u16 {
        let digest = Sha256::digest(thread_id.as_str().as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let offset = u64::from_be_bytes(prefix) % u64::from(self.range);
        self.base.saturating_add(offset as u16)
    }

    pub fn allocate(&self, thread_id: &ThreadId) -> u16 {
        let port = self.port_for(thread_id);
        let mut assigned = self.assigned.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(other) = assigned
            .iter()
            .find(|(id, p)| **p == port && *id != thread_id)
            .map(|(id, _)| id.clone())
        {
            warn!(thread_id = %thread_id, other = %other, port, "Stream port collision");
        }
        assigned.insert(thread_id.clone(), port);
        debug!(thread_id = %thread_id, port, "Stream port allocated");
        port
    }

    /// Returns whether a mapping existed. Releasing twice is a no-op.
    pub fn release(&self, thread_id: &ThreadId) -> bool {
        let released = self
            .assigned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(thread_id)
            .is_some();
        if released {
            debug!(thread_id = %thread_id, "Stream port released");
        }
        released
    }

    pub fn get(&self, thread_id: &ThreadId) -> Option<u16> {
        self.assigned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(thread_id)
            .copied()
    }

    pub fn allocated_count(&self) -> usize {
        self.assigned.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

pub fn stream_url(port: u16) -> String {
    format!("ws://localhost:{}", port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_is_deterministic() {
        let ports = PortAllocator::new(9223, 1000);
        let t = ThreadId::from("thread-abc");
        let first = ports.allocate(&t);
        assert!(ports.release(&t));
        let second = ports.allocate(&t);
        assert_eq!(first, second);

        // a fresh allocator agrees
        assert_eq!(PortAllocator::new(9223, 1000).port_for(&t), first);
    }

    #[test]
    fn test_port_within_range() {
        let ports = PortAllocator::new(9223, 1000);
        for i in 0..200 {
            let port = ports.port_for(&ThreadId::from(format!("thread-{}", i)));
            assert!((9223..10223).contains(&port));
        }
    }

    #[test]
    fn test_distinct_threads_usually_get_distinct_ports() {
        let ports = PortAllocator::new(9223, 1000);
        let a = ports.allocate(&ThreadId::from("t1"));
        let b = ports.allocate(&ThreadId::from("t2"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_double_release_is_noop() {
        let ports = PortAllocator::new(9223, 1000);
        let t = ThreadId::from("t1");
        assert!(!ports.release(&t));
        ports.allocate(&t);
        assert!(ports.release(&t));
        assert!(!ports.release(&t));
        assert_eq!(ports.get(&t), None);
    }

    #[test]
    fn test_release_only_affects_own_thread() {
        let ports = PortAllocator::new(9223, 1000);
        let t1 = ThreadId::from("t1");
        let t2 = ThreadId::from("t2");
        ports.allocate(&t1);
        let p2 = ports.allocate(&t2);
        ports.release(&t1);
        assert_eq!(ports.get(&t2), Some(p2));
        assert_eq!(ports.allocated_count(), 1);
    }

    #[test]
    fn test_stream_url() {
        assert_eq!(stream_url(9300), "ws://localhost:9300");
    }
}
