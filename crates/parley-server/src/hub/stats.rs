//! Hub counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the hub counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Sessions registered.
    pub registered: u64,
    /// Registrations that displaced an older session for the same user.
    pub replaced: u64,
    /// Registry entries removed by an unregister event.
    pub unregistered: u64,
    /// Sessions evicted because their outbound queue overflowed.
    pub evicted: u64,
    /// Envelopes handed to the router.
    pub routed: u64,
    /// Successful enqueues (echo copies included).
    pub delivered: u64,
    /// Envelopes whose receiver had no live session.
    pub dropped_offline: u64,
}

#[derive(Debug, Default)]
pub(crate) struct HubCounters {
    pub registered: AtomicU64,
    pub replaced: AtomicU64,
    pub unregistered: AtomicU64,
    pub evicted: AtomicU64,
    pub routed: AtomicU64,
    pub delivered: AtomicU64,
    pub dropped_offline: AtomicU64,
}

impl HubCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HubStats {
        HubStats {
            registered: self.registered.load(Ordering::Relaxed),
            replaced: self.replaced.load(Ordering::Relaxed),
            unregistered: self.unregistered.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            routed: self.routed.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped_offline: self.dropped_offline.load(Ordering::Relaxed),
        }
    }
}
