//! Lightweight counters mirroring the Progress Record, exposed for
//! observability. Gated behind the `metrics` feature the way
//! `ethrex-p2p`'s own metrics module is gated behind its `metrics` feature
//! and the optional `ethrex-metrics`/`prometheus` dependencies — this core
//! keeps the same shape without pulling in a registry dependency.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct SyncMetrics {
    pub consumed: AtomicU64,
    pub saved_nodes: AtomicU64,
    pub requested: AtomicU64,
    pub db_checks: AtomicU64,
}

impl SyncMetrics {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    pub fn record_saved_node(&self) {
        self.saved_nodes.fetch_add(1, Ordering::Relaxed);
    }

    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    pub fn record_requested(&self, count: u64) {
        self.requested.fetch_add(count, Ordering::Relaxed);
    }

    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    pub fn record_db_check(&self) {
        self.db_checks.fetch_add(1, Ordering::Relaxed);
    }

    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    pub fn set_consumed(&self, value: u64) {
        self.consumed.store(value, Ordering::Relaxed);
    }
}
