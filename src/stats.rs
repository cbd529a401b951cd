//! Counters for events that are observable but never fail a caller
//!
//! Stray replies and undecodable inbound messages are legal occurrences in a
//! broker-based system (late deliveries, duplicates, foreign publishers on a
//! shared topic). They are counted here and logged, nothing more.

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide observability counters shared by the coordinator and the bridge
#[derive(Debug, Default)]
pub struct BridgeStats {
    unknown_correlations: AtomicU64,
    decode_failures: AtomicU64,
    reception_failures: AtomicU64,
}

impl BridgeStats {
    /// Number of inbound replies whose correlation id matched no pending request
    pub fn unknown_correlations(&self) -> u64 {
        self.unknown_correlations.load(Ordering::Relaxed)
    }

    /// Number of inbound wire messages that could not be decoded
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Number of inbound messages the subscription failed to receive at all
    pub fn reception_failures(&self) -> u64 {
        self.reception_failures.load(Ordering::Relaxed)
    }

    pub(crate) fn record_unknown_correlation(&self) {
        self.unknown_correlations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reception_failure(&self) {
        self.reception_failures.fetch_add(1, Ordering::Relaxed);
    }
}
