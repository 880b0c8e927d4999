//! Process-wide delivery counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct DeliveryStats {
    total_deliveries: AtomicU64,
    successful_deliveries: AtomicU64,
    failed_deliveries: AtomicU64,
    retries: AtomicU64,
}

/// Point-in-time copy of [`DeliveryStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatsSnapshot {
    /// Every HTTP attempt, first tries and retries alike.
    pub total_deliveries: u64,
    /// Delivery sequences that ended in a 2xx.
    pub successful_deliveries: u64,
    /// Delivery sequences that exhausted their attempts.
    pub failed_deliveries: u64,
    /// Attempts after the first within a sequence.
    pub retries: u64,
}

impl DeliveryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_attempt(&self, attempt: u32) {
        self.total_deliveries.fetch_add(1, Ordering::Relaxed);
        if attempt > 1 {
            self.retries.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_outcome(&self, success: bool) {
        let counter = if success {
            &self.successful_deliveries
        } else {
            &self.failed_deliveries
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DeliveryStatsSnapshot {
        DeliveryStatsSnapshot {
            total_deliveries: self.total_deliveries.load(Ordering::Relaxed),
            successful_deliveries: self.successful_deliveries.load(Ordering::Relaxed),
            failed_deliveries: self.failed_deliveries.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.total_deliveries.store(0, Ordering::Relaxed);
        self.successful_deliveries.store(0, Ordering::Relaxed);
        self.failed_deliveries.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
    }
}
