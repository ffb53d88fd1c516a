//! Polled progress of the most recent long-running operation.
//!
//! The state is one atomic word: the upper 32 bits hold the id of the
//! operation that owns the slot, the lower 32 bits its completion in
//! millionths. Only the current owner may move the fraction, so a finishing
//! older operation never overwrites a newer one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const SCALE: f64 = 1_000_000.0;
const FRACTION_MASK: u64 = 0xFFFF_FFFF;

#[derive(Clone, Default, Debug)]
pub struct ProgressMonitor {
    inner: Arc<ProgressInner>,
}

#[derive(Default, Debug)]
struct ProgressInner {
    state: AtomicU64,
    next_id: AtomicU64,
}

impl ProgressMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completion fraction in `[0, 1]`; `0.0` when idle. Never blocks.
    pub fn current(&self) -> f64 {
        let state = self.inner.state.load(Ordering::Acquire);
        (state & FRACTION_MASK) as f64 / SCALE
    }

    /// Claim the slot for a new operation, resetting the fraction to zero.
    pub(crate) fn start(&self) -> ProgressTicket {
        let id = (self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1) & FRACTION_MASK;
        self.inner.state.store(id << 32, Ordering::Release);
        ProgressTicket {
            inner: Arc::clone(&self.inner),
            id,
        }
    }
}

/// Ownership of the progress slot for one operation; dropping it marks the
/// operation idle.
#[derive(Debug)]
pub(crate) struct ProgressTicket {
    inner: Arc<ProgressInner>,
    id: u64,
}

impl ProgressTicket {
    pub(crate) fn report(&self, fraction: f64) {
        let fixed = (fraction.clamp(0.0, 1.0) * SCALE).round() as u64;
        self.store_if_owner(fixed);
    }

    fn store_if_owner(&self, fixed: u64) {
        let mut current = self.inner.state.load(Ordering::Acquire);
        loop {
            if current >> 32 != self.id {
                return;
            }
            let next = (self.id << 32) | fixed;
            match self.inner.state.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Drop for ProgressTicket {
    fn drop(&mut self) {
        self.store_if_owner(0);
    }
}
