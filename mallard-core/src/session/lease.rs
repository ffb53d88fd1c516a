//! Validity fencing for cursors.
//!
//! A [`Lease`] belongs to a resource that cursors depend on (a session or a
//! statement handle). Each execution renews the lease, bumping its epoch; a
//! [`Fence`] taken at execution time stays valid only while the lease is
//! open and still at that epoch.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub(crate) struct Lease {
    epoch: AtomicU64,
    exhausted_epoch: AtomicU64,
    closed: AtomicBool,
}

impl Lease {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Start a new epoch, invalidating every fence issued before.
    pub(crate) fn renew(self: &Arc<Self>) -> Fence {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        Fence {
            lease: Arc::clone(self),
            epoch,
        }
    }

    /// Fence at the current epoch without invalidating anything.
    pub(crate) fn fence(self: &Arc<Self>) -> Fence {
        Fence {
            lease: Arc::clone(self),
            epoch: self.epoch.load(Ordering::Acquire),
        }
    }

    /// Returns `true` if this call closed the lease.
    pub(crate) fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        let epoch = self.epoch();
        epoch != 0 && self.exhausted_epoch.load(Ordering::Acquire) == epoch
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Fence {
    lease: Arc<Lease>,
    epoch: u64,
}

impl Fence {
    pub(crate) fn is_valid(&self) -> bool {
        !self.lease.is_closed() && self.lease.epoch() == self.epoch
    }

    /// Record that the execution this fence guards has delivered every row.
    pub(crate) fn mark_exhausted(&self) {
        if self.is_valid() {
            self.lease
                .exhausted_epoch
                .store(self.epoch, Ordering::Release);
        }
    }
}
