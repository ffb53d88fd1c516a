//! Live-resource accounting for native handles.
//!
//! Every native connection, prepared statement and cursor holds a
//! [`ResourceGuard`]; the count goes up when the guard is created and down
//! when it drops, so a snapshot of zero means nothing leaked.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceSnapshot {
    pub sessions: u64,
    pub statements: u64,
    pub cursors: u64,
}

impl ResourceSnapshot {
    pub fn is_idle(&self) -> bool {
        self.sessions == 0 && self.statements == 0 && self.cursors == 0
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum ResourceKind {
    Session,
    Statement,
    Cursor,
}

#[derive(Clone, Default)]
pub(crate) struct ResourceTracker {
    inner: Arc<TrackerInner>,
}

#[derive(Default)]
struct TrackerInner {
    sessions: AtomicU64,
    statements: AtomicU64,
    cursors: AtomicU64,
}

impl TrackerInner {
    fn counter(&self, kind: ResourceKind) -> &AtomicU64 {
        match kind {
            ResourceKind::Session => &self.sessions,
            ResourceKind::Statement => &self.statements,
            ResourceKind::Cursor => &self.cursors,
        }
    }
}

impl ResourceTracker {
    pub(crate) fn acquire(&self, kind: ResourceKind) -> ResourceGuard {
        self.inner.counter(kind).fetch_add(1, Ordering::Relaxed);
        ResourceGuard {
            inner: Arc::clone(&self.inner),
            kind,
        }
    }

    pub(crate) fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            sessions: self.inner.sessions.load(Ordering::Relaxed),
            statements: self.inner.statements.load(Ordering::Relaxed),
            cursors: self.inner.cursors.load(Ordering::Relaxed),
        }
    }
}

pub(crate) struct ResourceGuard {
    inner: Arc<TrackerInner>,
    kind: ResourceKind,
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.inner.counter(self.kind).fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_increment_and_decrement_counts() {
        let tracker = ResourceTracker::default();
        assert!(tracker.snapshot().is_idle());

        {
            let _session = tracker.acquire(ResourceKind::Session);
            let _statement = tracker.acquire(ResourceKind::Statement);
            let _cursor = tracker.acquire(ResourceKind::Cursor);
            let snapshot = tracker.snapshot();
            assert_eq!(snapshot.sessions, 1);
            assert_eq!(snapshot.statements, 1);
            assert_eq!(snapshot.cursors, 1);
        }

        assert!(tracker.snapshot().is_idle());
    }
}
