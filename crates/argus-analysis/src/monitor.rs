use crate::Cancelled;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Cooperative, propagating cancellation flag.
///
/// One monitor is created per logical request (one per command, one per
/// client-visible task). The cancelled state is monotonic: once set it never
/// reverts. Cancelling a parent cascades to all registered children;
/// cancelling a child never affects its parent.
///
/// Cancellation is cooperative, not preemptive: long-running code must call
/// [`CancelMonitor::check_cancelled`] at loop and I/O boundaries and unwind
/// via [`Cancelled`].
#[derive(Clone, Debug, Default)]
pub struct CancelMonitor {
    inner: Arc<MonitorInner>,
}

#[derive(Debug, Default)]
struct MonitorInner {
    cancelled: AtomicBool,
    children: Mutex<Vec<Weak<MonitorInner>>>,
}

impl MonitorInner {
    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let children = std::mem::take(&mut *self.children.lock());
        for child in children {
            if let Some(child) = child.upgrade() {
                child.cancel();
            }
        }
    }
}

impl CancelMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the cancelled flag and cascade to all registered children.
    /// Idempotent.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Explicit cancellation checkpoint for long operations.
    pub fn check_cancelled(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }

    /// Register `child` for cascading cancellation.
    ///
    /// If this monitor is already cancelled, the child is cancelled
    /// immediately. Only weak back-references are kept, so cancelled or
    /// dropped children are not retained; dead references are pruned on each
    /// registration.
    pub fn on_cancel(&self, child: &CancelMonitor) {
        if self.is_cancelled() {
            child.cancel();
            return;
        }
        let mut children = self.inner.children.lock();
        children.retain(|existing| existing.strong_count() > 0);
        children.push(Arc::downgrade(&child.inner));
        drop(children);
        // The flag may have been set while we were registering; make sure the
        // child cannot miss the cascade.
        if self.is_cancelled() {
            child.cancel();
        }
    }

    /// Create a new monitor cancelled whenever this one is.
    pub fn child(&self) -> CancelMonitor {
        let child = CancelMonitor::new();
        self.on_cancel(&child);
        child
    }
}

/// Executor-bound registry of outstanding monitors.
///
/// The scheduler registers every monitor it hands work to; on teardown
/// [`MonitorSet::cancel_all`] cancels whatever is still alive so in-flight
/// work is not orphaned. Holds weak references only.
#[derive(Debug, Default)]
pub struct MonitorSet {
    monitors: Mutex<Vec<Weak<MonitorInner>>>,
}

impl MonitorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, monitor: &CancelMonitor) {
        let mut monitors = self.monitors.lock();
        monitors.retain(|existing| existing.strong_count() > 0);
        monitors.push(Arc::downgrade(&monitor.inner));
    }

    /// Cancel every monitor still alive. Used on scheduler shutdown.
    pub fn cancel_all(&self) {
        let monitors = std::mem::take(&mut *self.monitors.lock());
        for monitor in monitors {
            if let Some(monitor) = monitor.upgrade() {
                monitor.cancel();
            }
        }
    }

    /// Number of registered monitors still alive.
    pub fn active_count(&self) -> usize {
        self.monitors
            .lock()
            .iter()
            .filter(|monitor| monitor.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_monotonic_and_idempotent() {
        let monitor = CancelMonitor::new();
        assert!(!monitor.is_cancelled());
        assert!(monitor.check_cancelled().is_ok());

        monitor.cancel();
        monitor.cancel();
        assert!(monitor.is_cancelled());
        assert_eq!(monitor.check_cancelled(), Err(Cancelled));
    }

    #[test]
    fn cancelling_parent_cascades_to_children() {
        let parent = CancelMonitor::new();
        let child = parent.child();
        let grandchild = child.child();

        parent.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn cancelling_child_leaves_parent_untouched() {
        let parent = CancelMonitor::new();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn registering_on_cancelled_parent_cancels_immediately() {
        let parent = CancelMonitor::new();
        parent.cancel();

        let child = CancelMonitor::new();
        parent.on_cancel(&child);
        assert!(child.is_cancelled());
    }

    #[test]
    fn monitor_set_cancels_outstanding_monitors() {
        let set = MonitorSet::new();
        let first = CancelMonitor::new();
        let second = CancelMonitor::new();
        set.register(&first);
        set.register(&second);
        assert_eq!(set.active_count(), 2);

        // A dropped monitor is not retained.
        drop(second);
        assert_eq!(set.active_count(), 1);

        set.cancel_all();
        assert!(first.is_cancelled());
        assert_eq!(set.active_count(), 0);
    }
}
