//! Cooperative cancellation.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How a cancelled iterator behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelMode {
    /// `has_next` fails with [`crate::QueryError::Cancelled`].
    Abort,
    /// The row being fetched is still delivered, then the iterator ends.
    Drain,
}

#[derive(Default)]
struct Children {
    signals: Vec<CancelSignal>,
    fired: bool,
}

#[derive(Default)]
struct CancelState {
    requested: AtomicBool,
    drain: AtomicBool,
    children: Mutex<Children>,
}

/// A cancellation flag shared between an iterator and any thread that
/// wants to stop it.
///
/// Cancelling is idempotent: the first request wins and is passed on to
/// attached child signals exactly once. A child attached after that is
/// cancelled on the spot.
#[derive(Clone, Default)]
pub struct CancelSignal(Arc<CancelState>);

impl CancelSignal {
    /// A fresh, unrequested signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self, mode: CancelMode) {
        let mut children = self.0.children.lock();
        if children.fired {
            return;
        }
        self.0.drain.store(mode == CancelMode::Drain, Ordering::SeqCst);
        self.0.requested.store(true, Ordering::SeqCst);
        children.fired = true;
        let signals = std::mem::take(&mut children.signals);
        drop(children);
        for child in signals {
            child.cancel(mode);
        }
    }

    /// True once cancellation was requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.requested.load(Ordering::SeqCst)
    }

    /// The requested mode, if any.
    #[must_use]
    pub fn mode(&self) -> Option<CancelMode> {
        if !self.is_requested() {
            return None;
        }
        if self.0.drain.load(Ordering::SeqCst) {
            Some(CancelMode::Drain)
        } else {
            Some(CancelMode::Abort)
        }
    }

    /// Passes this signal's cancellation on to `child`.
    pub fn attach(&self, child: &CancelSignal) {
        if Arc::ptr_eq(&self.0, &child.0) {
            return;
        }
        let mut children = self.0.children.lock();
        if children.fired {
            drop(children);
            child.cancel(self.mode().unwrap_or(CancelMode::Abort));
            return;
        }
        // Drop signals whose iterators are gone.
        children.signals.retain(|signal| Arc::strong_count(&signal.0) > 1);
        children.signals.push(child.clone());
    }
}

impl fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSignal")
            .field("mode", &self.mode())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn first_request_wins() {
        let signal = CancelSignal::new();
        assert_eq!(signal.mode(), None);
        signal.cancel(CancelMode::Drain);
        signal.cancel(CancelMode::Abort);
        assert_eq!(signal.mode(), Some(CancelMode::Drain));
    }

    #[test]
    fn propagates_to_children_including_late_ones() {
        let parent = CancelSignal::new();
        let early = CancelSignal::new();
        parent.attach(&early);
        parent.cancel(CancelMode::Abort);
        assert!(early.is_requested());

        let late = CancelSignal::new();
        parent.attach(&late);
        assert_eq!(late.mode(), Some(CancelMode::Abort));
    }

    #[test]
    fn cancel_from_another_thread() {
        let signal = CancelSignal::new();
        let child = CancelSignal::new();
        signal.attach(&child);
        let remote = signal.clone();
        thread::spawn(move || remote.cancel(CancelMode::Abort))
            .join()
            .unwrap();
        assert!(signal.is_requested());
        assert!(child.is_requested());
    }
}
