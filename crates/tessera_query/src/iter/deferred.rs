//! Delayed construction of an iterator.

use super::base::{IterLogic, QueryIter};
use super::cancel::CancelSignal;
use super::{not_ready, BoxIter, QueryIterator};
use crate::binding::Binding;
use crate::error::QueryResult;

type Init = Box<dyn FnOnce() -> QueryResult<BoxIter> + Send>;

/// Runs an initializer on the first pull and delegates to its result.
///
/// Closing before the first pull drops the initializer without running it.
pub struct Deferred {
    label: &'static str,
    init: Option<Init>,
    inner: Option<BoxIter>,
}

impl Deferred {
    /// Wraps `init`, labelled `label` in plan output.
    pub fn new<F>(label: &'static str, init: F) -> QueryIter<Self>
    where
        F: FnOnce() -> QueryResult<BoxIter> + Send + 'static,
    {
        QueryIter::new(Self {
            label,
            init: Some(Box::new(init)),
            inner: None,
        })
    }

    /// Whether the initializer has run.
    pub fn is_initialized(&self) -> bool {
        self.inner.is_some()
    }
}

impl IterLogic for Deferred {
    fn name(&self) -> &'static str {
        "Deferred"
    }

    fn has_next_binding(&mut self, signal: &CancelSignal) -> QueryResult<bool> {
        if self.inner.is_none() {
            let Some(init) = self.init.take() else {
                return Ok(false);
            };
            let inner = init()?;
            signal.attach(&inner.cancel_signal());
            self.inner = Some(inner);
        }
        match self.inner.as_mut() {
            Some(inner) => inner.has_next(),
            None => Ok(false),
        }
    }

    fn move_to_next_binding(&mut self) -> QueryResult<Binding> {
        match self.inner.as_mut() {
            Some(inner) => inner.next_binding(),
            None => Err(not_ready("Deferred")),
        }
    }

    fn close_iterator(&mut self) {
        self.init = None;
        if let Some(inner) = self.inner.as_mut() {
            inner.close();
        }
    }

    fn children(&self) -> Vec<&dyn QueryIterator> {
        self.inner.iter().map(|inner| inner.as_ref() as &dyn QueryIterator).collect()
    }

    fn details(&self) -> String {
        if self.inner.is_some() {
            self.label.to_string()
        } else {
            format!("{} (not started)", self.label)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iter::collect_rows;
    use crate::iter::test_support::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn initializes_on_first_pull() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let mut iter = Deferred::new("ints", move || {
            flag.store(true, Ordering::SeqCst);
            Ok(source(ints("x", &[1, 2])))
        });
        assert!(!ran.load(Ordering::SeqCst));
        assert!(!iter.logic().is_initialized());
        assert!(iter.has_next().unwrap());
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(values(&[iter.next_binding().unwrap()], "x"), vec![1]);
    }

    #[test]
    fn close_before_pull_skips_init() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let mut iter = Deferred::new("never", move || {
            flag.store(true, Ordering::SeqCst);
            Ok(source(Vec::new()))
        });
        iter.close();
        assert!(!iter.has_next().unwrap());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn init_error_surfaces() {
        let iter = Deferred::new("broken", || Err(crate::QueryError::evaluation("no index")));
        assert!(collect_rows(iter).is_err());
    }
}
