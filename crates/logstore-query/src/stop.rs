//! Cooperative cancellation.
//!
//! A [`StopSignal`] is checked by query workers between blocks. Child signals
//! observe their parents, so stopping a pipe's scope stops everything upstream
//! of that pipe while the query-wide signal stops the whole query.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
    parent: Option<Box<StopSignal>>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a signal which is stopped when either it or `self` is stopped.
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Box::new(self.clone())),
        }
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        if self.flag.load(Ordering::Acquire) {
            return true;
        }
        self.parent.as_ref().is_some_and(|p| p.is_stopped())
    }

    /// Returns the flag of this scope, for APIs taking a plain `AtomicBool`.
    pub fn flag(&self) -> &AtomicBool {
        &self.flag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_observes_parent() {
        let root = StopSignal::new();
        let child = root.child();
        let grandchild = child.child();
        assert!(!grandchild.is_stopped());

        child.stop();
        assert!(grandchild.is_stopped());
        assert!(child.is_stopped());
        assert!(!root.is_stopped());

        let other = root.child();
        root.stop();
        assert!(other.is_stopped());
    }
}
