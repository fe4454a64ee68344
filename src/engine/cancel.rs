//! Cancellation token for cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl Inner {
    fn reason(&self) -> Option<String> {
        self.reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

/// A token for cooperative cancellation.
///
/// Clones share state. A [`child`](CancellationToken::child) token is
/// cancelled when it or any of its ancestors is cancelled, but cancelling
/// the child leaves its ancestors untouched. Only the first reason is kept.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
    ancestors: Vec<Arc<Inner>>,
}

impl CancellationToken {
    /// Create a new, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a token that also observes this token's cancellation.
    pub fn child(&self) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(Arc::clone(&self.inner));
        Self {
            inner: Arc::new(Inner::default()),
            ancestors,
        }
    }

    /// Request cancellation. Idempotent: the first reason wins.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .inner
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *self
                .inner
                .reason
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(reason.into());
        }
    }

    /// Whether this token or any ancestor has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self
                .ancestors
                .iter()
                .any(|a| a.cancelled.load(Ordering::SeqCst))
    }

    /// The cancellation reason, own reason first, then the nearest ancestor's.
    pub fn reason(&self) -> Option<String> {
        if self.inner.cancelled.load(Ordering::SeqCst) {
            return self.inner.reason();
        }
        self.ancestors
            .iter()
            .rev()
            .find(|a| a.cancelled.load(Ordering::SeqCst))
            .and_then(|a| a.reason())
    }
}
