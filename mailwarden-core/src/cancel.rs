//! Cooperative task cancellation
//!
//! One top-level token is created at engine startup and handed (or a child of
//! it) to every spawned task. Loop bodies `select!` on `cancelled()` and exit
//! within one iteration.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Notify;

/// A clonable token for cooperative task cancellation.
///
/// When cancelled, all clones and child tokens are notified.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelTokenInner>,
}

#[derive(Default)]
struct CancelTokenInner {
    cancelled: RwLock<bool>,
    notify: Notify,
    children: RwLock<Vec<CancelToken>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a child token, cancelled automatically with its parent.
    pub fn child_token(&self) -> Self {
        let child = CancelToken::new();
        self.inner.children.write().push(child.clone());
        if self.is_cancelled() {
            child.cancel();
        }
        child
    }

    /// Cancel this token and all children.
    pub fn cancel(&self) {
        *self.inner.cancelled.write() = true;
        self.inner.notify.notify_waiters();
        let children = self.inner.children.read().clone();
        for child in children {
            child.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.read()
    }

    /// Wait for cancellation. Returns immediately if already cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}
