use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::error::{CanopyError, Result};

/// Shared cancellation flag threaded through every VCS invocation.
///
/// Clones observe the same flag. Subprocess runners poll it while waiting for
/// children and kill them once it fires; waiters poll it between receives.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    /// The shared flag.
    flag: Arc<AtomicBool>,
    /// Flag of the token this one was derived from.
    parent: Option<Arc<AtomicBool>>,
}

impl CancelToken {
    /// Create a token that has not been cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a token that fires with this one but can also be fired alone.
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::default(),
            parent: Some(Arc::clone(&self.flag)),
        }
    }

    /// Fire the token. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether the token (or its parent) has fired.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self
                .parent
                .as_ref()
                .is_some_and(|parent| parent.load(Ordering::SeqCst))
    }

    /// Return `Err(Cancelled)` once the token has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(CanopyError::Cancelled);
        }
        Ok(())
    }
}
