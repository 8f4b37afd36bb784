//! Cooperative cancellation.
//!
//! Long-running calls poll a [`CancelToken`] at safe points (epoch, entity,
//! sample and pixel loops) and stop with [`Interrupted`] once it is tripped.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Returned by any loop that stopped early because its token was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[display("operation interrupted")]
pub struct Interrupted;

/// Shared cancellation flag.
///
/// Cloning the token shares the flag, so a signal handler can hold one clone
/// while the training call polls another.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the token. Every holder observes it at its next safe point.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Returns `Err(Interrupted)` once the token has been tripped.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.is_cancelled() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }
}
