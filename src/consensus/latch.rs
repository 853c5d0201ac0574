//! Single-fire completion signal.
//!
//! The round loop waits on it while the iteration timer and the vote handlers
//! race to release it. Only the first `count_down` has an effect.

use std::sync::Arc;
use tokio::sync::watch;

use crate::utils::{Result, SimplexError};

#[derive(Debug, Clone)]
pub struct CompletionLatch {
    released: Arc<watch::Sender<bool>>,
}

impl CompletionLatch {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { released: Arc::new(tx) }
    }

    /// Release every waiter, present and future.
    pub fn count_down(&self) {
        self.released.send_replace(true);
    }

    pub fn is_released(&self) -> bool {
        *self.released.borrow()
    }

    /// Resolves once the latch has been released.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.released.subscribe();
        rx.wait_for(|released| *released)
            .await
            .map(|_| ())
            .map_err(|_| SimplexError::interrupted())
    }
}

impl Default for CompletionLatch {
    fn default() -> Self {
        Self::new()
    }
}
