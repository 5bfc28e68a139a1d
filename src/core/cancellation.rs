//! Cooperative shutdown signal shared by every bridge loop
//!
//! The flag is set exactly once and never cleared. Loops check it with
//! [`CancellationToken::is_cancelled`] at the top of each iteration and race
//! their blocking calls against [`CancellationToken::cancelled`].

use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Set the flag. Later calls have no effect.
    pub fn cancel(&self) {
        self.sender.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        });
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Completes once the token has been cancelled
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        // The sender lives as long as `self`, so this only returns once the
        // predicate holds.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }

    /// Run `fut` unless cancellation wins the race; `None` when cancelled
    pub async fn run_until_cancelled<F>(&self, fut: F) -> Option<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.cancelled() => None,
            output = fut => Some(output),
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
