//! Single-shot completion signal
//!
//! A [`Completer`] travels with the work; the matching [`CompletionSignal`]
//! stays with whoever waits for it. The completer fires exactly once: either
//! through [`Completer::complete`] or, if it is dropped first, with a
//! not-completed outcome.
//!
//! A waiter that gives up can [`abandon`](CompletionSignal::abandon) the
//! work. Before touching shared state the work must [`claim`](Completer::claim)
//! it; exactly one of the two wins.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const PENDING: u8 = 0;
const CLAIMED: u8 = 1;
const ABANDONED: u8 = 2;

/// Create a connected completer/signal pair
pub fn completion_channel() -> (Completer, CompletionSignal) {
    let (tx, rx) = watch::channel(None);
    let state = Arc::new(AtomicU8::new(PENDING));
    (
        Completer {
            tx: Some(tx),
            state: state.clone(),
        },
        CompletionSignal { rx, state },
    )
}

/// Firing side of a completion signal
#[derive(Debug)]
pub struct Completer {
    tx: Option<watch::Sender<Option<bool>>>,
    state: Arc<AtomicU8>,
}

impl Completer {
    /// Fire the signal with the given outcome
    pub fn complete(mut self, completed: bool) {
        self.fire(completed);
    }

    /// Take ownership of the outcome before writing results back.
    ///
    /// Returns false if the waiter has abandoned the work; nothing may be
    /// written then.
    pub fn claim(&self) -> bool {
        match self
            .state
            .compare_exchange(PENDING, CLAIMED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => current == CLAIMED,
        }
    }

    /// Whether the waiter has given up on this work
    pub fn is_abandoned(&self) -> bool {
        self.state.load(Ordering::Acquire) == ABANDONED
    }

    fn fire(&mut self, completed: bool) {
        if let Some(tx) = self.tx.take() {
            // Succeeds even when every waiter has gone away
            tx.send_replace(Some(completed));
        }
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        self.fire(false);
    }
}

/// Waiting side of a completion signal
#[derive(Debug, Clone)]
pub struct CompletionSignal {
    rx: watch::Receiver<Option<bool>>,
    state: Arc<AtomicU8>,
}

impl CompletionSignal {
    /// Wait until the signal fires and return whether the work completed
    pub async fn wait(&self) -> bool {
        let mut rx = self.rx.clone();
        let completed = match rx.wait_for(|state| state.is_some()).await {
            Ok(state) => state.unwrap_or(false),
            Err(_) => false,
        };
        completed
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    ///
    /// Returns `None` on timeout. The completer may still fire afterwards;
    /// use [`wait_or_abandon`](Self::wait_or_abandon) to stop it from
    /// writing anything back.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<bool> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }

    /// Give up on the work. Returns false if the completer already claimed
    /// it, in which case the outcome is still coming and should be awaited.
    pub fn abandon(&self) -> bool {
        match self
            .state
            .compare_exchange(PENDING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => current == ABANDONED,
        }
    }

    /// Wait up to `timeout`, then abandon the work.
    ///
    /// Returns `None` if the work was abandoned. A completer that claimed the
    /// work before the deadline is waited for, since its write-back is
    /// already under way.
    pub async fn wait_or_abandon(&self, timeout: Duration) -> Option<bool> {
        if let Some(completed) = self.wait_timeout(timeout).await {
            return Some(completed);
        }
        if self.abandon() {
            None
        } else {
            Some(self.wait().await)
        }
    }

    /// Whether the signal has fired
    pub fn is_fired(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Completion flag; false until the signal fires with a completed outcome
    pub fn completed(&self) -> bool {
        self.rx.borrow().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_complete_true() {
        let (completer, signal) = completion_channel();
        assert!(!signal.is_fired());
        assert!(!signal.completed());

        completer.complete(true);

        assert!(signal.is_fired());
        assert!(signal.wait().await);
        assert!(signal.completed());
    }

    #[tokio::test]
    async fn test_drop_fires_not_completed() {
        let (completer, signal) = completion_channel();
        drop(completer);

        assert!(signal.is_fired());
        assert!(!signal.wait().await);
        assert!(!signal.completed());
    }

    #[tokio::test]
    async fn test_wait_across_tasks() {
        let (completer, signal) = completion_channel();

        let handle = tokio::spawn(async move {
            tokio::task::yield_now().await;
            completer.complete(true);
        });

        assert!(signal.wait().await);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_multiple_waiters_see_same_outcome() {
        let (completer, signal) = completion_channel();
        let other = signal.clone();

        let waiter = tokio::spawn(async move { other.wait().await });
        completer.complete(false);

        assert!(!signal.wait().await);
        assert!(!waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_timeout_then_late_fire() {
        let (completer, signal) = completion_channel();

        assert_eq!(signal.wait_timeout(Duration::from_secs(5)).await, None);

        // Firing after the waiter gave up is harmless
        completer.complete(true);
        assert_eq!(signal.wait_timeout(Duration::from_secs(5)).await, Some(true));
    }

    #[test]
    fn test_abandon_blocks_claim() {
        let (completer, signal) = completion_channel();

        assert!(signal.abandon());
        assert!(completer.is_abandoned());
        assert!(!completer.claim());
        // Repeated abandon stays abandoned
        assert!(signal.abandon());
    }

    #[test]
    fn test_claim_blocks_abandon() {
        let (completer, signal) = completion_channel();

        assert!(completer.claim());
        assert!(completer.claim());
        assert!(!signal.abandon());
        assert!(!completer.is_abandoned());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_or_abandon_times_out() {
        let (completer, signal) = completion_channel();

        assert_eq!(signal.wait_or_abandon(Duration::from_secs(5)).await, None);
        assert!(!completer.claim());
        completer.complete(true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_or_abandon_waits_for_claimed_work() {
        let (completer, signal) = completion_channel();
        assert!(completer.claim());

        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            completer.complete(true);
        });

        assert_eq!(signal.wait_or_abandon(Duration::from_secs(5)).await, Some(true));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_fire_after_signal_dropped() {
        let (completer, signal) = completion_channel();
        drop(signal);
        completer.complete(true);
    }
}
