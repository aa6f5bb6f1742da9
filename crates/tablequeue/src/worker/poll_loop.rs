//! Pause/wait/wakeup state machine pacing one worker
//!
//! ```text
//!            pause()                      wait(timeout, policy)
//!   Running ─────────► Paused    Running ─────────────────────► Waiting
//!      ▲                 │          ▲                              │
//!      └─── unpause() ───┘          └── deadline | wake (Allow) ───┘
//! ```
//!
//! Pausing never interrupts an iteration in progress; it only gates the next
//! one. Cancellation ends both the loop and any wait in progress.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Blocked until unpaused
    Paused,
    /// Sleeping between iterations
    Waiting,
    /// Inside an iteration
    Running,
    /// Cancelled; the loop has exited or is about to
    Stopped,
}

/// Whether a pending wakeup may shorten a wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakePolicy {
    /// A wakeup ends the wait immediately
    Allow,
    /// A wakeup is absorbed; the full timeout is still slept
    Deny,
}

/// Why a wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Elapsed,
    Woken,
    Cancelled,
}

/// Iteration driver for one worker
pub struct PollLoop {
    paused: watch::Sender<bool>,
    state: Mutex<LoopState>,
    wake_requested: AtomicBool,
    wake: Notify,
    cancel: CancellationToken,
}

impl PollLoop {
    pub fn new(cancel: CancellationToken, paused: bool) -> Self {
        let (paused_tx, _) = watch::channel(paused);
        Self {
            paused: paused_tx,
            state: Mutex::new(if paused {
                LoopState::Paused
            } else {
                LoopState::Running
            }),
            wake_requested: AtomicBool::new(false),
            wake: Notify::new(),
            cancel,
        }
    }

    /// Invoke `body` repeatedly until cancelled, blocking while paused
    pub async fn run<F, Fut>(&self, mut body: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut paused_rx = self.paused.subscribe();
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let paused = *paused_rx.borrow_and_update();
            if paused {
                self.set_state(LoopState::Paused);
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    changed = paused_rx.wait_for(|paused| !*paused) => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            }

            self.set_state(LoopState::Running);
            body().await;
        }
        self.set_state(LoopState::Stopped);
        trace!("poll loop stopped");
    }

    /// Sleep for `timeout` unless cancelled or, with [`WakePolicy::Allow`], woken
    pub async fn wait(&self, timeout: Duration, policy: WakePolicy) -> WaitOutcome {
        self.set_state(LoopState::Waiting);
        let deadline = Instant::now() + timeout;

        let outcome = loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            // Register before checking the flag so a concurrent wake is not lost
            notified.as_mut().enable();

            if self.wake_requested.swap(false, Ordering::AcqRel) && policy == WakePolicy::Allow {
                break WaitOutcome::Woken;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break WaitOutcome::Cancelled,
                _ = tokio::time::sleep_until(deadline) => break WaitOutcome::Elapsed,
                _ = &mut notified => {}
            }
        };

        if outcome != WaitOutcome::Cancelled {
            self.set_state(LoopState::Running);
        }
        outcome
    }

    /// Ask the current or next [`WakePolicy::Allow`] wait to end early
    pub fn request_wake(&self) {
        self.wake_requested.store(true, Ordering::Release);
        self.wake.notify_waiters();
    }

    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn unpause(&self) {
        self.paused.send_replace(false);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn state(&self) -> LoopState {
        *self.state.lock()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn set_state(&self, state: LoopState) {
        *self.state.lock() = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn new_loop(paused: bool) -> Arc<PollLoop> {
        Arc::new(PollLoop::new(CancellationToken::new(), paused))
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_elapses() {
        let poll_loop = new_loop(false);
        let started = Instant::now();
        let outcome = poll_loop
            .wait(Duration::from_secs(5), WakePolicy::Allow)
            .await;
        assert_eq!(outcome, WaitOutcome::Elapsed);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_allow_wait_is_shortened_by_wake() {
        let poll_loop = new_loop(false);
        let waiter = Arc::clone(&poll_loop);
        let started = Instant::now();
        let handle = tokio::spawn(async move {
            waiter
                .wait(Duration::from_secs(10), WakePolicy::Allow)
                .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        poll_loop.request_wake();

        assert_eq!(handle.await.unwrap(), WaitOutcome::Woken);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deny_wait_sleeps_full_timeout() {
        let poll_loop = new_loop(false);
        let waiter = Arc::clone(&poll_loop);
        let started = Instant::now();
        let handle = tokio::spawn(async move {
            waiter
                .wait(Duration::from_secs(10), WakePolicy::Deny)
                .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        poll_loop.request_wake();

        assert_eq!(handle.await.unwrap(), WaitOutcome::Elapsed);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deny_wait_absorbs_pending_wake() {
        let poll_loop = new_loop(false);
        poll_loop.request_wake();

        let outcome = poll_loop
            .wait(Duration::from_secs(1), WakePolicy::Deny)
            .await;
        assert_eq!(outcome, WaitOutcome::Elapsed);

        // The request was consumed by the denied wait
        let started = Instant::now();
        let outcome = poll_loop
            .wait(Duration::from_secs(2), WakePolicy::Allow)
            .await;
        assert_eq!(outcome, WaitOutcome::Elapsed);
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_wake_ends_next_allow_wait() {
        let poll_loop = new_loop(false);
        poll_loop.request_wake();
        let started = Instant::now();
        let outcome = poll_loop
            .wait(Duration::from_secs(30), WakePolicy::Allow)
            .await;
        assert_eq!(outcome, WaitOutcome::Woken);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_wait() {
        let cancel = CancellationToken::new();
        let poll_loop = Arc::new(PollLoop::new(cancel.clone(), false));
        let waiter = Arc::clone(&poll_loop);
        let handle = tokio::spawn(async move {
            waiter
                .wait(Duration::from_secs(60), WakePolicy::Deny)
                .await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), WaitOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_blocks_while_paused() {
        let cancel = CancellationToken::new();
        let poll_loop = Arc::new(PollLoop::new(cancel.clone(), true));
        let iterations = Arc::new(AtomicUsize::new(0));

        let runner = Arc::clone(&poll_loop);
        let counter = Arc::clone(&iterations);
        let handle = tokio::spawn(async move {
            let body_loop = Arc::clone(&runner);
            runner
                .run(|| {
                    let counter = Arc::clone(&counter);
                    let body_loop = Arc::clone(&body_loop);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        body_loop
                            .wait(Duration::from_secs(1), WakePolicy::Allow)
                            .await;
                    }
                })
                .await;
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(iterations.load(Ordering::SeqCst), 0);
        assert_eq!(poll_loop.state(), LoopState::Paused);

        poll_loop.unpause();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(iterations.load(Ordering::SeqCst), 3);

        poll_loop.pause();
        tokio::time::sleep(Duration::from_secs(5)).await;
        let paused_at = iterations.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(iterations.load(Ordering::SeqCst), paused_at);

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(poll_loop.state(), LoopState::Stopped);
    }
}
