//! Cross-thread failure injection.
//!
//! A [`Cx`] is the interrupt context of one logical task: a queue of failures
//! thrown into it from outside plus a mask depth. An [`Injector`] is the
//! sending side, handed to whoever may need to stop the task (a supervisor,
//! a [`Watchdog`], a sibling thread).
//!
//! Injection is cooperative: a thrown failure is delivered at the task's next
//! checkpoint, which is either an explicit [`Cx::checkpoint`] call or one of
//! the interruptible waits ([`Cx::recv`], [`Cx::sleep`],
//! [`Cx::wait_signal`]). Every delivered failure arrives wrapped in an
//! [`Injected`] envelope, so the classifier sees it as external unless the
//! payload is one of the deadlock-on-wait kinds.
//!
//! While the context is masked, deliveries are deferred. The arbiter masks
//! acquisition and release so that an injection can never tear a resource
//! half-way through its setup or teardown.

mod watchdog;

pub use watchdog::Watchdog;

use std::collections::VecDeque;
use std::future::Future;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Notify};

use crate::failure::{BlockedIndefinitelyOnChannel, BlockedIndefinitelyOnSignal, Failure, Injected};

/// Interval at which blocking channel receives re-check for injections.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct State {
    pending: VecDeque<Failure>,
    mask_depth: usize,
}

impl State {
    fn deliverable(&mut self) -> Option<Failure> {
        if self.mask_depth == 0 {
            self.pending.pop_front()
        } else {
            None
        }
    }
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    /// Wakes blocking waiters.
    wake: Condvar,
    /// Wakes async waiters.
    notify: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wake_all(&self) {
        self.wake.notify_all();
        self.notify.notify_waiters();
    }
}

/// Interrupt context of one logical task.
///
/// Cloning yields another handle to the same context.
#[derive(Clone, Default)]
pub struct Cx {
    shared: Arc<Shared>,
}

impl Cx {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle that can throw failures into this context.
    pub fn injector(&self) -> Injector {
        Injector {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Returns true while at least one mask is held.
    pub fn is_masked(&self) -> bool {
        self.shared.lock().mask_depth > 0
    }

    /// Number of injected failures not yet delivered.
    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Delivers the oldest pending failure, unless masked.
    pub fn checkpoint(&self) -> Result<(), Failure> {
        match self.shared.lock().deliverable() {
            Some(failure) => {
                tracing::debug!(error = %failure, "delivering injected failure");
                Err(failure)
            }
            None => Ok(()),
        }
    }

    /// Defers delivery of injected failures until the guard is dropped.
    ///
    /// Masks nest; deliveries resume when the outermost guard is released.
    pub fn mask(&self) -> MaskGuard {
        self.shared.lock().mask_depth += 1;
        MaskGuard {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Runs `f` with delivery deferred.
    pub fn masked<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.mask();
        f()
    }

    /// Takes every deliverable pending failure, oldest first.
    ///
    /// Returns nothing while masked; the failures stay queued for the
    /// enclosing unmasked checkpoint.
    pub fn drain(&self) -> Vec<Failure> {
        let mut state = self.shared.lock();
        if state.mask_depth > 0 {
            return Vec::new();
        }
        state.pending.drain(..).collect()
    }

    /// Blocking receive that an injected failure can interrupt.
    ///
    /// Fails with [`BlockedIndefinitelyOnChannel`] once every sender is gone
    /// and the channel is empty.
    pub fn recv<T>(&self, receiver: &Receiver<T>) -> Result<T, Failure> {
        loop {
            self.checkpoint()?;
            match receiver.recv_timeout(POLL_INTERVAL) {
                Ok(value) => return Ok(value),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(BlockedIndefinitelyOnChannel.into())
                }
            }
        }
    }

    /// Blocking sleep that an injected failure can interrupt.
    pub fn sleep(&self, duration: Duration) -> Result<(), Failure> {
        let deadline = Instant::now() + duration;
        let mut state = self.shared.lock();
        loop {
            if let Some(failure) = state.deliverable() {
                return Err(failure);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            let (next, _) = self
                .shared
                .wake
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = next;
        }
    }

    /// Resolves with the next deliverable injected failure.
    pub async fn interrupted(&self) -> Failure {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Err(failure) = self.checkpoint() {
                return failure;
            }
            notified.await;
        }
    }

    /// Runs `fut`, abandoning it if a failure is injected first.
    pub async fn interruptible<T, F>(&self, fut: F) -> Result<T, Failure>
    where
        F: Future<Output = Result<T, Failure>>,
    {
        self.checkpoint()?;
        tokio::select! {
            biased;
            failure = self.interrupted() => Err(failure),
            outcome = fut => outcome,
        }
    }

    /// Waits for a one-shot signal; an injected failure interrupts the wait.
    ///
    /// Fails with [`BlockedIndefinitelyOnSignal`] if the sender is dropped
    /// without sending.
    pub async fn wait_signal<T>(&self, signal: oneshot::Receiver<T>) -> Result<T, Failure> {
        self.interruptible(async move {
            signal
                .await
                .map_err(|_| Failure::new(BlockedIndefinitelyOnSignal))
        })
        .await
    }
}

impl std::fmt::Debug for Cx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Cx")
            .field("pending", &state.pending.len())
            .field("mask_depth", &state.mask_depth)
            .finish()
    }
}

/// Holds a [`Cx`] masked until dropped.
#[must_use = "the mask is released as soon as the guard is dropped"]
pub struct MaskGuard {
    shared: Arc<Shared>,
}

impl Drop for MaskGuard {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.mask_depth = state.mask_depth.saturating_sub(1);
        let deliverable = state.mask_depth == 0 && !state.pending.is_empty();
        drop(state);
        if deliverable {
            self.shared.wake_all();
        }
    }
}

impl std::fmt::Debug for MaskGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaskGuard").finish_non_exhaustive()
    }
}

/// Throws failures into a [`Cx`] from another thread or task.
#[derive(Clone)]
pub struct Injector {
    shared: Arc<Shared>,
}

impl Injector {
    /// Queues `failure` for delivery, wrapped in [`Injected`].
    pub fn throw_to(&self, failure: impl Into<Failure>) {
        let failure = Failure::new(Injected::new(failure.into()));
        tracing::debug!(error = %failure, "injecting failure");
        self.shared.lock().pending.push_back(failure);
        self.shared.wake_all();
    }

    /// Number of injected failures not yet delivered.
    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }
}

impl std::fmt::Debug for Injector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Injector").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::{Cancelled, Killed};
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn test_checkpoint_delivers_in_order() {
        let cx = Cx::new();
        let injector = cx.injector();
        injector.throw_to(Killed::new("first"));
        injector.throw_to(Cancelled::new("second"));

        let first = cx.checkpoint().unwrap_err();
        assert!(first.downcast_ref::<Injected>().unwrap().payload().is::<Killed>());
        let second = cx.checkpoint().unwrap_err();
        assert!(second.downcast_ref::<Injected>().unwrap().payload().is::<Cancelled>());
        assert!(cx.checkpoint().is_ok());
    }

    #[test]
    fn test_mask_defers_delivery() {
        let cx = Cx::new();
        cx.injector().throw_to(Killed::new("supervisor"));

        cx.masked(|| {
            assert!(cx.is_masked());
            assert!(cx.checkpoint().is_ok());
            assert!(cx.drain().is_empty());
        });

        assert!(!cx.is_masked());
        assert_eq!(cx.pending(), 1);
        assert!(cx.checkpoint().is_err());
    }

    #[test]
    fn test_masks_nest() {
        let cx = Cx::new();
        let outer = cx.mask();
        let inner = cx.mask();
        drop(inner);
        assert!(cx.is_masked());
        drop(outer);
        assert!(!cx.is_masked());
    }

    #[test]
    fn test_recv_returns_sent_value() {
        let cx = Cx::new();
        let (tx, rx) = mpsc::channel();
        tx.send(3).unwrap();
        assert_eq!(cx.recv(&rx).unwrap(), 3);
    }

    #[test]
    fn test_recv_on_dead_channel_is_blocked_indefinitely() {
        let cx = Cx::new();
        let (tx, rx) = mpsc::channel::<()>();
        drop(tx);
        let failure = cx.recv(&rx).unwrap_err();
        assert!(failure.is::<BlockedIndefinitelyOnChannel>());
    }

    #[test]
    fn test_recv_interrupted_from_another_thread() {
        let cx = Cx::new();
        let injector = cx.injector();
        let (_tx, rx) = mpsc::channel::<()>();

        let thrower = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            injector.throw_to(Killed::new("supervisor"));
        });

        let failure = cx.recv(&rx).unwrap_err();
        assert!(failure.is::<Injected>());
        thrower.join().unwrap();
    }

    #[test]
    fn test_sleep_interrupted_by_injection() {
        let cx = Cx::new();
        let injector = cx.injector();

        let thrower = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            injector.throw_to(Cancelled::new("shutdown"));
        });

        let started = Instant::now();
        assert!(cx.sleep(Duration::from_secs(10)).is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
        thrower.join().unwrap();
    }

    #[test]
    fn test_sleep_completes_without_injection() {
        let cx = Cx::new();
        assert!(cx.sleep(Duration::from_millis(5)).is_ok());
    }

    #[tokio::test]
    async fn test_wait_signal_receives_value() {
        let cx = Cx::new();
        let (tx, rx) = oneshot::channel();
        tx.send("ready").unwrap();
        assert_eq!(cx.wait_signal(rx).await.unwrap(), "ready");
    }

    #[tokio::test]
    async fn test_wait_signal_on_dropped_sender() {
        let cx = Cx::new();
        let (tx, rx) = oneshot::channel::<()>();
        drop(tx);
        let failure = cx.wait_signal(rx).await.unwrap_err();
        assert!(failure.is::<BlockedIndefinitelyOnSignal>());
    }

    #[tokio::test]
    async fn test_wait_signal_interrupted() {
        let cx = Cx::new();
        let injector = cx.injector();
        let (_tx, rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            injector.throw_to(Killed::new("supervisor"));
        });

        let failure = cx.wait_signal(rx).await.unwrap_err();
        assert!(failure.is::<Injected>());
    }
}
