//! Deadline enforcement by injection.
//!
//! A [`Watchdog`] runs a background tokio task that throws a [`TimedOut`]
//! failure into a [`Cx`](super::Cx) once its deadline elapses, unless it was
//! disarmed first.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::Injector;
use crate::failure::TimedOut;

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const DISARMED: u8 = 2;

/// Injects a timeout into a task that runs past its deadline.
///
/// Must be armed from within a tokio runtime.
///
/// # Example
///
/// ```ignore
/// use std::time::Duration;
/// use failguard::interrupt::{Cx, Watchdog};
///
/// let cx = Cx::new();
/// let watchdog = Watchdog::arm(cx.injector(), Duration::from_secs(30));
///
/// // ... long-running work that calls cx.checkpoint() ...
///
/// watchdog.disarm();
/// ```
#[derive(Debug)]
pub struct Watchdog {
    /// How long the task may run.
    deadline: Duration,
    /// `ARMED` until either the background task fires or the watchdog is
    /// disarmed; whichever moves it first wins.
    state: Arc<AtomicU8>,
    /// Handle to the background task.
    task_handle: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Starts the countdown.
    pub fn arm(injector: Injector, deadline: Duration) -> Self {
        let state = Arc::new(AtomicU8::new(ARMED));

        let task_state = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;

            if task_state
                .compare_exchange(ARMED, FIRED, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }

            // No await from here on, so aborting the task cannot lose the
            // injection once the state says it fired.
            tracing::warn!(?deadline, "deadline elapsed, injecting timeout");
            injector.throw_to(TimedOut::new(deadline));
        });

        Self {
            deadline,
            state,
            task_handle: Some(handle),
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Returns true if the timeout was (or is being) injected.
    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::SeqCst) == FIRED
    }

    /// Stops the countdown. Returns true if the watchdog had already fired.
    pub fn disarm(mut self) -> bool {
        let fired = self.stop();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
        fired
    }

    fn stop(&self) -> bool {
        self.state
            .compare_exchange(ARMED, DISARMED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err_and(|state| state == FIRED)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}
