//! Built-in failure kinds.
//!
//! The first group are the externally injected conditions the default
//! classifier knows about: [`Cancelled`], [`Killed`] and [`TimedOut`], plus
//! the [`Injected`] envelope that marks any payload as delivered from another
//! thread of control.
//!
//! The deadlock-on-wait kinds ([`BlockedIndefinitelyOnChannel`] and
//! [`BlockedIndefinitelyOnSignal`]) are delivered through the same injection
//! path but classify as local: the wait that can never complete was issued by
//! the failing code itself.

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::Failure;

/// Cooperative cancellation of the running operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("operation cancelled: {reason}")]
pub struct Cancelled {
    /// Why the operation was cancelled.
    pub reason: String,
}

impl Cancelled {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// A supervisor terminated the worker running the operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("killed by {by}")]
pub struct Killed {
    /// Who issued the kill.
    pub by: String,
}

impl Killed {
    pub fn new(by: impl Into<String>) -> Self {
        Self { by: by.into() }
    }
}

/// The operation ran past a deadline enforced from outside.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("timed out after {after:?}")]
pub struct TimedOut {
    /// The deadline that elapsed.
    pub after: Duration,
}

impl TimedOut {
    pub fn new(after: Duration) -> Self {
        Self { after }
    }
}

/// A blocking receive can never complete: every sender is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Error)]
#[error("blocked indefinitely on a channel with no remaining senders")]
pub struct BlockedIndefinitelyOnChannel;

/// A wait for a one-shot signal can never complete: its sender was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Error)]
#[error("blocked indefinitely on a signal whose sender was dropped")]
pub struct BlockedIndefinitelyOnSignal;

/// A panic captured inside a protected step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("panicked: {message}")]
pub struct Panicked {
    /// The panic message, when the payload was a string.
    pub message: String,
}

impl Panicked {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Message-only failure created by [`Failure::msg`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{text}")]
pub struct Message {
    text: String,
}

impl Message {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Envelope around a failure thrown into a running task from outside.
///
/// The envelope is what makes an injected payload external: the classifier
/// looks through it, and unless the payload is one of the forced-local kinds
/// the whole failure classifies as external.
#[derive(Debug)]
pub struct Injected {
    payload: Failure,
}

impl Injected {
    pub fn new(payload: Failure) -> Self {
        Self { payload }
    }

    /// The failure that was thrown.
    pub fn payload(&self) -> &Failure {
        &self.payload
    }

    pub fn into_payload(self) -> Failure {
        self.payload
    }
}

impl fmt::Display for Injected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "injected: {}", self.payload)
    }
}

impl StdError for Injected {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.payload.as_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Cancelled::new("user request").to_string(),
            "operation cancelled: user request"
        );
        assert_eq!(Killed::new("supervisor").to_string(), "killed by supervisor");
        assert_eq!(
            TimedOut::new(Duration::from_millis(250)).to_string(),
            "timed out after 250ms"
        );
        assert_eq!(Panicked::new("oops").to_string(), "panicked: oops");
    }

    #[test]
    fn test_injected_exposes_payload_as_source() {
        let injected = Injected::new(Failure::new(Killed::new("supervisor")));
        let source = injected.source().unwrap();
        assert!(source.is::<Killed>());
        assert_eq!(injected.to_string(), "injected: killed by supervisor");
    }

    #[test]
    fn test_injected_into_payload() {
        let injected = Injected::new(Failure::msg("payload"));
        assert_eq!(injected.payload().to_string(), "payload");
        assert_eq!(injected.into_payload().to_string(), "payload");
    }
}
