//! Intercept-everything variants of the guarded combinators.
//!
//! These catch external failures too, which is almost always a bug: a
//! cancelled task that swallows its own cancellation keeps running. Every
//! call takes an [`InterceptsExternal`] token so that each use is visible at
//! the call site and can be found with a plain text search.

use crate::classify::{Classifier, Severity};
use crate::failure::{capture, Failure};

/// Acknowledgement that the caller intends to intercept external failures.
#[derive(Debug, Clone, Copy)]
pub struct InterceptsExternal {
    _private: (),
}

impl InterceptsExternal {
    pub fn acknowledge() -> Self {
        Self { _private: () }
    }
}

impl Classifier {
    fn note_interception(&self, failure: &Failure) {
        if self.classify(failure) == Severity::External {
            tracing::warn!(
                kind = %failure.kind(),
                error = %failure,
                "intercepting external failure"
            );
        }
    }

    /// Runs `op` and captures every failure, external ones included.
    pub fn try_all<T, F>(&self, _ack: InterceptsExternal, op: F) -> Result<T, Failure>
    where
        F: FnOnce() -> Result<T, Failure>,
    {
        let outcome = capture(op);
        if let Err(failure) = &outcome {
            self.note_interception(failure);
        }
        outcome
    }

    /// Runs `op`; on any failure runs `handler`.
    pub fn catch_all<T, F, H>(
        &self,
        ack: InterceptsExternal,
        op: F,
        handler: H,
    ) -> Result<T, Failure>
    where
        F: FnOnce() -> Result<T, Failure>,
        H: FnOnce(Failure) -> Result<T, Failure>,
    {
        match self.try_all(ack, op) {
            Ok(value) => Ok(value),
            Err(failure) => capture(|| handler(failure)),
        }
    }

    /// [`Classifier::catch_all`] with the handler first.
    pub fn handle_all<T, H, F>(
        &self,
        ack: InterceptsExternal,
        handler: H,
        op: F,
    ) -> Result<T, Failure>
    where
        H: FnOnce(Failure) -> Result<T, Failure>,
        F: FnOnce() -> Result<T, Failure>,
    {
        self.catch_all(ack, op, handler)
    }
}

/// [`Classifier::try_all`] with the built-in classifier.
pub fn try_all<T, F>(ack: InterceptsExternal, op: F) -> Result<T, Failure>
where
    F: FnOnce() -> Result<T, Failure>,
{
    Classifier::builtin().try_all(ack, op)
}

/// [`Classifier::catch_all`] with the built-in classifier.
pub fn catch_all<T, F, H>(ack: InterceptsExternal, op: F, handler: H) -> Result<T, Failure>
where
    F: FnOnce() -> Result<T, Failure>,
    H: FnOnce(Failure) -> Result<T, Failure>,
{
    Classifier::builtin().catch_all(ack, op, handler)
}

/// [`Classifier::handle_all`] with the built-in classifier.
pub fn handle_all<T, H, F>(ack: InterceptsExternal, handler: H, op: F) -> Result<T, Failure>
where
    H: FnOnce(Failure) -> Result<T, Failure>,
    F: FnOnce() -> Result<T, Failure>,
{
    Classifier::builtin().handle_all(ack, handler, op)
}
