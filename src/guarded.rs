//! Guarded catch/try/handle.
//!
//! These combinators only ever intercept [`Severity::Local`] failures. An
//! external failure passes through them untouched: the guarded `try_`
//! returns it in the *outer* `Err`, ready to keep propagating with `?`,
//! and `catch`/`handle` return it without calling the handler.
//!
//! ```
//! use failguard::{guarded, Failure};
//!
//! fn parse(input: &str) -> Result<u32, Failure> {
//!     guarded::catch(|| Ok(input.parse::<u32>()?), |_| Ok(0))
//! }
//!
//! assert_eq!(parse("12").unwrap(), 12);
//! assert_eq!(parse("twelve").unwrap(), 0);
//! ```
//!
//! A caller using only these can reason: if my handler wasn't invoked and
//! the failure escaped, it is not mine to recover from.

use std::error::Error as StdError;

use crate::classify::{Classifier, Severity};
use crate::failure::{capture, Failure};

impl Classifier {
    /// Splits a finished outcome by severity.
    ///
    /// `Ok(Ok(value))` on success, `Ok(Err(failure))` for a local failure and
    /// `Err(failure)` for an external one.
    pub fn triage<T>(&self, outcome: Result<T, Failure>) -> Result<Result<T, Failure>, Failure> {
        match outcome {
            Ok(value) => Ok(Ok(value)),
            Err(failure) => match self.classify(&failure) {
                Severity::Local => Ok(Err(failure)),
                Severity::External => Err(failure),
            },
        }
    }

    /// Runs `op` and captures its local failures.
    pub fn try_<T, F>(&self, op: F) -> Result<Result<T, Failure>, Failure>
    where
        F: FnOnce() -> Result<T, Failure>,
    {
        self.triage(capture(op))
    }

    /// Runs `op`; on a local failure, runs `handler` and returns its result.
    pub fn catch<T, F, H>(&self, op: F, handler: H) -> Result<T, Failure>
    where
        F: FnOnce() -> Result<T, Failure>,
        H: FnOnce(Failure) -> Result<T, Failure>,
    {
        match self.try_(op)? {
            Ok(value) => Ok(value),
            Err(failure) => {
                tracing::trace!(kind = %failure.kind(), "handling local failure");
                capture(|| handler(failure))
            }
        }
    }

    /// [`Classifier::catch`] with the handler first.
    pub fn handle<T, H, F>(&self, handler: H, op: F) -> Result<T, Failure>
    where
        H: FnOnce(Failure) -> Result<T, Failure>,
        F: FnOnce() -> Result<T, Failure>,
    {
        self.catch(op, handler)
    }

    /// Runs `op` and captures local failures whose outermost error is an `E`.
    ///
    /// Local failures of any other kind are propagated in the outer `Err`
    /// along with external ones.
    pub fn try_kind<E, T, F>(&self, op: F) -> Result<Result<T, E>, Failure>
    where
        E: StdError + 'static,
        F: FnOnce() -> Result<T, Failure>,
    {
        match self.try_(op)? {
            Ok(value) => Ok(Ok(value)),
            Err(failure) => failure.downcast::<E>().map(Err),
        }
    }

    /// Typed form of [`Classifier::catch`]: the handler gets the `E` value.
    pub fn catch_kind<E, T, F, H>(&self, op: F, handler: H) -> Result<T, Failure>
    where
        E: StdError + 'static,
        F: FnOnce() -> Result<T, Failure>,
        H: FnOnce(E) -> Result<T, Failure>,
    {
        match self.try_kind::<E, T, F>(op)? {
            Ok(value) => Ok(value),
            Err(error) => capture(|| handler(error)),
        }
    }
}

/// [`Classifier::try_`] with the built-in classifier.
pub fn try_<T, F>(op: F) -> Result<Result<T, Failure>, Failure>
where
    F: FnOnce() -> Result<T, Failure>,
{
    Classifier::builtin().try_(op)
}

/// [`Classifier::catch`] with the built-in classifier.
pub fn catch<T, F, H>(op: F, handler: H) -> Result<T, Failure>
where
    F: FnOnce() -> Result<T, Failure>,
    H: FnOnce(Failure) -> Result<T, Failure>,
{
    Classifier::builtin().catch(op, handler)
}

/// [`Classifier::handle`] with the built-in classifier.
pub fn handle<T, H, F>(handler: H, op: F) -> Result<T, Failure>
where
    H: FnOnce(Failure) -> Result<T, Failure>,
    F: FnOnce() -> Result<T, Failure>,
{
    Classifier::builtin().handle(handler, op)
}

/// [`Classifier::try_kind`] with the built-in classifier.
pub fn try_kind<E, T, F>(op: F) -> Result<Result<T, E>, Failure>
where
    E: StdError + 'static,
    F: FnOnce() -> Result<T, Failure>,
{
    Classifier::builtin().try_kind::<E, T, F>(op)
}

/// [`Classifier::catch_kind`] with the built-in classifier.
pub fn catch_kind<E, T, F, H>(op: F, handler: H) -> Result<T, Failure>
where
    E: StdError + 'static,
    F: FnOnce() -> Result<T, Failure>,
    H: FnOnce(E) -> Result<T, Failure>,
{
    Classifier::builtin().catch_kind(op, handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::{BlockedIndefinitelyOnChannel, Cancelled, Injected, Killed, Panicked};
    use std::cell::Cell;
    use std::io;

    #[test]
    fn test_try_returns_local_failure_inside() {
        let outcome = try_(|| Err::<(), _>(Failure::msg("disk full"))).unwrap();
        assert_eq!(outcome.unwrap_err().to_string(), "disk full");
    }

    #[test]
    fn test_try_reraises_external_failure() {
        let escaped = try_(|| Err::<(), _>(Cancelled::new("shutdown").into())).unwrap_err();
        assert!(escaped.is::<Cancelled>());
    }

    #[test]
    fn test_try_passes_success_through() {
        assert_eq!(try_(|| Ok::<_, Failure>(5)).unwrap().unwrap(), 5);
    }

    #[test]
    fn test_catch_skips_handler_for_external() {
        let calls = Cell::new(0);
        let result: Result<(), Failure> = catch(
            || Err(Killed::new("supervisor").into()),
            |_| {
                calls.set(calls.get() + 1);
                Ok(())
            },
        );

        assert!(result.unwrap_err().is::<Killed>());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_catch_recovers_local_failure() {
        let result = catch(
            || Err(io::Error::new(io::ErrorKind::Other, "disk full").into()),
            |failure| {
                assert!(failure.is::<io::Error>());
                Ok(7)
            },
        );
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn test_catch_treats_panic_as_local() {
        let result = catch(|| -> Result<u8, Failure> { panic!("bad index") }, |failure| {
            assert!(failure.is::<Panicked>());
            Ok(1)
        });
        assert_eq!(result.unwrap(), 1);
    }

    #[test]
    fn test_handler_failure_propagates() {
        let result: Result<(), Failure> =
            handle(|_| Err(Failure::msg("handler broke")), || Err(Failure::msg("first")));
        assert_eq!(result.unwrap_err().to_string(), "handler broke");
    }

    #[test]
    fn test_handler_external_escapes_enclosing_guard() {
        let calls = Cell::new(0);
        let result: Result<(), Failure> = catch(
            || catch(|| Err(Failure::msg("first")), |_| Err(Cancelled::new("mid-handler").into())),
            |_| {
                calls.set(calls.get() + 1);
                Ok(())
            },
        );

        assert!(result.unwrap_err().is::<Cancelled>());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_injected_deadlock_is_caught() {
        let result = catch(
            || Err(Injected::new(BlockedIndefinitelyOnChannel.into()).into()),
            |_| Ok("recovered"),
        );
        assert_eq!(result.unwrap(), "recovered");
    }

    #[test]
    fn test_try_kind_only_intercepts_matching_kind() {
        let caught =
            try_kind::<io::Error, (), _>(|| Err(io::Error::from(io::ErrorKind::NotFound).into()))
                .unwrap()
                .unwrap_err();
        assert_eq!(caught.kind(), io::ErrorKind::NotFound);

        let other = try_kind::<io::Error, (), _>(|| Err(Failure::msg("not io"))).unwrap_err();
        assert_eq!(other.to_string(), "not io");
    }

    #[test]
    fn test_catch_kind_hands_typed_value() {
        let result = catch_kind(
            || Err(io::Error::from(io::ErrorKind::PermissionDenied).into()),
            |error: io::Error| Ok(error.kind() == io::ErrorKind::PermissionDenied),
        );
        assert!(result.unwrap());
    }

    #[test]
    fn test_custom_classifier_extends_external_kinds() {
        #[derive(Debug, thiserror::Error)]
        #[error("lease lost")]
        struct LeaseLost;

        let classifier = Classifier::new().with_external_kind::<LeaseLost>();
        let escaped = classifier.try_(|| Err::<(), _>(LeaseLost.into())).unwrap_err();
        assert!(escaped.is::<LeaseLost>());

        let caught = try_(|| Err::<(), _>(LeaseLost.into())).unwrap();
        assert!(caught.is_err());
    }
}
