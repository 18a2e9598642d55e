//! Cleanup arbitration: the bracket family.
//!
//! Every combinator here runs a protected step and its cleanup, then reports
//! a single outcome through the severity merge in [`merge`]. Cleanup runs
//! exactly once on every path that got past acquisition, including when the
//! protected step panicked or was interrupted by an injected failure.
//!
//! An [`Arbiter`] bound to an interrupt context ([`Arbiter::with_context`])
//! additionally:
//!
//! - runs acquisition and release masked, so an injection cannot land in the
//!   middle of either;
//! - delivers a failure injected during acquisition right before the use
//!   step (which then does not run, while release still does);
//! - collects failures injected while release was running and merges them
//!   into the cleanup outcome, where they win by dominance.

pub mod merge;

use crate::classify::Classifier;
use crate::failure::{capture, Failure};
use crate::interrupt::{Cx, MaskGuard};

pub use merge::{OutcomePair, TieBreak};

/// How the use step ended, as seen by `release`.
#[derive(Debug)]
pub enum ExitCase<'a, T> {
    Completed(&'a T),
    Failed(&'a Failure),
}

impl<T> Clone for ExitCase<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ExitCase<'_, T> {}

impl<'a, T> ExitCase<'a, T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, ExitCase::Failed(_))
    }

    pub fn failure(&self) -> Option<&'a Failure> {
        match self {
            ExitCase::Completed(_) => None,
            ExitCase::Failed(failure) => Some(failure),
        }
    }

    pub(crate) fn of(outcome: &'a Result<T, Failure>) -> Self {
        match outcome {
            Ok(value) => ExitCase::Completed(value),
            Err(failure) => ExitCase::Failed(failure),
        }
    }
}

/// Runs protected operations with mandatory cleanup.
#[derive(Debug, Clone, Default)]
pub struct Arbiter {
    classifier: Classifier,
    tie_break: TieBreak,
    cx: Option<Cx>,
}

impl Arbiter {
    pub fn new(classifier: Classifier) -> Self {
        Self {
            classifier,
            tie_break: TieBreak::default(),
            cx: None,
        }
    }

    /// Sets the policy for two failures of equal severity.
    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Binds the arbiter to an interrupt context.
    pub fn with_context(mut self, cx: Cx) -> Self {
        self.cx = Some(cx);
        self
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn tie_break(&self) -> TieBreak {
        self.tie_break
    }

    pub fn context(&self) -> Option<&Cx> {
        self.cx.as_ref()
    }

    /// Resolves an action outcome against a cleanup outcome.
    pub fn merge<T>(
        &self,
        action: Result<T, Failure>,
        cleanup: Result<(), Failure>,
    ) -> Result<T, Failure> {
        OutcomePair::new(action, cleanup).resolve(&self.classifier, self.tie_break)
    }

    pub(crate) fn mask(&self) -> Option<MaskGuard> {
        self.cx.as_ref().map(Cx::mask)
    }

    fn masked<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.mask();
        f()
    }

    pub(crate) fn checkpoint(&self) -> Result<(), Failure> {
        match &self.cx {
            Some(cx) => cx.checkpoint(),
            None => Ok(()),
        }
    }

    /// Folds failures injected during cleanup into the cleanup outcome.
    pub(crate) fn settle_cleanup(&self, cleanup: Result<(), Failure>) -> Result<(), Failure> {
        let Some(cx) = &self.cx else {
            return cleanup;
        };
        cx.drain().into_iter().fold(cleanup, |settled, injected| {
            tracing::debug!(error = %injected, "failure injected during cleanup");
            match settled {
                Ok(()) => Err(injected),
                Err(current) => Err(merge::resolve(
                    &self.classifier,
                    TieBreak::PreferAction,
                    current,
                    injected,
                )),
            }
        })
    }

    fn run_bracket<R, T, A, U, F>(&self, acquire: A, use_: U, release: F) -> Result<T, Failure>
    where
        A: FnOnce() -> Result<R, Failure>,
        U: FnOnce(&mut R) -> Result<T, Failure>,
        F: FnOnce(R, ExitCase<'_, T>) -> Result<(), Failure>,
    {
        let mut resource = self.masked(|| capture(acquire)).map_err(|failure| {
            tracing::trace!(error = %failure, "acquire failed, release skipped");
            failure
        })?;

        let action = self
            .checkpoint()
            .and_then(|()| capture(|| use_(&mut resource)));

        let exit = ExitCase::of(&action);
        let cleanup = self.masked(|| capture(|| release(resource, exit)));
        let cleanup = self.settle_cleanup(cleanup);

        self.merge(action, cleanup)
    }

    fn run_on_error<R, T, A, U, F>(&self, acquire: A, use_: U, release: F) -> Result<T, Failure>
    where
        A: FnOnce() -> Result<R, Failure>,
        U: FnOnce(&mut R) -> Result<T, Failure>,
        F: FnOnce(R, &Failure) -> Result<(), Failure>,
    {
        let mut resource = self.masked(|| capture(acquire))?;

        let failure = match self
            .checkpoint()
            .and_then(|()| capture(|| use_(&mut resource)))
        {
            Ok(value) => return Ok(value),
            Err(failure) => failure,
        };

        let cleanup = self.masked(|| capture(|| release(resource, &failure)));
        let cleanup = self.settle_cleanup(cleanup);

        self.merge(Err(failure), cleanup)
    }

    /// Acquires a resource, uses it and always releases it.
    ///
    /// A failed `acquire` is returned untouched and `release` is not called.
    /// Otherwise `release` runs exactly once with the resource and a view of
    /// how `use_` ended, and the two outcomes are merged.
    pub fn bracket<R, T, A, F, U>(&self, acquire: A, release: F, use_: U) -> Result<T, Failure>
    where
        A: FnOnce() -> Result<R, Failure>,
        F: FnOnce(R, ExitCase<'_, T>) -> Result<(), Failure>,
        U: FnOnce(&mut R) -> Result<T, Failure>,
    {
        self.run_bracket(acquire, use_, release)
    }

    /// [`Arbiter::bracket`] where neither `use_` nor `release` needs the
    /// resource.
    pub fn bracket_<R, T, A, F, U>(&self, acquire: A, release: F, use_: U) -> Result<T, Failure>
    where
        A: FnOnce() -> Result<R, Failure>,
        F: FnOnce() -> Result<(), Failure>,
        U: FnOnce() -> Result<T, Failure>,
    {
        self.run_bracket(acquire, |_| use_(), |_, _| release())
    }

    /// Acquires a resource and releases it only if `use_` fails.
    ///
    /// On success the value is returned untouched and the resource is
    /// dropped without calling `release`; move it out in `use_` to keep it.
    pub fn bracket_on_error<R, T, A, F, U>(
        &self,
        acquire: A,
        release: F,
        use_: U,
    ) -> Result<T, Failure>
    where
        A: FnOnce() -> Result<R, Failure>,
        F: FnOnce(R, &Failure) -> Result<(), Failure>,
        U: FnOnce(&mut R) -> Result<T, Failure>,
    {
        self.run_on_error(acquire, use_, release)
    }

    /// Runs `action`, then `cleanup` unconditionally.
    pub fn finally<T, U, F>(&self, action: U, cleanup: F) -> Result<T, Failure>
    where
        U: FnOnce() -> Result<T, Failure>,
        F: FnOnce() -> Result<(), Failure>,
    {
        self.run_bracket(|| Ok(()), |_| action(), |_, _| cleanup())
    }

    /// Runs `action`, then `cleanup` only if `action` failed.
    pub fn on_exception<T, U, F>(&self, action: U, cleanup: F) -> Result<T, Failure>
    where
        U: FnOnce() -> Result<T, Failure>,
        F: FnOnce() -> Result<(), Failure>,
    {
        self.run_on_error(|| Ok(()), |_| action(), |_, _| cleanup())
    }

    /// Runs `action`; if it fails, hands the failure to `handler`.
    ///
    /// The handler cannot replace the failure. If the handler itself fails,
    /// its failure is merged with the action's like a cleanup failure.
    pub fn with_exception<T, U, H>(&self, action: U, handler: H) -> Result<T, Failure>
    where
        U: FnOnce() -> Result<T, Failure>,
        H: FnOnce(&Failure) -> Result<(), Failure>,
    {
        self.run_on_error(|| Ok(()), |_| action(), |_, failure| handler(failure))
    }
}

/// [`Arbiter::bracket`] with the default arbiter.
pub fn bracket<R, T, A, F, U>(acquire: A, release: F, use_: U) -> Result<T, Failure>
where
    A: FnOnce() -> Result<R, Failure>,
    F: FnOnce(R, ExitCase<'_, T>) -> Result<(), Failure>,
    U: FnOnce(&mut R) -> Result<T, Failure>,
{
    Arbiter::default().bracket(acquire, release, use_)
}

/// [`Arbiter::bracket_`] with the default arbiter.
pub fn bracket_<R, T, A, F, U>(acquire: A, release: F, use_: U) -> Result<T, Failure>
where
    A: FnOnce() -> Result<R, Failure>,
    F: FnOnce() -> Result<(), Failure>,
    U: FnOnce() -> Result<T, Failure>,
{
    Arbiter::default().bracket_(acquire, release, use_)
}

/// [`Arbiter::bracket_on_error`] with the default arbiter.
pub fn bracket_on_error<R, T, A, F, U>(acquire: A, release: F, use_: U) -> Result<T, Failure>
where
    A: FnOnce() -> Result<R, Failure>,
    F: FnOnce(R, &Failure) -> Result<(), Failure>,
    U: FnOnce(&mut R) -> Result<T, Failure>,
{
    Arbiter::default().bracket_on_error(acquire, release, use_)
}

/// [`Arbiter::finally`] with the default arbiter.
pub fn finally<T, U, F>(action: U, cleanup: F) -> Result<T, Failure>
where
    U: FnOnce() -> Result<T, Failure>,
    F: FnOnce() -> Result<(), Failure>,
{
    Arbiter::default().finally(action, cleanup)
}

/// [`Arbiter::on_exception`] with the default arbiter.
pub fn on_exception<T, U, F>(action: U, cleanup: F) -> Result<T, Failure>
where
    U: FnOnce() -> Result<T, Failure>,
    F: FnOnce() -> Result<(), Failure>,
{
    Arbiter::default().on_exception(action, cleanup)
}

/// [`Arbiter::with_exception`] with the default arbiter.
pub fn with_exception<T, U, H>(action: U, handler: H) -> Result<T, Failure>
where
    U: FnOnce() -> Result<T, Failure>,
    H: FnOnce(&Failure) -> Result<(), Failure>,
{
    Arbiter::default().with_exception(action, handler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::{Cancelled, Injected, Killed, Panicked};
    use std::cell::{Cell, RefCell};

    #[test]
    fn test_bracket_passes_resource_through() {
        let released = RefCell::new(Vec::new());
        let result = bracket(
            || Ok(String::from("conn")),
            |conn, exit| {
                assert!(!exit.is_failed());
                released.borrow_mut().push(conn);
                Ok(())
            },
            |conn| {
                conn.push_str("-used");
                Ok(conn.len())
            },
        );

        assert_eq!(result.unwrap(), 9);
        assert_eq!(*released.borrow(), vec!["conn-used".to_string()]);
    }

    #[test]
    fn test_release_sees_use_failure() {
        let seen = RefCell::new(None);
        let result: Result<(), Failure> = bracket(
            || Ok(()),
            |(), exit| {
                *seen.borrow_mut() = exit.failure().map(|f| f.to_string());
                Ok(())
            },
            |_| Err(Failure::msg("disk full")),
        );

        assert_eq!(result.unwrap_err().to_string(), "disk full");
        assert_eq!(seen.borrow().as_deref(), Some("disk full"));
    }

    #[test]
    fn test_release_runs_after_panic_in_use() {
        let released = Cell::new(0);
        let result: Result<(), Failure> = bracket(
            || Ok(()),
            |(), exit| {
                assert!(exit.failure().unwrap().is::<Panicked>());
                released.set(released.get() + 1);
                Ok(())
            },
            |_| panic!("use blew up"),
        );

        assert!(result.unwrap_err().is::<Panicked>());
        assert_eq!(released.get(), 1);
    }

    #[test]
    fn test_raised_failure_keeps_its_kind_through_bracket() {
        let result: Result<(), Failure> = finally(
            || Failure::new(Killed::new("supervisor")).raise(),
            || Err(Failure::msg("flush error")),
        );
        let failure = result.unwrap_err();
        assert!(failure.is::<Killed>());
        assert_eq!(failure.suppressed()[0].to_string(), "flush error");
    }

    #[test]
    fn test_bracket_underscore_ignores_resource() {
        let calls = Cell::new(0);
        let result = bracket_(
            || Ok(7),
            || {
                calls.set(calls.get() + 1);
                Ok(())
            },
            || Ok("done"),
        );
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_on_exception_runs_cleanup_only_on_failure() {
        let calls = Cell::new(0);
        let cleanup = || {
            calls.set(calls.get() + 1);
            Ok(())
        };

        assert_eq!(on_exception(|| Ok(1), cleanup).unwrap(), 1);
        assert_eq!(calls.get(), 0);

        let failed: Result<(), Failure> = on_exception(|| Err(Failure::msg("boom")), cleanup);
        assert_eq!(failed.unwrap_err().to_string(), "boom");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_with_exception_handler_sees_failure() {
        let seen = RefCell::new(String::new());
        let result: Result<(), Failure> = with_exception(
            || Err(Failure::msg("disk full")),
            |failure| {
                seen.borrow_mut().push_str(&failure.to_string());
                Ok(())
            },
        );
        assert_eq!(result.unwrap_err().to_string(), "disk full");
        assert_eq!(*seen.borrow(), "disk full");
    }

    #[test]
    fn test_with_exception_external_handler_failure_wins() {
        let result: Result<(), Failure> = with_exception(
            || Err(Failure::msg("disk full")),
            |_| Err(Cancelled::new("shutdown").into()),
        );
        let failure = result.unwrap_err();
        assert!(failure.is::<Cancelled>());
        assert_eq!(failure.suppressed()[0].to_string(), "disk full");
    }

    #[test]
    fn test_prefer_cleanup_tie_break() {
        let arbiter = Arbiter::default().with_tie_break(TieBreak::PreferCleanup);
        let result: Result<(), Failure> =
            arbiter.finally(|| Err(Failure::msg("action")), || Err(Failure::msg("cleanup")));
        let failure = result.unwrap_err();
        assert_eq!(failure.to_string(), "cleanup");
        assert_eq!(failure.suppressed()[0].to_string(), "action");
    }

    #[test]
    fn test_injection_during_acquire_skips_use() {
        let cx = Cx::new();
        let injector = cx.injector();
        let arbiter = Arbiter::default().with_context(cx);
        let used = Cell::new(false);
        let released = Cell::new(false);

        let result: Result<(), Failure> = arbiter.bracket(
            || {
                injector.throw_to(Killed::new("supervisor"));
                Ok(())
            },
            |(), exit| {
                assert!(exit.is_failed());
                released.set(true);
                Ok(())
            },
            |_| {
                used.set(true);
                Ok(())
            },
        );

        assert!(result.unwrap_err().is::<Injected>());
        assert!(!used.get());
        assert!(released.get());
    }

    #[test]
    fn test_injection_during_release_is_not_dropped() {
        let cx = Cx::new();
        let injector = cx.injector();
        let arbiter = Arbiter::default().with_context(cx.clone());

        let result = arbiter.bracket(
            || Ok(()),
            |(), _| {
                assert!(cx.is_masked());
                injector.throw_to(Cancelled::new("shutdown"));
                Err(Failure::msg("flush error"))
            },
            |_| Ok(42),
        );

        let failure = result.unwrap_err();
        assert!(failure.is::<Injected>());
        assert_eq!(failure.suppressed()[0].to_string(), "flush error");
        assert_eq!(cx.pending(), 0);
    }

    #[test]
    fn test_acquire_failure_leaves_injection_queued() {
        let cx = Cx::new();
        let injector = cx.injector();
        let arbiter = Arbiter::default().with_context(cx.clone());

        let result: Result<(), Failure> = arbiter.bracket(
            || {
                injector.throw_to(Killed::new("supervisor"));
                Err::<(), _>(Failure::msg("no connection"))
            },
            |(), _| panic!("release must not run"),
            |_| Ok(()),
        );

        assert_eq!(result.unwrap_err().to_string(), "no connection");
        assert_eq!(cx.pending(), 1);
    }
}
