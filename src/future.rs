//! Async counterparts of the guarded and arbiter combinators.
//!
//! The semantics match the blocking forms: guarded sites only intercept
//! local failures, cleanup always runs once the resource exists, and the
//! outcomes go through the same severity merge. Panics inside any step are
//! captured and reported as failures.
//!
//! When the arbiter is bound to a [`Cx`](crate::interrupt::Cx), the use step
//! is raced against injection: a failure thrown into the context abandons
//! the use future at its current await point, and release runs next.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::arbiter::{Arbiter, ExitCase};
use crate::classify::Classifier;
use crate::failure::{self, Failure};

/// Awaits `fut`, turning a panic during any poll into a `Failure`.
pub async fn capture<T, Fut>(fut: Fut) -> Result<T, Failure>
where
    Fut: Future<Output = Result<T, Failure>>,
{
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(Failure::from_panic(payload)))
}

/// Calls a future-producing closure and awaits the result, capturing panics
/// from either.
async fn start<T, F, Fut>(make: F) -> Result<T, Failure>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, Failure>>,
{
    match failure::capture(move || Ok(make())) {
        Ok(fut) => capture(fut).await,
        Err(failure) => Err(failure),
    }
}

async fn interruptible<T, Fut>(arbiter: &Arbiter, fut: Fut) -> Result<T, Failure>
where
    Fut: Future<Output = Result<T, Failure>>,
{
    match arbiter.context() {
        Some(cx) => cx.interruptible(fut).await,
        None => fut.await,
    }
}

async fn release_masked<F, Fut>(arbiter: &Arbiter, release: F) -> Result<(), Failure>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), Failure>>,
{
    let cleanup = {
        let _guard = arbiter.mask();
        start(release).await
    };
    arbiter.settle_cleanup(cleanup)
}

/// Async [`Classifier::try_`].
pub async fn try_<T, Fut>(classifier: &Classifier, op: Fut) -> Result<Result<T, Failure>, Failure>
where
    Fut: Future<Output = Result<T, Failure>>,
{
    classifier.triage(capture(op).await)
}

/// Async [`Classifier::catch`].
pub async fn catch<T, Fut, H, HFut>(
    classifier: &Classifier,
    op: Fut,
    handler: H,
) -> Result<T, Failure>
where
    Fut: Future<Output = Result<T, Failure>>,
    H: FnOnce(Failure) -> HFut,
    HFut: Future<Output = Result<T, Failure>>,
{
    match try_(classifier, op).await? {
        Ok(value) => Ok(value),
        Err(failure) => start(move || handler(failure)).await,
    }
}

/// Async [`Arbiter::finally`].
pub async fn finally<T, Fut, F, CFut>(
    arbiter: &Arbiter,
    action: Fut,
    cleanup: F,
) -> Result<T, Failure>
where
    Fut: Future<Output = Result<T, Failure>>,
    F: FnOnce() -> CFut,
    CFut: Future<Output = Result<(), Failure>>,
{
    let action = interruptible(arbiter, capture(action)).await;
    let cleanup = release_masked(arbiter, cleanup).await;
    arbiter.merge(action, cleanup)
}

/// Async [`Arbiter::on_exception`].
pub async fn on_exception<T, Fut, F, CFut>(
    arbiter: &Arbiter,
    action: Fut,
    cleanup: F,
) -> Result<T, Failure>
where
    Fut: Future<Output = Result<T, Failure>>,
    F: FnOnce() -> CFut,
    CFut: Future<Output = Result<(), Failure>>,
{
    match interruptible(arbiter, capture(action)).await {
        Ok(value) => Ok(value),
        Err(failure) => {
            let cleanup = release_masked(arbiter, cleanup).await;
            arbiter.merge(Err(failure), cleanup)
        }
    }
}

/// Async [`Arbiter::bracket`].
///
/// `release` inspects the [`ExitCase`] synchronously and returns the future
/// that performs the teardown; that future cannot borrow the exit case.
pub async fn bracket<R, T, A, F, RFut, U>(
    arbiter: &Arbiter,
    acquire: A,
    release: F,
    use_: U,
) -> Result<T, Failure>
where
    A: Future<Output = Result<R, Failure>>,
    F: FnOnce(R, ExitCase<'_, T>) -> RFut,
    RFut: Future<Output = Result<(), Failure>>,
    U: for<'r> FnOnce(&'r mut R) -> BoxFuture<'r, Result<T, Failure>>,
{
    let mut resource = {
        let _guard = arbiter.mask();
        capture(acquire).await?
    };

    let handle = &mut resource;
    let action = interruptible(arbiter, start(move || use_(handle))).await;

    let exit = ExitCase::of(&action);
    let cleanup = release_masked(arbiter, move || release(resource, exit)).await;

    arbiter.merge(action, cleanup)
}
