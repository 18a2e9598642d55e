//! The universal failure value.
//!
//! Every combinator in this crate speaks a single failure type, [`Failure`].
//! It wraps any `std::error::Error + Send + Sync + 'static`, remembers the
//! concrete kind it was built from, and can carry failures that a merge
//! discarded ("suppressed" failures) so that diagnostics never lose them.
//!
//! Whether a failure is recoverable is *not* stored on the value; it is
//! recomputed by a [`Classifier`](crate::classify::Classifier) every time a
//! combinator needs to decide.

pub mod kinds;

use std::any::{Any, TypeId};
use std::error::Error as StdError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

pub use kinds::{
    BlockedIndefinitelyOnChannel, BlockedIndefinitelyOnSignal, Cancelled, Injected, Killed,
    Message, Panicked, TimedOut,
};

/// Kind tag of a failure: the concrete error type it was constructed from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Kind {
    id: TypeId,
    name: &'static str,
}

impl Kind {
    /// Returns the kind tag for the error type `E`.
    pub fn of<E: 'static>() -> Self {
        Self {
            id: TypeId::of::<E>(),
            name: std::any::type_name::<E>(),
        }
    }

    /// Returns the fully qualified type name of the kind.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns true if this tag denotes the error type `E`.
    pub fn is<E: 'static>(&self) -> bool {
        self.id == TypeId::of::<E>()
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A raised failure: a dynamically typed error plus the failures that were
/// discarded in its favour.
///
/// `Failure` converts from any error type with `?`, in the same way
/// `anyhow::Error` does, and for the same reason it does not implement
/// `std::error::Error` itself. Use [`Failure::as_error`] when a
/// `&dyn Error` is needed.
pub struct Failure {
    error: Box<dyn StdError + Send + Sync + 'static>,
    kind: Kind,
    suppressed: Vec<Failure>,
}

impl Failure {
    /// Wraps an error value.
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            error: Box::new(error),
            kind: Kind::of::<E>(),
            suppressed: Vec::new(),
        }
    }

    /// Creates an ad hoc failure carrying only a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Message::new(message))
    }

    /// Returns the kind tag of the outermost error.
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Returns true if the outermost error is an `E`.
    pub fn is<E: StdError + 'static>(&self) -> bool {
        self.error.is::<E>()
    }

    /// Typed view of the outermost error.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.error.downcast_ref::<E>()
    }

    /// Takes the outermost error out as an `E`, or gives the failure back.
    ///
    /// Suppressed failures are dropped on success; use
    /// [`Failure::suppressed`] first if they matter.
    pub fn downcast<E: StdError + 'static>(self) -> Result<E, Self> {
        let Failure {
            error,
            kind,
            suppressed,
        } = self;
        match error.downcast::<E>() {
            Ok(typed) => Ok(*typed),
            Err(error) => Err(Failure {
                error,
                kind,
                suppressed,
            }),
        }
    }

    /// Returns the wrapped error.
    pub fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.error
    }

    /// Iterates over the wrapped error and its `source()` chain, outermost
    /// first.
    pub fn chain(&self) -> Chain<'_> {
        let outermost: &(dyn StdError + 'static) = &*self.error;
        Chain {
            next: Some(outermost),
        }
    }

    /// Returns the innermost error of the source chain.
    pub fn root_cause(&self) -> &(dyn StdError + 'static) {
        let mut cause: &(dyn StdError + 'static) = &*self.error;
        while let Some(next) = cause.source() {
            cause = next;
        }
        cause
    }

    /// Failures that were discarded in favour of this one.
    pub fn suppressed(&self) -> &[Failure] {
        &self.suppressed
    }

    /// Attaches a discarded failure as diagnostics metadata.
    pub fn with_suppressed(mut self, other: Failure) -> Self {
        self.suppress(other);
        self
    }

    pub(crate) fn suppress(&mut self, other: Failure) {
        self.suppressed.push(other);
    }

    /// Raises this failure by unwinding the current thread.
    ///
    /// This is the escape hatch for code that cannot return a `Result`
    /// (callbacks, `Drop` impls). Every combinator in this crate recovers the
    /// original `Failure`, including its kind, when it captures the unwind.
    pub fn raise(self) -> ! {
        panic::resume_unwind(Box::new(self))
    }

    /// Converts a captured panic payload into a failure.
    ///
    /// A payload produced by [`Failure::raise`] is returned unchanged; any
    /// other payload becomes a [`Panicked`] failure.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        match payload.downcast::<Failure>() {
            Ok(failure) => *failure,
            Err(payload) => {
                let message = if let Some(text) = payload.downcast_ref::<&'static str>() {
                    (*text).to_string()
                } else if let Some(text) = payload.downcast_ref::<String>() {
                    text.clone()
                } else {
                    "non-string panic payload".to_string()
                };
                Failure::new(Panicked::new(message))
            }
        }
    }
}

impl<E> From<E> for Failure
where
    E: StdError + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Failure::new(error)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if f.alternate() {
            let mut source = self.error.source();
            while let Some(cause) = source {
                write!(f, ": {cause}")?;
                source = cause.source();
            }
            if !self.suppressed.is_empty() {
                write!(f, " (+{} suppressed)", self.suppressed.len())?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("kind", &self.kind.name())
            .field("error", &self.error)
            .field("suppressed", &self.suppressed)
            .finish()
    }
}

/// Iterator over a failure's source chain.
#[derive(Clone)]
pub struct Chain<'a> {
    next: Option<&'a (dyn StdError + 'static)>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = &'a (dyn StdError + 'static);

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.source();
        Some(current)
    }
}

/// Runs `op`, turning an unwind out of it into a `Failure`.
///
/// All combinators run their protected steps through this so that a panic
/// (or a [`Failure::raise`]) still reaches cleanup and the severity merge.
pub fn capture<T, F>(op: F) -> Result<T, Failure>
where
    F: FnOnce() -> Result<T, Failure>,
{
    panic::catch_unwind(AssertUnwindSafe(op))
        .unwrap_or_else(|payload| Err(Failure::from_panic(payload)))
}
