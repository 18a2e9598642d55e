//! Failure classification.
//!
//! This module decides whether a raised [`Failure`] originated in the code
//! path that is running ([`Severity::Local`], recoverable) or was injected
//! into it from outside ([`Severity::External`], must keep propagating).
//!
//! The decision is made by a [`Classifier`], an immutable registry of
//! [`KindMatcher`]s. The classifier walks the failure's source chain from the
//! outermost error inward and stops at the first link a matcher recognises:
//!
//! - a *local override* decides `Local` (the deadlock-on-wait kinds);
//! - an *external* matcher decides `External` (cancellation, kill, timeout);
//! - an *envelope* ([`Injected`]) is remembered and the walk continues into
//!   its payload. If nothing beneath it decides, the failure is `External`.
//!
//! Anything no matcher recognises is `Local`. Classification never fails.

pub mod matcher;
pub mod report;

use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};

use crate::failure::{
    BlockedIndefinitelyOnChannel, BlockedIndefinitelyOnSignal, Cancelled, Failure, Injected,
    Killed, TimedOut,
};

pub use matcher::{ExactKind, FnMatcher, KindMatcher, MessagePattern};
pub use report::FailureReport;

/// Severity class of a failure. `External` outranks `Local`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Originated in the running code path; may be recovered from.
    Local,
    /// Injected from another thread of control, a supervisor or a timeout.
    External,
}

impl Severity {
    pub fn is_local(self) -> bool {
        self == Severity::Local
    }

    pub fn is_external(self) -> bool {
        self == Severity::External
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Local => f.write_str("local"),
            Severity::External => f.write_str("external"),
        }
    }
}

/// The outcome of classifying one failure, with what decided it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// The severity class.
    pub severity: Severity,
    /// Name of the matcher that decided, `None` for the unknown-kind default.
    pub decided_by: Option<String>,
    /// Position in the source chain of the deciding link (0 = outermost).
    pub depth: Option<usize>,
}

impl Classification {
    fn decided(severity: Severity, matcher: &dyn KindMatcher, depth: usize) -> Self {
        Self {
            severity,
            decided_by: Some(matcher.name().to_string()),
            depth: Some(depth),
        }
    }

    fn unknown() -> Self {
        Self {
            severity: Severity::Local,
            decided_by: None,
            depth: None,
        }
    }
}

static BUILTIN: OnceLock<Classifier> = OnceLock::new();

/// Immutable registry of kind matchers.
///
/// Registration methods consume the classifier and return the augmented one;
/// a clone taken beforehand keeps classifying the old way.
#[derive(Clone)]
pub struct Classifier {
    external: Vec<Arc<dyn KindMatcher>>,
    local: Vec<Arc<dyn KindMatcher>>,
    envelopes: Vec<Arc<dyn KindMatcher>>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    /// Creates a classifier with the built-in kinds registered.
    pub fn new() -> Self {
        Self::builtin().clone()
    }

    /// A classifier with nothing registered: every failure is `Local`.
    pub fn bare() -> Self {
        Self {
            external: Vec::new(),
            local: Vec::new(),
            envelopes: Vec::new(),
        }
    }

    /// Shared instance of the built-in classifier.
    pub fn builtin() -> &'static Classifier {
        BUILTIN.get_or_init(|| {
            Classifier::bare()
                .with_external_kind::<Cancelled>()
                .with_external_kind::<Killed>()
                .with_external_kind::<TimedOut>()
                .with_local_kind::<BlockedIndefinitelyOnChannel>()
                .with_local_kind::<BlockedIndefinitelyOnSignal>()
                .with_envelope(ExactKind::<Injected>::new())
        })
    }

    /// Registers a matcher for externally injected kinds.
    pub fn with_external(mut self, matcher: impl KindMatcher + 'static) -> Self {
        self.external.push(Arc::new(matcher));
        self
    }

    /// Registers a matcher for kinds that stay `Local` even when injected.
    pub fn with_local(mut self, matcher: impl KindMatcher + 'static) -> Self {
        self.local.push(Arc::new(matcher));
        self
    }

    /// Registers a delivery envelope.
    pub fn with_envelope(mut self, matcher: impl KindMatcher + 'static) -> Self {
        self.envelopes.push(Arc::new(matcher));
        self
    }

    /// Registers the error type `E` as externally injected.
    pub fn with_external_kind<E: StdError + 'static>(self) -> Self {
        self.with_external(ExactKind::<E>::new())
    }

    /// Registers the error type `E` as forced-local.
    pub fn with_local_kind<E: StdError + 'static>(self) -> Self {
        self.with_local(ExactKind::<E>::new())
    }

    /// Total number of registered matchers.
    pub fn matcher_count(&self) -> usize {
        self.external.len() + self.local.len() + self.envelopes.len()
    }

    /// Classifies a failure.
    pub fn classify(&self, failure: &Failure) -> Severity {
        self.explain(failure).severity
    }

    /// Classifies a bare error and its source chain.
    pub fn classify_error(&self, error: &(dyn StdError + 'static)) -> Severity {
        self.decide(std::iter::successors(Some(error), |&link| link.source()))
            .severity
    }

    /// Classifies a failure and reports which matcher decided.
    pub fn explain(&self, failure: &Failure) -> Classification {
        let classification = self.decide(failure.chain());
        tracing::trace!(
            kind = %failure.kind(),
            severity = %classification.severity,
            decided_by = ?classification.decided_by,
            "classified failure"
        );
        classification
    }

    /// Builds a serialisable diagnostic snapshot of a failure.
    pub fn report(&self, failure: &Failure) -> FailureReport {
        FailureReport::new(self, failure)
    }

    fn decide<'a>(
        &self,
        chain: impl Iterator<Item = &'a (dyn StdError + 'static)>,
    ) -> Classification {
        let mut envelope: Option<Classification> = None;

        for (depth, link) in chain.enumerate() {
            if let Some(matcher) = find(&self.local, link) {
                return Classification::decided(Severity::Local, matcher, depth);
            }
            if let Some(matcher) = find(&self.external, link) {
                return Classification::decided(Severity::External, matcher, depth);
            }
            if envelope.is_none() {
                if let Some(matcher) = find(&self.envelopes, link) {
                    envelope = Some(Classification::decided(Severity::External, matcher, depth));
                }
            }
        }

        envelope.unwrap_or_else(Classification::unknown)
    }
}

fn find<'m>(
    matchers: &'m [Arc<dyn KindMatcher>],
    link: &(dyn StdError + 'static),
) -> Option<&'m dyn KindMatcher> {
    matchers
        .iter()
        .find(|matcher| matcher.matches(link))
        .map(|matcher| matcher.as_ref())
}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |matchers: &[Arc<dyn KindMatcher>]| -> Vec<String> {
            matchers.iter().map(|m| m.name().to_string()).collect()
        };
        f.debug_struct("Classifier")
            .field("external", &names(&self.external))
            .field("local", &names(&self.local))
            .field("envelopes", &names(&self.envelopes))
            .finish()
    }
}
