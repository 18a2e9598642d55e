//! failguard - severity-aware failure handling and cleanup arbitration
//!
//! Failures are split into two classes. A *local* failure originated in the
//! code that is running and may be recovered from. An *external* failure was
//! injected from outside (cancellation, a supervisor kill, a timeout) and
//! must keep propagating.
//!
//! - [`classify`] decides the class of a [`Failure`].
//! - [`guarded`] provides catch/try/handle that only intercept local failures.
//! - [`arbiter`] provides the bracket family, where cleanup always runs and
//!   an external failure on either side always wins the merge.
//! - [`future`] mirrors both for async code.
//! - [`interrupt`] lets another thread or task throw a failure into a
//!   running one.
//!
//! ```
//! use failguard::{arbiter, Failure};
//!
//! let outcome: Result<(), Failure> = arbiter::finally(
//!     || Err(Failure::msg("disk full")),
//!     || Ok(()),
//! );
//! assert_eq!(outcome.unwrap_err().to_string(), "disk full");
//! ```

pub mod arbiter;
pub mod classify;
pub mod failure;
pub mod future;
pub mod guarded;
pub mod interrupt;
pub mod logging;
pub mod settings;
pub mod unguarded;

pub use arbiter::{Arbiter, ExitCase, OutcomePair, TieBreak};
pub use classify::{Classification, Classifier, FailureReport, KindMatcher, Severity};
pub use failure::{capture, Failure, Kind};
pub use interrupt::{Cx, Injector, Watchdog};
pub use settings::{Settings, SettingsError};
pub use unguarded::InterceptsExternal;
