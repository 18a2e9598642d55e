//! The four-way severity merge.
//!
//! When both an action and its cleanup have run, exactly one outcome is
//! reported:
//!
//! | action   | cleanup  | reported                          |
//! |----------|----------|-----------------------------------|
//! | ok       | ok       | the action's value                |
//! | ok       | failed   | the cleanup failure               |
//! | failed   | ok       | the action failure                |
//! | local    | local    | picked by [`TieBreak`]            |
//! | local    | external | the cleanup failure               |
//! | external | local    | the action failure                |
//! | external | external | picked by [`TieBreak`]            |
//!
//! An external failure always beats a local one. The failure that loses is
//! attached to the winner as suppressed, never dropped.

use serde::{Deserialize, Serialize};

use crate::classify::Classifier;
use crate::failure::Failure;

/// Which failure to report when both sides failed with the same severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Report the action's failure; the cleanup's is suppressed.
    #[default]
    PreferAction,
    /// Report the cleanup's failure; the action's is suppressed.
    PreferCleanup,
}

/// Outcomes of an action and of the cleanup that followed it.
#[derive(Debug)]
pub struct OutcomePair<T> {
    pub action: Result<T, Failure>,
    pub cleanup: Result<(), Failure>,
}

impl<T> OutcomePair<T> {
    pub fn new(action: Result<T, Failure>, cleanup: Result<(), Failure>) -> Self {
        Self { action, cleanup }
    }

    /// Collapses the pair into the single reported outcome.
    pub fn resolve(self, classifier: &Classifier, tie_break: TieBreak) -> Result<T, Failure> {
        match (self.action, self.cleanup) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(cleanup)) => Err(cleanup),
            (Err(action), Ok(())) => Err(action),
            (Err(action), Err(cleanup)) => Err(resolve(classifier, tie_break, action, cleanup)),
        }
    }
}

/// Picks the reported failure when both the action and its cleanup failed.
pub fn resolve(
    classifier: &Classifier,
    tie_break: TieBreak,
    action: Failure,
    cleanup: Failure,
) -> Failure {
    let action_severity = classifier.classify(&action);
    let cleanup_severity = classifier.classify(&cleanup);

    let action_wins = match action_severity.cmp(&cleanup_severity) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => tie_break == TieBreak::PreferAction,
    };

    let (mut winner, loser) = if action_wins {
        (action, cleanup)
    } else {
        (cleanup, action)
    };

    tracing::debug!(
        action = %action_severity,
        cleanup = %cleanup_severity,
        reported = %winner.kind(),
        suppressed = %loser.kind(),
        "merged action and cleanup failures"
    );

    winner.suppress(loser);
    winner
}
