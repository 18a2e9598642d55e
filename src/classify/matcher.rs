//! Kind matchers: the extension point of the classification registry.
//!
//! A [`KindMatcher`] answers one question about a single link of a failure's
//! source chain: "is this one of mine?". The classifier keeps three ordered
//! lists of matchers (external kinds, forced-local kinds and envelopes) and
//! never needs to know how a matcher decides.

use std::error::Error as StdError;
use std::fmt;
use std::marker::PhantomData;

use regex::Regex;

/// Recognises a family of failure kinds.
pub trait KindMatcher: Send + Sync {
    /// Human-readable name, reported by
    /// [`Classifier::explain`](super::Classifier::explain).
    fn name(&self) -> &str;

    /// Checks one link of a failure's source chain.
    fn matches(&self, link: &(dyn StdError + 'static)) -> bool;
}

/// Matches exactly one concrete error type.
pub struct ExactKind<E> {
    name: &'static str,
    _kind: PhantomData<fn() -> E>,
}

impl<E: StdError + 'static> ExactKind<E> {
    pub fn new() -> Self {
        Self {
            name: std::any::type_name::<E>(),
            _kind: PhantomData,
        }
    }
}

impl<E: StdError + 'static> Default for ExactKind<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> fmt::Debug for ExactKind<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExactKind").field(&self.name).finish()
    }
}

impl<E: StdError + 'static> KindMatcher for ExactKind<E> {
    fn name(&self) -> &str {
        self.name
    }

    fn matches(&self, link: &(dyn StdError + 'static)) -> bool {
        link.is::<E>()
    }
}

/// Matches a link by its rendered message.
///
/// Useful for foreign errors that only carry text, e.g. an `io::Error`
/// built from a C library's "operation canceled" status. Matching on
/// messages is inherently fuzzy; prefer [`ExactKind`] when a type exists.
#[derive(Debug, Clone)]
pub struct MessagePattern {
    /// The compiled regex pattern.
    regex: Regex,
    /// What this pattern detects.
    description: String,
}

impl MessagePattern {
    /// Compiles `pattern` into a matcher.
    ///
    /// # Errors
    /// Returns the regex compilation error if `pattern` is invalid.
    pub fn new(pattern: &str, description: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self::with_regex(Regex::new(pattern)?, description))
    }

    /// Creates a matcher from a pre-compiled regex.
    pub fn with_regex(regex: Regex, description: impl Into<String>) -> Self {
        Self {
            regex,
            description: description.into(),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Checks the pattern against raw text.
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Finds the first match in the text and returns the matched string.
    pub fn find<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.regex.find(text).map(|m| m.as_str())
    }
}

impl KindMatcher for MessagePattern {
    fn name(&self) -> &str {
        &self.description
    }

    fn matches(&self, link: &(dyn StdError + 'static)) -> bool {
        self.regex.is_match(&link.to_string())
    }
}

/// A named predicate.
pub struct FnMatcher<F> {
    name: String,
    predicate: F,
}

impl<F> FnMatcher<F>
where
    F: Fn(&(dyn StdError + 'static)) -> bool + Send + Sync,
{
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

impl<F> fmt::Debug for FnMatcher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FnMatcher").field(&self.name).finish()
    }
}

impl<F> KindMatcher for FnMatcher<F>
where
    F: Fn(&(dyn StdError + 'static)) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, link: &(dyn StdError + 'static)) -> bool {
        (self.predicate)(link)
    }
}
