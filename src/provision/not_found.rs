//! Classification of "does not exist" and "already exists" responses.
//!
//! Only a positive absence signal lets provisioning create a resource.
//! Anything else seen during a lookup must surface as an error. A create
//! that loses a race to another creator is recognised by the conflict
//! signal and adopted instead of failing.

use crate::error::ApiError;

/// Decides whether a lookup error means the resource is absent.
pub trait NotFoundPredicate: Send + Sync {
    /// Returns true if `error` signals absence.
    fn is_not_found(&self, error: &ApiError) -> bool;
}

impl<F> NotFoundPredicate for F
where
    F: Fn(&ApiError) -> bool + Send + Sync,
{
    fn is_not_found(&self, error: &ApiError) -> bool {
        self(error)
    }
}

/// Default predicate: HTTP 404, known error codes, or absence wording.
#[derive(Debug, Clone)]
pub struct NotFoundMatcher {
    statuses: Vec<u16>,
    codes: Vec<u32>,
    patterns: Vec<String>,
}

impl Default for NotFoundMatcher {
    fn default() -> Self {
        Self {
            statuses: vec![404],
            // R2 "bucket does not exist" and the generic object-not-found code.
            codes: vec![10006, 7003],
            patterns: vec![String::from("not found"), String::from("does not exist")],
        }
    }
}

impl NotFoundMatcher {
    /// Creates the default matcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an error code that signals absence.
    #[must_use]
    pub fn with_code(mut self, code: u32) -> Self {
        self.codes.push(code);
        self
    }

    /// Adds a message fragment that signals absence (case-insensitive).
    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into().to_lowercase());
        self
    }
}

impl NotFoundPredicate for NotFoundMatcher {
    fn is_not_found(&self, error: &ApiError) -> bool {
        matches_signals(error, &self.statuses, &self.codes, &self.patterns)
    }
}

/// Decides whether a create error means the resource is already there.
pub trait AlreadyExistsPredicate: Send + Sync {
    /// Returns true if `error` signals that the resource exists.
    fn is_already_exists(&self, error: &ApiError) -> bool;
}

impl<F> AlreadyExistsPredicate for F
where
    F: Fn(&ApiError) -> bool + Send + Sync,
{
    fn is_already_exists(&self, error: &ApiError) -> bool {
        self(error)
    }
}

/// Default conflict predicate: HTTP 409, known error codes, or wording.
#[derive(Debug, Clone)]
pub struct AlreadyExistsMatcher {
    statuses: Vec<u16>,
    codes: Vec<u32>,
    patterns: Vec<String>,
}

impl Default for AlreadyExistsMatcher {
    fn default() -> Self {
        Self {
            statuses: vec![409],
            // R2 "bucket already exists".
            codes: vec![10004],
            patterns: vec![String::from("already exists")],
        }
    }
}

impl AlreadyExistsMatcher {
    /// Creates the default matcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an error code that signals an existing resource.
    #[must_use]
    pub fn with_code(mut self, code: u32) -> Self {
        self.codes.push(code);
        self
    }

    /// Adds a message fragment that signals an existing resource
    /// (case-insensitive).
    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into().to_lowercase());
        self
    }
}

impl AlreadyExistsPredicate for AlreadyExistsMatcher {
    fn is_already_exists(&self, error: &ApiError) -> bool {
        matches_signals(error, &self.statuses, &self.codes, &self.patterns)
    }
}

/// Only control-plane responses carry a signal; transport errors never do.
fn matches_signals(error: &ApiError, statuses: &[u16], codes: &[u32], patterns: &[String]) -> bool {
    let ApiError::RequestFailed {
        status,
        code,
        message,
    } = error
    else {
        return false;
    };

    if statuses.contains(status) {
        return true;
    }
    if code.is_some_and(|c| codes.contains(&c)) {
        return true;
    }
    let message = message.to_lowercase();
    patterns.iter().any(|p| message.contains(p.as_str()))
}
