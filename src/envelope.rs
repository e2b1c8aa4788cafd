//! Three-way outcome returned by every repository call

use std::fmt::Display;

/// Outcome of a remote call.
///
/// One-shot calls resolve to `Success` or `Failure`. `Loading` only shows up
/// on streamed call sites, where it marks an intermediate "still working"
/// state. It is never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultEnvelope<T> {
    Success(T),
    Failure(String),
    Loading,
}

impl<T> ResultEnvelope<T> {
    /// Build a failure from anything printable
    pub fn failure(message: impl Display) -> Self {
        ResultEnvelope::Failure(message.to_string())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResultEnvelope::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ResultEnvelope::Failure(_))
    }

    /// `Success` and `Failure` end a call; `Loading` does not.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResultEnvelope::Loading)
    }

    pub fn as_ref(&self) -> ResultEnvelope<&T> {
        match self {
            ResultEnvelope::Success(value) => ResultEnvelope::Success(value),
            ResultEnvelope::Failure(message) => ResultEnvelope::Failure(message.clone()),
            ResultEnvelope::Loading => ResultEnvelope::Loading,
        }
    }

    pub fn map<U, F>(self, f: F) -> ResultEnvelope<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            ResultEnvelope::Success(value) => ResultEnvelope::Success(f(value)),
            ResultEnvelope::Failure(message) => ResultEnvelope::Failure(message),
            ResultEnvelope::Loading => ResultEnvelope::Loading,
        }
    }

    /// The success value, if any
    pub fn success(self) -> Option<T> {
        match self {
            ResultEnvelope::Success(value) => Some(value),
            _ => None,
        }
    }

    /// The failure message, if any
    pub fn failure_message(&self) -> Option<&str> {
        match self {
            ResultEnvelope::Failure(message) => Some(message),
            _ => None,
        }
    }

    /// Collapse a terminal envelope into a `Result`.
    ///
    /// Returns `None` for `Loading`.
    pub fn into_result(self) -> Option<Result<T, String>> {
        match self {
            ResultEnvelope::Success(value) => Some(Ok(value)),
            ResultEnvelope::Failure(message) => Some(Err(message)),
            ResultEnvelope::Loading => None,
        }
    }
}

impl<T, E: Display> From<Result<T, E>> for ResultEnvelope<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => ResultEnvelope::Success(value),
            Err(err) => ResultEnvelope::Failure(err.to_string()),
        }
    }
}
