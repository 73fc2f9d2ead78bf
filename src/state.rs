//! Tri-state outcome of a fetch cycle.

use crate::error::{DataError, ErrorKind, Result};

/// Outcome of a fetch cycle, as delivered to observers.
///
/// Every cycle publishes exactly one `Pending` followed by exactly one
/// terminal state. Consumers match exhaustively; there is no way to read a
/// payload without checking which variant is present.
#[derive(Clone, Debug, PartialEq)]
pub enum ResultState<T> {
    /// A fetch is in flight; no payload yet.
    Pending,

    /// The fetch completed; the value is owned by the consumer.
    Succeeded(T),

    /// The fetch failed. The message is display-ready, the kind is
    /// machine-checkable.
    Failed { message: String, kind: ErrorKind },
}

impl<T> ResultState<T> {
    /// Build a `Failed` state from an adapter error.
    pub fn failure(err: &DataError) -> Self {
        ResultState::Failed {
            message: err.to_string(),
            kind: err.kind(),
        }
    }

    /// Normalize an adapter result into a terminal state.
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => ResultState::Succeeded(value),
            Err(err) => ResultState::failure(&err),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, ResultState::Pending)
    }

    /// True for `Succeeded` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }

    /// The payload, if this is a `Succeeded`.
    pub fn succeeded(&self) -> Option<&T> {
        match self {
            ResultState::Succeeded(value) => Some(value),
            _ => None,
        }
    }

    /// The error kind, if this is a `Failed`.
    pub fn failed_kind(&self) -> Option<ErrorKind> {
        match self {
            ResultState::Failed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Map the success payload, leaving the other variants untouched.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> ResultState<U> {
        match self {
            ResultState::Pending => ResultState::Pending,
            ResultState::Succeeded(value) => ResultState::Succeeded(f(value)),
            ResultState::Failed { message, kind } => ResultState::Failed { message, kind },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_result_ok() {
        let state = ResultState::from_result(Ok(3));
        assert_eq!(state, ResultState::Succeeded(3));
        assert!(state.is_terminal());
        assert_eq!(state.succeeded(), Some(&3));
    }

    #[test]
    fn test_from_result_err() {
        let state: ResultState<i32> =
            ResultState::from_result(Err(DataError::Network("timed out".into())));
        assert_eq!(state.failed_kind(), Some(ErrorKind::Network));
        match state {
            ResultState::Failed { message, .. } => assert!(message.contains("timed out")),
            _ => panic!("expected Failed"),
        }
    }

    #[test]
    fn test_map_preserves_failure() {
        let state: ResultState<i32> =
            ResultState::from_result(Err(DataError::Store("broken".into())));
        let mapped = state.map(|n| n.to_string());
        assert_eq!(mapped.failed_kind(), Some(ErrorKind::Store));
    }

    #[test]
    fn test_pending_has_no_payload() {
        let state: ResultState<Vec<u8>> = ResultState::Pending;
        assert!(state.is_pending());
        assert!(state.succeeded().is_none());
        assert!(state.failed_kind().is_none());
    }
}
