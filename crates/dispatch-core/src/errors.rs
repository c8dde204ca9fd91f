//! Dispatch error taxonomy.
//!
//! Every variant is recoverable by the caller and names the offending line
//! and lot where one exists, so the dispatcher can be re-prompted.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Discriminant of a [`DispatchError`], for matching without payloads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnknownLot,
    InvalidQuantity,
    LineOverAllocated,
    LineUnderAllocated,
    InfeasibleCompleteMode,
    EmptyPartialDispatch,
    MissingCancellationReason,
    StaleAllocation,
    UnknownLine,
    InvalidInput,
    SessionClosed,
    Rejected,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Lot {lot_id} is not in the snapshot for line {line_id}")]
    UnknownLot { line_id: String, lot_id: String },

    #[error("Invalid quantity {quantity} for lot {lot_id} on line {line_id} ({available} available)")]
    InvalidQuantity {
        line_id: String,
        lot_id: String,
        quantity: i64,
        available: u32,
    },

    #[error("Line {line_id} over-allocated: {allocated} of {required}")]
    LineOverAllocated {
        line_id: String,
        required: u32,
        allocated: u64,
    },

    #[error("Line {line_id} not satisfied: {allocated} of {required}")]
    LineUnderAllocated {
        line_id: String,
        required: u32,
        allocated: u64,
    },

    #[error("Complete dispatch infeasible for line {line_id}: {available} of {required} in stock")]
    InfeasibleCompleteMode {
        line_id: String,
        medication_id: String,
        required: u32,
        available: u64,
    },

    #[error("Partial dispatch has no allocated units")]
    EmptyPartialDispatch,

    #[error("Cancellation requires a reason")]
    MissingCancellationReason,

    #[error("Allocation of {quantity} from lot {lot_id} on line {line_id} is stale ({available} available now)")]
    StaleAllocation {
        line_id: String,
        lot_id: String,
        quantity: u32,
        available: u32,
    },

    #[error("Unknown prescription line: {0}")]
    UnknownLine(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Session is {state}, no further changes allowed")]
    SessionClosed { state: String },

    #[error("Confirmation rejected: {} failing check(s)", .0.len())]
    Rejected(Vec<DispatchError>),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::UnknownLot { .. } => ErrorKind::UnknownLot,
            DispatchError::InvalidQuantity { .. } => ErrorKind::InvalidQuantity,
            DispatchError::LineOverAllocated { .. } => ErrorKind::LineOverAllocated,
            DispatchError::LineUnderAllocated { .. } => ErrorKind::LineUnderAllocated,
            DispatchError::InfeasibleCompleteMode { .. } => ErrorKind::InfeasibleCompleteMode,
            DispatchError::EmptyPartialDispatch => ErrorKind::EmptyPartialDispatch,
            DispatchError::MissingCancellationReason => ErrorKind::MissingCancellationReason,
            DispatchError::StaleAllocation { .. } => ErrorKind::StaleAllocation,
            DispatchError::UnknownLine(_) => ErrorKind::UnknownLine,
            DispatchError::InvalidInput(_) => ErrorKind::InvalidInput,
            DispatchError::SessionClosed { .. } => ErrorKind::SessionClosed,
            DispatchError::Rejected(_) => ErrorKind::Rejected,
        }
    }

    /// Line the error refers to, if it is line-scoped.
    pub fn line_id(&self) -> Option<&str> {
        match self {
            DispatchError::UnknownLot { line_id, .. }
            | DispatchError::InvalidQuantity { line_id, .. }
            | DispatchError::LineOverAllocated { line_id, .. }
            | DispatchError::LineUnderAllocated { line_id, .. }
            | DispatchError::InfeasibleCompleteMode { line_id, .. }
            | DispatchError::StaleAllocation { line_id, .. } => Some(line_id),
            DispatchError::UnknownLine(line_id) => Some(line_id),
            _ => None,
        }
    }

    /// Lot the error refers to, if any.
    pub fn lot_id(&self) -> Option<&str> {
        match self {
            DispatchError::UnknownLot { lot_id, .. }
            | DispatchError::InvalidQuantity { lot_id, .. }
            | DispatchError::StaleAllocation { lot_id, .. } => Some(lot_id),
            _ => None,
        }
    }

    /// Individual failures: the nested list for `Rejected`, otherwise `self`.
    pub fn failures(&self) -> Vec<&DispatchError> {
        match self {
            DispatchError::Rejected(failures) => failures.iter().collect(),
            other => vec![other],
        }
    }

    /// Whether this error, or any nested failure, has the given kind.
    pub fn has_kind(&self, kind: ErrorKind) -> bool {
        self.failures().iter().any(|failure| failure.kind() == kind)
    }

    /// Collapse a failure list: one failure is returned as-is, several are wrapped.
    pub(crate) fn from_failures(mut failures: Vec<DispatchError>) -> Self {
        if failures.len() == 1 {
            failures.remove(0)
        } else {
            DispatchError::Rejected(failures)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_failure_not_wrapped() {
        let err = DispatchError::from_failures(vec![DispatchError::EmptyPartialDispatch]);
        assert_eq!(err, DispatchError::EmptyPartialDispatch);
    }

    #[test]
    fn test_rejected_exposes_nested_kinds() {
        let err = DispatchError::from_failures(vec![
            DispatchError::StaleAllocation {
                line_id: "D1".into(),
                lot_id: "L1".into(),
                quantity: 10,
                available: 5,
            },
            DispatchError::LineUnderAllocated {
                line_id: "D2".into(),
                required: 4,
                allocated: 0,
            },
        ]);

        assert_eq!(err.kind(), ErrorKind::Rejected);
        assert!(err.has_kind(ErrorKind::StaleAllocation));
        assert!(err.has_kind(ErrorKind::LineUnderAllocated));
        assert!(!err.has_kind(ErrorKind::UnknownLot));
        assert_eq!(err.failures().len(), 2);
        assert_eq!(err.to_string(), "Confirmation rejected: 2 failing check(s)");
    }

    #[test]
    fn test_line_and_lot_accessors() {
        let err = DispatchError::UnknownLot {
            line_id: "D1".into(),
            lot_id: "L9".into(),
        };
        assert_eq!(err.line_id(), Some("D1"));
        assert_eq!(err.lot_id(), Some("L9"));
        assert_eq!(DispatchError::MissingCancellationReason.line_id(), None);
    }
}
