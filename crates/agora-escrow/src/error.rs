use crate::task::TaskStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EscrowError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// A normal outcome of payment verification, not a fault: the caller is
    /// re-issued the payment challenge.
    #[error("Payment not verified: {0}")]
    PaymentNotVerified(String),

    /// A conditional update failed because another actor already transitioned
    /// the task. Carries the state the task was actually in.
    #[error("Task status is {current}, expected {expected}")]
    StateConflict {
        current: TaskStatus,
        expected: String,
    },

    /// The ledger endpoint was unreachable or timed out before anything was
    /// submitted. Retryable without side effects.
    #[error("Ledger temporarily unavailable: {0}")]
    LedgerTransient(String),

    #[error("Settlement failed: {0}")]
    SettlementFailed(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl EscrowError {
    pub fn state_conflict(current: TaskStatus, expected: &[TaskStatus]) -> Self {
        let expected = expected
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(" or ");
        EscrowError::StateConflict { current, expected }
    }
}

pub type Result<T> = std::result::Result<T, EscrowError>;
