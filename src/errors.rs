use std::fmt;

use thiserror::Error;

/// Specific reason the client-side claim gate rejected a withdrawal attempt.
///
/// The ledger re-validates eligibility on every `withdrawPayout` call; these
/// reasons exist so the caller can tell the user *which* precondition failed
/// without paying for a doomed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IneligibilityReason {
    NotRegistered,
    Expired,
    BelowThreshold,
    AlreadyClaimed,
    PoolEmpty,
}

impl fmt::Display for IneligibilityReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IneligibilityReason::NotRegistered => write!(f, "account is not registered"),
            IneligibilityReason::Expired => write!(f, "coverage period has expired"),
            IneligibilityReason::BelowThreshold => {
                write!(f, "price decline is below the crash threshold")
            }
            IneligibilityReason::AlreadyClaimed => write!(f, "payout has already been claimed"),
            IneligibilityReason::PoolEmpty => write!(f, "payout pool cannot cover the claim"),
        }
    }
}

/// Closed error taxonomy surfaced by every public controller operation.
///
/// Low-level wallet and ledger failures are normalized into one of these
/// variants at the module boundary; nothing below this type escapes to the
/// caller.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControllerError {
    /// No wallet available. Fatal to the whole session, not retryable.
    #[error("no wallet provider available")]
    NoProvider,

    /// User declined a wallet prompt. Recoverable, resubmission allowed.
    #[error("request rejected in the wallet")]
    UserRejected,

    /// Required chain unavailable or rejected. Fatal to the connect attempt.
    #[error("failed to switch to the required network: {0}")]
    NetworkSwitch(String),

    /// Amount failed local validation before any ledger call.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Pre-flight balance check failed; no ledger write was attempted.
    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: u128, need: u128 },

    /// Pre-flight allowance check failed; no ledger write was attempted.
    #[error("insufficient allowance: have {have}, need {need}")]
    InsufficientAllowance { have: u128, need: u128 },

    #[error("account is not registered")]
    NotRegistered,

    #[error("account is already registered")]
    AlreadyRegistered,

    #[error("due date must be at least {min_days} days from now")]
    InvalidDueDate { min_days: u64 },

    #[error("claim not eligible: {0}")]
    NotEligible(IneligibilityReason),

    /// Non-owner attempted an owner-only operation.
    #[error("operation restricted to the contract owner")]
    Unauthorized,

    /// Concurrency guard tripped: another mutating intent is in flight.
    #[error("another operation is already in flight")]
    OperationInProgress,

    /// No valid session, or the wallet account/network changed since the last
    /// refresh. Reconnect and refresh before retrying.
    #[error("wallet session is missing or stale; refresh required")]
    StaleSession,

    /// The approval step of an allowance-gated transfer failed. The balance
    /// check already passed, so this is distinguishable from insufficient
    /// funds, and the allowance has not moved.
    #[error("approval failed: {0}")]
    ApprovalFailed(#[source] Box<ControllerError>),

    /// The spend step failed after a successful approval. The allowance has
    /// already moved; retries must re-check allowance rather than re-approve.
    #[error("spend failed: {0}")]
    SpendFailed(#[source] Box<ControllerError>),

    /// Revert reason not otherwise classified. Deliberate fallback bucket,
    /// carrying the raw reason and selector for display.
    #[error("ledger revert: {reason}")]
    LedgerRevert {
        reason: String,
        selector: Option<String>,
    },

    /// Transport or timeout failure on a read. Recoverable; does not poison
    /// the session.
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),
}

impl ControllerError {
    /// Whether resubmitting the same intent can reasonably succeed without
    /// any other state change.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ControllerError::UserRejected
                | ControllerError::OperationInProgress
                | ControllerError::LedgerUnavailable(_)
        )
    }
}

/// Caller-visible status of a write operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Success,
    /// Submitted to the ledger but not yet confirmed. Once a write reaches
    /// this state it can no longer be cancelled.
    Pending,
    Failed,
}

/// Outcome of every public write operation.
///
/// Public operations never panic or return a bare error past this boundary;
/// failures are folded into `error` with `status == Failed`.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    pub status: OperationStatus,
    /// Transaction reference for external verification, when one exists.
    pub tx_ref: Option<String>,
    pub error: Option<ControllerError>,
}

impl OperationResult {
    pub fn success(tx_ref: impl Into<String>) -> Self {
        OperationResult {
            status: OperationStatus::Success,
            tx_ref: Some(tx_ref.into()),
            error: None,
        }
    }

    pub fn pending(tx_ref: impl Into<String>) -> Self {
        OperationResult {
            status: OperationStatus::Pending,
            tx_ref: Some(tx_ref.into()),
            error: None,
        }
    }

    pub fn failed(error: ControllerError) -> Self {
        OperationResult {
            status: OperationStatus::Failed,
            tx_ref: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OperationStatus::Success
    }
}

impl From<Result<String, ControllerError>> for OperationResult {
    fn from(result: Result<String, ControllerError>) -> Self {
        match result {
            Ok(tx_ref) => OperationResult::success(tx_ref),
            Err(err) => OperationResult::failed(err),
        }
    }
}
