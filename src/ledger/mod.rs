// Ledger client boundary. The contract logic itself is external; this module
// defines the typed read/write surface the controller consumes and the decode
// step that turns raw ledger failures into the closed error taxonomy.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{RevertKind, RevertTable};
use crate::errors::ControllerError;

/// Hex-encoded account address as reported by the wallet provider.
pub type Address = String;

/// Transaction reference usable for external verification on an explorer.
pub type TxRef = String;

/// Covered asset, exchanged with the ledger as a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Asset {
    Btc = 0,
    Eth = 1,
}

impl Asset {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Asset::Btc),
            1 => Some(Asset::Eth),
            _ => None,
        }
    }

    pub fn ticker(&self) -> &'static str {
        match self {
            Asset::Btc => "BTC",
            Asset::Eth => "ETH",
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ticker())
    }
}

/// Raw coverage record as stored by the logic contract for one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRecord {
    pub wallet: Address,
    pub asset_code: u8,
    pub due_date: u64,
    pub premium_paid: u128,
    pub is_active: bool,
    pub has_claimed: bool,
}

/// Ledger-computed crash measurement for one account's covered asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CrashStatusRecord {
    pub crash_percentage: u64,
    pub is_crashed: bool,
    pub can_claim: bool,
    pub is_active: bool,
}

/// Aggregate pool accounting used to derive owner funding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolTotals {
    pub total_balance: u128,
    pub total_user_premiums: u128,
}

/// Role of an account with respect to the logic contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Owner,
    User,
}

/// Failure modes of the ledger transport, before normalization.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The user declined the transaction in their wallet.
    #[error("transaction rejected in the wallet")]
    Rejected,

    /// The ledger executed the call and reverted. `selector` carries the
    /// 4-byte custom error selector when the transport could extract one.
    #[error("execution reverted: {reason}")]
    Reverted {
        selector: Option<String>,
        reason: String,
    },

    /// Transport failure: the call never reached the ledger or the response
    /// was lost.
    #[error("ledger transport failure: {0}")]
    Unavailable(String),

    /// The ledger answered with something the client could not decode.
    #[error("malformed ledger response: {0}")]
    MalformedResponse(String),
}

/// Read/write surface of the ledger consumed by the controller.
///
/// All writes resolve only once the ledger has confirmed the transaction;
/// a returned `TxRef` means confirmed, not merely submitted. Reads are
/// idempotent and side-effect free.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    // Reads
    async fn balance_of(&self, account: &Address) -> Result<u128, LedgerError>;
    async fn allowance(&self, owner: &Address, spender: &Address) -> Result<u128, LedgerError>;
    /// `None` when the account has never registered.
    async fn policy_record(&self, account: &Address) -> Result<Option<PolicyRecord>, LedgerError>;
    async fn crash_status(&self, account: &Address) -> Result<CrashStatusRecord, LedgerError>;
    /// Payout tier for the account's current crash depth, in percent.
    async fn coverage_percentage(&self, account: &Address) -> Result<u64, LedgerError>;
    async fn pool_totals(&self) -> Result<PoolTotals, LedgerError>;
    async fn role_of(&self, account: &Address) -> Result<Role, LedgerError>;

    // Writes
    async fn approve(&self, spender: &Address, amount: u128) -> Result<TxRef, LedgerError>;
    async fn register(
        &self,
        account: &Address,
        asset: Asset,
        due_date_epoch: u64,
    ) -> Result<TxRef, LedgerError>;
    async fn pay_premium(&self, amount: u128) -> Result<TxRef, LedgerError>;
    async fn withdraw_payout(&self) -> Result<TxRef, LedgerError>;
    async fn fund_pool(&self, amount: u128) -> Result<TxRef, LedgerError>;
    /// Testnet-only: mint test funds from the mock token's faucet. The token
    /// contract enforces the per-account limit and reverts past it.
    async fn faucet(&self) -> Result<TxRef, LedgerError>;
}

/// Normalize a raw ledger failure into the closed taxonomy.
///
/// Revert classification is table-driven: the selector table is part of the
/// deployment configuration, not hardcoded string matching against revert
/// messages.
pub fn normalize_ledger_error(err: LedgerError, reverts: &RevertTable) -> ControllerError {
    match err {
        LedgerError::Rejected => ControllerError::UserRejected,
        LedgerError::Unavailable(msg) => ControllerError::LedgerUnavailable(msg),
        LedgerError::MalformedResponse(msg) => ControllerError::LedgerUnavailable(msg),
        LedgerError::Reverted { selector, reason } => {
            let kind = selector.as_deref().and_then(|s| reverts.lookup(s));
            match kind {
                Some(RevertKind::InvalidAmount) => ControllerError::InvalidAmount(reason),
                Some(RevertKind::NotRegistered) => ControllerError::NotRegistered,
                Some(RevertKind::AlreadyRegistered) => ControllerError::AlreadyRegistered,
                Some(RevertKind::InvalidDueDate) => ControllerError::InvalidDueDate {
                    min_days: crate::config::MIN_DUE_DATE_DAYS,
                },
                Some(RevertKind::Unauthorized) => ControllerError::Unauthorized,
                // Invalid address and Error(string) stay in the fallback
                // bucket with their reason preserved for display.
                Some(RevertKind::InvalidAddress) | Some(RevertKind::ErrorString) | None => {
                    ControllerError::LedgerRevert { reason, selector }
                }
            }
        }
    }
}
