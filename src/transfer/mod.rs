// Allowance-gated transfer protocol: the reusable approve-then-spend sequence
// behind premium payment and pool funding. The value-holding token is a
// separate contract from the logic that spends it, so any transfer larger
// than the current allowance needs an approval first.

use std::fmt;

use log::{debug, info};

use crate::config::RevertTable;
use crate::errors::ControllerError;
use crate::ledger::{normalize_ledger_error, Address, LedgerClient, TxRef};


/// What the transfer pays for; selects the spend call on the logic contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPurpose {
    PremiumPayment,
    PoolFunding,
}

impl fmt::Display for TransferPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferPurpose::PremiumPayment => write!(f, "premium payment"),
            TransferPurpose::PoolFunding => write!(f, "pool funding"),
        }
    }
}

/// Ephemeral intent driving one approve-then-spend sequence. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferIntent {
    pub spender: Address,
    pub amount: u128,
    pub purpose: TransferPurpose,
}

/// Phase of the transfer state machine, visible in logs and useful for
/// callers that surface progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    Idle,
    CheckingBalance,
    CheckingAllowance,
    Approving,
    Spending,
    Confirmed,
}

/// Run one allowance-gated transfer to completion.
///
/// Sequence: balance check, allowance check, approval only when the current
/// allowance is short (and then for exactly the requested amount, never
/// unlimited), then the spend. No step is retried automatically; every
/// terminal failure surfaces to the caller, who resubmits from idle.
///
/// Failure of the approve step is reported as `ApprovalFailed` and failure of
/// the spend step as `SpendFailed`: after a successful approval the allowance
/// has already moved, so a retry must re-check allowance rather than blindly
/// re-approve.
pub async fn run_transfer<L: LedgerClient>(
    ledger: &L,
    reverts: &RevertTable,
    owner: &Address,
    intent: &TransferIntent,
) -> Result<TxRef, ControllerError> {
    if intent.amount == 0 {
        return Err(ControllerError::InvalidAmount(
            "amount must be greater than zero".to_string(),
        ));
    }

    let mut phase = TransferPhase::CheckingBalance;
    debug!(
        "Transfer ({}) of {} for {}: {:?}",
        intent.purpose, intent.amount, owner, phase
    );
    let balance = ledger
        .balance_of(owner)
        .await
        .map_err(|err| normalize_ledger_error(err, reverts))?;
    if balance < intent.amount {
        return Err(ControllerError::InsufficientBalance {
            have: balance,
            need: intent.amount,
        });
    }

    phase = TransferPhase::CheckingAllowance;
    debug!("Transfer ({}): {:?}", intent.purpose, phase);
    let allowance = ledger
        .allowance(owner, &intent.spender)
        .await
        .map_err(|err| normalize_ledger_error(err, reverts))?;

    if allowance < intent.amount {
        // Approve exactly the requested amount. Skipped entirely when the
        // standing allowance already covers it, saving the second signature
        // and its gas on repeat payments.
        phase = TransferPhase::Approving;
        debug!(
            "Transfer ({}): {:?} (allowance {} < {})",
            intent.purpose, phase, allowance, intent.amount
        );
        let approval_tx = ledger
            .approve(&intent.spender, intent.amount)
            .await
            .map_err(|err| {
                ControllerError::ApprovalFailed(Box::new(normalize_ledger_error(err, reverts)))
            })?;
        debug!("Approval confirmed: {}", approval_tx);
    } else {
        debug!(
            "Transfer ({}): allowance {} covers {}, skipping approval",
            intent.purpose, allowance, intent.amount
        );
    }

    phase = TransferPhase::Spending;
    debug!("Transfer ({}): {:?}", intent.purpose, phase);
    let spend_result = match intent.purpose {
        TransferPurpose::PremiumPayment => ledger.pay_premium(intent.amount).await,
        TransferPurpose::PoolFunding => ledger.fund_pool(intent.amount).await,
    };
    let tx_ref = spend_result.map_err(|err| {
        ControllerError::SpendFailed(Box::new(normalize_ledger_error(err, reverts)))
    })?;

    phase = TransferPhase::Confirmed;
    info!(
        "Transfer ({}) of {} confirmed: {} ({:?})",
        intent.purpose, intent.amount, tx_ref, phase
    );
    Ok(tx_ref)
}
