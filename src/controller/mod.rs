// Lifecycle orchestrator: sequences registration, premium payment, crash
// monitoring, claim, and the owner-only pool funding path over the session
// manager, state store, and transfer protocol. Owns the one-in-flight
// concurrency guard; performs no silent retries.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::Mutex;

use crate::config::ControllerConfig;
use crate::errors::{ControllerError, IneligibilityReason, OperationResult};
use crate::ledger::{normalize_ledger_error, Asset, LedgerClient, TxRef};
use crate::policy::{AccountState, RefreshOutcome, StateStore};
use crate::transfer::{run_transfer, TransferIntent, TransferPurpose};
use crate::utils::current_time;
use crate::wallet::{SessionChange, SessionManager, WalletProvider, WalletSession};


/// Client-side controller for the on-chain insurance lifecycle.
///
/// All public write operations resolve to an [`OperationResult`]; nothing
/// panics or leaks a raw ledger failure past this type. At most one mutating
/// intent is in flight at a time; a second submission while one is pending is
/// rejected, never queued, to avoid nonce ordering ambiguity on the ledger.
pub struct InsuranceController<P: WalletProvider, L: LedgerClient> {
    config: ControllerConfig,
    sessions: SessionManager<P>,
    ledger: Arc<L>,
    store: StateStore<L>,
    in_flight: Mutex<()>,
}

impl<P: WalletProvider, L: LedgerClient> InsuranceController<P, L> {
    pub fn new(config: ControllerConfig, provider: P, ledger: Arc<L>) -> Self {
        let sessions = SessionManager::new(provider, config.network.clone());
        let store = StateStore::new(ledger.clone(), config.contracts.logic_address.clone());
        InsuranceController {
            config,
            sessions,
            ledger,
            store,
            in_flight: Mutex::new(()),
        }
    }

    /// Establish the wallet session and perform the initial state refresh.
    /// A degraded refresh (partial reads) still succeeds; the caller can
    /// inspect the outcome and show partial data.
    pub async fn connect(&self) -> Result<(WalletSession, RefreshOutcome), ControllerError> {
        let session = self.sessions.connect().await?;
        let outcome = self.store.refresh(&session).await?;
        Ok((session, outcome))
    }

    pub fn active_session(&self) -> Option<WalletSession> {
        self.sessions.active_session()
    }

    /// Forward a wallet accounts-changed notification. Any identity change
    /// discards every cached snapshot; mutating operations are rejected until
    /// a refresh completes under the new identity.
    pub fn handle_accounts_changed(&self, accounts: &[String]) -> SessionChange {
        let change = self.sessions.handle_accounts_changed(accounts);
        if change != SessionChange::Unchanged {
            self.store.invalidate();
        }
        change
    }

    /// Forward a wallet chain-changed notification.
    pub fn handle_chain_changed(&self, chain_id: u64) -> SessionChange {
        let change = self.sessions.handle_chain_changed(chain_id);
        if change != SessionChange::Unchanged {
            self.store.invalidate();
        }
        change
    }

    /// Re-read all snapshots for the active session.
    pub async fn refresh(&self) -> Result<RefreshOutcome, ControllerError> {
        let session = self.require_session()?;
        self.store.refresh(&session).await
    }

    /// Latest cached state for the active session, if still valid.
    pub fn cached_state(&self) -> Option<AccountState> {
        let session = self.sessions.active_session()?;
        self.store.cached(&session)
    }

    /// Register the account for coverage of `asset` until `due_date_epoch`.
    ///
    /// Preconditions checked locally before the single write: session
    /// connected and refreshed, due date at least the configured minimum out,
    /// account not already active. The ledger enforces the same rules and its
    /// reverts are normalized to the identical error kinds.
    pub async fn register(&self, asset: Asset, due_date_epoch: u64) -> OperationResult {
        let _guard = match self.begin_write() {
            Ok(guard) => guard,
            Err(err) => return OperationResult::failed(err),
        };
        self.register_inner(asset, due_date_epoch).await.into()
    }

    async fn register_inner(
        &self,
        asset: Asset,
        due_date_epoch: u64,
    ) -> Result<TxRef, ControllerError> {
        let session = self.require_session()?;
        let state = self.require_fresh_state(&session)?;

        let min_due = current_time() + self.config.min_due_date_days * 86_400;
        if due_date_epoch < min_due {
            return Err(ControllerError::InvalidDueDate {
                min_days: self.config.min_due_date_days,
            });
        }
        if state.policy.is_active {
            return Err(ControllerError::AlreadyRegistered);
        }

        info!(
            "Registering {} coverage for {} until {}",
            asset, session.address, due_date_epoch
        );
        let tx_ref = self
            .ledger
            .register(&session.address, asset, due_date_epoch)
            .await
            .map_err(|err| normalize_ledger_error(err, &self.config.reverts))?;
        self.refresh_after_confirmation(&session).await;
        Ok(tx_ref)
    }

    /// Pay a premium of `amount` (scaled integer) through the
    /// allowance-gated transfer protocol.
    pub async fn pay_premium(&self, amount: u128) -> OperationResult {
        let _guard = match self.begin_write() {
            Ok(guard) => guard,
            Err(err) => return OperationResult::failed(err),
        };
        self.transfer_inner(amount, TransferPurpose::PremiumPayment)
            .await
            .into()
    }

    /// Top up the shared payout pool. Owner-only; rejected locally before any
    /// ledger call for everyone else.
    pub async fn fund_pool(&self, amount: u128) -> OperationResult {
        let _guard = match self.begin_write() {
            Ok(guard) => guard,
            Err(err) => return OperationResult::failed(err),
        };
        self.transfer_inner(amount, TransferPurpose::PoolFunding)
            .await
            .into()
    }

    async fn transfer_inner(
        &self,
        amount: u128,
        purpose: TransferPurpose,
    ) -> Result<TxRef, ControllerError> {
        let session = self.require_session()?;
        let state = self.require_fresh_state(&session)?;

        match purpose {
            TransferPurpose::PremiumPayment => {
                if !state.policy.is_active {
                    return Err(ControllerError::NotRegistered);
                }
            }
            TransferPurpose::PoolFunding => {
                if !state.pool.is_caller_owner {
                    return Err(ControllerError::Unauthorized);
                }
            }
        }

        let intent = TransferIntent {
            spender: self.config.contracts.logic_address.clone(),
            amount,
            purpose,
        };
        let tx_ref = run_transfer(
            self.ledger.as_ref(),
            &self.config.reverts,
            &session.address,
            &intent,
        )
        .await?;
        self.refresh_after_confirmation(&session).await;
        Ok(tx_ref)
    }

    /// Claim the payout for a crashed covered asset.
    ///
    /// Eligibility is gated client-side from the last refreshed crash status
    /// to avoid a wasted write, with a specific reason for user messaging.
    /// This gate is UX only; the ledger re-validates on the withdrawal call.
    pub async fn claim(&self) -> OperationResult {
        let _guard = match self.begin_write() {
            Ok(guard) => guard,
            Err(err) => return OperationResult::failed(err),
        };
        self.claim_inner().await.into()
    }

    async fn claim_inner(&self) -> Result<TxRef, ControllerError> {
        let session = self.require_session()?;
        let state = self.require_fresh_state(&session)?;

        if let Some(reason) = claim_ineligibility(&state) {
            debug!("Claim gate rejected for {}: {}", session.address, reason);
            return Err(ControllerError::NotEligible(reason));
        }

        info!(
            "Submitting payout claim for {} ({}% crash, {}% coverage)",
            session.address, state.crash.crash_percentage, state.crash.coverage_percent
        );
        let tx_ref = self
            .ledger
            .withdraw_payout()
            .await
            .map_err(|err| normalize_ledger_error(err, &self.config.reverts))?;
        self.refresh_after_confirmation(&session).await;
        Ok(tx_ref)
    }

    /// Testnet-only: request funds from the mock payment token's faucet.
    /// Goes through the same in-flight guard as every other write; the token
    /// contract enforces the faucet limit and its revert surfaces as-is.
    pub async fn request_test_funds(&self) -> OperationResult {
        let _guard = match self.begin_write() {
            Ok(guard) => guard,
            Err(err) => return OperationResult::failed(err),
        };
        self.faucet_inner().await.into()
    }

    async fn faucet_inner(&self) -> Result<TxRef, ControllerError> {
        let session = self.require_session()?;
        let tx_ref = self
            .ledger
            .faucet()
            .await
            .map_err(|err| normalize_ledger_error(err, &self.config.reverts))?;
        self.refresh_after_confirmation(&session).await;
        Ok(tx_ref)
    }

    fn begin_write(&self) -> Result<tokio::sync::MutexGuard<'_, ()>, ControllerError> {
        self.in_flight
            .try_lock()
            .map_err(|_| ControllerError::OperationInProgress)
    }

    fn require_session(&self) -> Result<WalletSession, ControllerError> {
        self.sessions
            .active_session()
            .filter(|session| session.connected)
            .ok_or(ControllerError::StaleSession)
    }

    /// Mutating operations must run against a snapshot taken under the
    /// current identity; anything cached before an account or network change
    /// has been discarded already.
    fn require_fresh_state(&self, session: &WalletSession) -> Result<AccountState, ControllerError> {
        self.store
            .cached(session)
            .ok_or(ControllerError::StaleSession)
    }

    /// One refresh per confirmed write, after a short fixed delay so lagging
    /// read replicas catch up to the transaction.
    async fn refresh_after_confirmation(&self, session: &WalletSession) {
        let delay = Duration::from_millis(self.config.refresh_delay_ms);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Err(err) = self.store.refresh(session).await {
            // The write already confirmed; a failed follow-up read must not
            // turn the operation into a failure.
            warn!("Post-confirmation refresh failed: {}", err);
        }
    }
}

/// Specific reason the claim gate fails, or `None` when eligible.
fn claim_ineligibility(state: &AccountState) -> Option<IneligibilityReason> {
    let policy = &state.policy;
    let crash = &state.crash;
    if policy.registered_asset.is_none() {
        return Some(IneligibilityReason::NotRegistered);
    }
    if policy.has_claimed {
        return Some(IneligibilityReason::AlreadyClaimed);
    }
    if !policy.is_active || !crash.is_active {
        return Some(IneligibilityReason::Expired);
    }
    if !crash.is_crashed {
        return Some(IneligibilityReason::BelowThreshold);
    }
    if !crash.can_claim {
        // Active, crashed, unclaimed, yet the ledger says no: the pool
        // cannot cover the payout.
        return Some(IneligibilityReason::PoolEmpty);
    }
    None
}
