// Policy state store: the authoritative in-memory snapshot of one account's
// registration, balances, allowance, and crash/claim status. Snapshots are
// replaced wholesale on refresh and are scoped to exactly one
// (address, chain id) pair; any identity change discards them.

use std::sync::Arc;

use log::{debug, warn};
use parking_lot::RwLock;

use crate::errors::ControllerError;
use crate::ledger::{Address, Asset, CrashStatusRecord, LedgerClient, LedgerError, Role};
use crate::utils::same_address;
use crate::wallet::WalletSession;


/// Coverage snapshot for the current account.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PolicySnapshot {
    pub registered_asset: Option<Asset>,
    pub due_date: Option<u64>,
    pub premium_paid: u128,
    pub is_active: bool,
    pub has_claimed: bool,
}

/// Crash/claim status derived entirely from the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CrashStatus {
    pub crash_percentage: u8,
    pub is_crashed: bool,
    pub can_claim: bool,
    pub is_active: bool,
    /// Payout tier in percent for the current crash depth.
    pub coverage_percent: u8,
}

/// Shared payout pool accounting plus the caller's role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolSnapshot {
    pub total_balance: u128,
    pub total_user_premiums: u128,
    pub is_caller_owner: bool,
}

impl PoolSnapshot {
    /// Owner top-ups beyond collected premiums. Saturating so display can
    /// never go negative even if premium accounting briefly leads balance.
    pub fn owner_funding(&self) -> u128 {
        self.total_balance.saturating_sub(self.total_user_premiums)
    }
}

/// Full refreshed state for one (address, chain) identity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccountState {
    pub policy: PolicySnapshot,
    pub crash: CrashStatus,
    pub pool: PoolSnapshot,
    pub token_balance: u128,
    pub allowance: u128,
}

/// Result of a refresh: the new state plus the names of any fields that fell
/// back to safe defaults because their individual read failed. Degradation is
/// recoverable; the caller can show partial data rather than nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub state: AccountState,
    pub degraded: Vec<&'static str>,
}

impl RefreshOutcome {
    pub fn is_complete(&self) -> bool {
        self.degraded.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ScopeKey {
    address: Address,
    chain_id: u64,
}

impl ScopeKey {
    fn of(session: &WalletSession) -> Self {
        ScopeKey {
            address: session.address.to_ascii_lowercase(),
            chain_id: session.chain_id,
        }
    }

    fn matches(&self, session: &WalletSession) -> bool {
        same_address(&self.address, &session.address) && self.chain_id == session.chain_id
    }
}

/// In-memory store over the ledger reads. Never mutated speculatively; the
/// only way state changes is a full refresh.
pub struct StateStore<L: LedgerClient> {
    ledger: Arc<L>,
    /// The logic contract: spender for allowance reads.
    spender: Address,
    cached: RwLock<Option<(ScopeKey, AccountState)>>,
}

/// Number of independent reads a refresh performs.
const REFRESH_READS: usize = 7;

impl<L: LedgerClient> StateStore<L> {
    pub fn new(ledger: Arc<L>, spender: Address) -> Self {
        StateStore {
            ledger,
            spender,
            cached: RwLock::new(None),
        }
    }

    /// Refresh all snapshots for `session` from the ledger.
    ///
    /// The reads are independent and run concurrently; each individual
    /// failure degrades its field to a safe default. Only a total failure of
    /// every read is reported as `LedgerUnavailable`.
    pub async fn refresh(&self, session: &WalletSession) -> Result<RefreshOutcome, ControllerError> {
        let account = &session.address;
        debug!("Refreshing ledger state for {}", account);

        let (balance, allowance, policy, crash, coverage, pool, role) = tokio::join!(
            self.ledger.balance_of(account),
            self.ledger.allowance(account, &self.spender),
            self.ledger.policy_record(account),
            self.ledger.crash_status(account),
            self.ledger.coverage_percentage(account),
            self.ledger.pool_totals(),
            self.ledger.role_of(account),
        );

        let mut degraded = Vec::new();
        let mut note = |field: &'static str, err: &LedgerError| {
            warn!("Read of {} failed, degrading to default: {}", field, err);
            degraded.push(field);
        };

        let token_balance = match balance {
            Ok(v) => v,
            Err(err) => {
                note("balance", &err);
                0
            }
        };
        let allowance = match allowance {
            Ok(v) => v,
            Err(err) => {
                note("allowance", &err);
                0
            }
        };
        let policy = match policy {
            Ok(record) => record
                .map(|r| PolicySnapshot {
                    registered_asset: Asset::from_code(r.asset_code),
                    due_date: Some(r.due_date),
                    premium_paid: r.premium_paid,
                    is_active: r.is_active,
                    has_claimed: r.has_claimed,
                })
                .unwrap_or_default(),
            Err(err) => {
                note("policy", &err);
                PolicySnapshot::default()
            }
        };
        let crash_record = match crash {
            Ok(v) => v,
            Err(err) => {
                note("crash_status", &err);
                CrashStatusRecord::default()
            }
        };
        let coverage_percent = match coverage {
            Ok(v) => v.min(100) as u8,
            Err(err) => {
                note("coverage", &err);
                0
            }
        };
        let pool_totals = match pool {
            Ok(v) => v,
            Err(err) => {
                note("pool_totals", &err);
                Default::default()
            }
        };
        let is_caller_owner = match role {
            Ok(role) => role == Role::Owner,
            Err(err) => {
                note("role", &err);
                false
            }
        };

        if degraded.len() == REFRESH_READS {
            return Err(ControllerError::LedgerUnavailable(
                "every ledger read failed during refresh".to_string(),
            ));
        }

        let state = AccountState {
            policy,
            crash: CrashStatus {
                crash_percentage: crash_record.crash_percentage.min(100) as u8,
                is_crashed: crash_record.is_crashed,
                can_claim: crash_record.can_claim,
                is_active: crash_record.is_active,
                coverage_percent,
            },
            pool: PoolSnapshot {
                total_balance: pool_totals.total_balance,
                total_user_premiums: pool_totals.total_user_premiums,
                is_caller_owner,
            },
            token_balance,
            allowance,
        };

        // Replace wholesale; never field-patch a previous snapshot.
        *self.cached.write() = Some((ScopeKey::of(session), state.clone()));
        Ok(RefreshOutcome { state, degraded })
    }

    /// Cached state for `session`, or `None` when nothing has been refreshed
    /// under this exact (address, chain) identity.
    pub fn cached(&self, session: &WalletSession) -> Option<AccountState> {
        let guard = self.cached.read();
        match guard.as_ref() {
            Some((key, state)) if key.matches(session) => Some(state.clone()),
            _ => None,
        }
    }

    /// Discard all cached snapshots. Called on every account/network change.
    pub fn invalidate(&self) {
        if self.cached.write().take().is_some() {
            debug!("Discarded cached ledger snapshots");
        }
    }
}
