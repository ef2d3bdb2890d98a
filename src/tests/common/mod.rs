// Shared test doubles: a recording fake ledger and a scriptable fake wallet
// provider, plus helpers to build a connected controller on top of them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::config::{ControllerConfig, NetworkConfig};
use crate::controller::InsuranceController;
use crate::ledger::{
    Address, Asset, CrashStatusRecord, LedgerClient, LedgerError, PolicyRecord, PoolTotals, Role,
    TxRef,
};
use crate::wallet::{ProviderError, WalletProvider};

pub const USER: &str = "0x742d35cc6634c0532925a3b8d2a9c7c5c2d6c8e9";
pub const OWNER: &str = "0x8ba1f109551bd432803012645ac136ddd64dba72";
pub const CHAIN_ID: u64 = 50312;

/// Capture controller logs in test output when RUST_LOG is set.
pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Controller config with a zero post-confirmation delay so tests run fast.
pub fn test_config() -> ControllerConfig {
    let mut config = ControllerConfig::default();
    config.refresh_delay_ms = 0;
    config
}

pub fn spender() -> Address {
    test_config().contracts.logic_address
}

/// Every call the fake ledger observed, reads included, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    BalanceOf(Address),
    Allowance(Address, Address),
    PolicyRecord(Address),
    CrashStatus(Address),
    Coverage(Address),
    PoolTotals,
    RoleOf(Address),
    Approve(Address, u128),
    Register(Address, u8, u64),
    PayPremium(u128),
    WithdrawPayout,
    FundPool(u128),
    Faucet,
}

impl LedgerCall {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            LedgerCall::Approve(..)
                | LedgerCall::Register(..)
                | LedgerCall::PayPremium(..)
                | LedgerCall::WithdrawPayout
                | LedgerCall::FundPool(..)
                | LedgerCall::Faucet
        )
    }
}

/// In-memory ledger double. Records every call, supports forcing individual
/// methods to fail, and can hold a write open on a gate so concurrency
/// behavior is observable.
pub struct FakeLedger {
    pub caller: Mutex<Address>,
    pub owner: Mutex<Address>,
    pub balances: Mutex<HashMap<Address, u128>>,
    pub allowances: Mutex<HashMap<(Address, Address), u128>>,
    pub policies: Mutex<HashMap<Address, PolicyRecord>>,
    pub crash: Mutex<HashMap<Address, CrashStatusRecord>>,
    pub coverage: Mutex<HashMap<Address, u64>>,
    pub pool: Mutex<PoolTotals>,
    pub calls: Mutex<Vec<LedgerCall>>,
    /// Method name -> error returned on every call of that method.
    pub failures: Mutex<HashMap<&'static str, LedgerError>>,
    /// When set, `pay_premium` blocks until the notify fires.
    pub premium_gate: Mutex<Option<Arc<Notify>>>,
    next_tx: AtomicU64,
}

impl FakeLedger {
    pub fn new() -> Self {
        FakeLedger {
            caller: Mutex::new(USER.to_string()),
            owner: Mutex::new(OWNER.to_string()),
            balances: Mutex::new(HashMap::new()),
            allowances: Mutex::new(HashMap::new()),
            policies: Mutex::new(HashMap::new()),
            crash: Mutex::new(HashMap::new()),
            coverage: Mutex::new(HashMap::new()),
            pool: Mutex::new(PoolTotals::default()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            premium_gate: Mutex::new(None),
            next_tx: AtomicU64::new(1),
        }
    }

    pub fn set_balance(&self, account: &str, amount: u128) {
        self.balances
            .lock()
            .insert(account.to_ascii_lowercase(), amount);
    }

    pub fn set_allowance(&self, owner: &str, spender: &str, amount: u128) {
        self.allowances.lock().insert(
            (owner.to_ascii_lowercase(), spender.to_ascii_lowercase()),
            amount,
        );
    }

    pub fn set_policy(&self, account: &str, asset: Asset, due_date: u64, active: bool) {
        self.policies.lock().insert(
            account.to_ascii_lowercase(),
            PolicyRecord {
                wallet: account.to_ascii_lowercase(),
                asset_code: asset.code(),
                due_date,
                premium_paid: 0,
                is_active: active,
                has_claimed: false,
            },
        );
    }

    pub fn set_crash(&self, account: &str, record: CrashStatusRecord) {
        self.crash
            .lock()
            .insert(account.to_ascii_lowercase(), record);
    }

    pub fn fail_method(&self, method: &'static str, err: LedgerError) {
        self.failures.lock().insert(method, err);
    }

    pub fn recorded_calls(&self) -> Vec<LedgerCall> {
        self.calls.lock().clone()
    }

    pub fn recorded_writes(&self) -> Vec<LedgerCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.is_write())
            .cloned()
            .collect()
    }

    pub fn approve_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, LedgerCall::Approve(..)))
            .count()
    }

    fn record(&self, call: LedgerCall) {
        self.calls.lock().push(call);
    }

    fn check_failure(&self, method: &'static str) -> Result<(), LedgerError> {
        match self.failures.lock().get(method) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn next_tx_ref(&self) -> TxRef {
        format!("0xtx{:04}", self.next_tx.fetch_add(1, Ordering::SeqCst))
    }

    fn key(account: &str) -> String {
        account.to_ascii_lowercase()
    }
}

#[async_trait]
impl LedgerClient for FakeLedger {
    async fn balance_of(&self, account: &Address) -> Result<u128, LedgerError> {
        self.record(LedgerCall::BalanceOf(Self::key(account)));
        self.check_failure("balance_of")?;
        Ok(*self.balances.lock().get(&Self::key(account)).unwrap_or(&0))
    }

    async fn allowance(&self, owner: &Address, spender: &Address) -> Result<u128, LedgerError> {
        self.record(LedgerCall::Allowance(Self::key(owner), Self::key(spender)));
        self.check_failure("allowance")?;
        Ok(*self
            .allowances
            .lock()
            .get(&(Self::key(owner), Self::key(spender)))
            .unwrap_or(&0))
    }

    async fn policy_record(&self, account: &Address) -> Result<Option<PolicyRecord>, LedgerError> {
        self.record(LedgerCall::PolicyRecord(Self::key(account)));
        self.check_failure("policy_record")?;
        Ok(self.policies.lock().get(&Self::key(account)).cloned())
    }

    async fn crash_status(&self, account: &Address) -> Result<CrashStatusRecord, LedgerError> {
        self.record(LedgerCall::CrashStatus(Self::key(account)));
        self.check_failure("crash_status")?;
        Ok(self
            .crash
            .lock()
            .get(&Self::key(account))
            .copied()
            .unwrap_or_default())
    }

    async fn coverage_percentage(&self, account: &Address) -> Result<u64, LedgerError> {
        self.record(LedgerCall::Coverage(Self::key(account)));
        self.check_failure("coverage_percentage")?;
        Ok(self
            .coverage
            .lock()
            .get(&Self::key(account))
            .copied()
            .unwrap_or(0))
    }

    async fn pool_totals(&self) -> Result<PoolTotals, LedgerError> {
        self.record(LedgerCall::PoolTotals);
        self.check_failure("pool_totals")?;
        Ok(*self.pool.lock())
    }

    async fn role_of(&self, account: &Address) -> Result<Role, LedgerError> {
        self.record(LedgerCall::RoleOf(Self::key(account)));
        self.check_failure("role_of")?;
        if Self::key(account) == Self::key(&self.owner.lock()) {
            Ok(Role::Owner)
        } else {
            Ok(Role::User)
        }
    }

    async fn approve(&self, spender: &Address, amount: u128) -> Result<TxRef, LedgerError> {
        self.record(LedgerCall::Approve(Self::key(spender), amount));
        self.check_failure("approve")?;
        let caller = Self::key(&self.caller.lock());
        self.allowances
            .lock()
            .insert((caller, Self::key(spender)), amount);
        Ok(self.next_tx_ref())
    }

    async fn register(
        &self,
        account: &Address,
        asset: Asset,
        due_date_epoch: u64,
    ) -> Result<TxRef, LedgerError> {
        self.record(LedgerCall::Register(
            Self::key(account),
            asset.code(),
            due_date_epoch,
        ));
        self.check_failure("register")?;
        self.set_policy(account, asset, due_date_epoch, true);
        Ok(self.next_tx_ref())
    }

    async fn pay_premium(&self, amount: u128) -> Result<TxRef, LedgerError> {
        self.record(LedgerCall::PayPremium(amount));
        let gate = self.premium_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.check_failure("pay_premium")?;

        // Move value the way the real contract would: allowance and balance
        // down, premium and pool up.
        let caller = Self::key(&self.caller.lock());
        let spender = Self::key(&spender());
        {
            let mut allowances = self.allowances.lock();
            let entry = allowances.entry((caller.clone(), spender)).or_insert(0);
            *entry = entry.saturating_sub(amount);
        }
        {
            let mut balances = self.balances.lock();
            let entry = balances.entry(caller.clone()).or_insert(0);
            *entry = entry.saturating_sub(amount);
        }
        if let Some(policy) = self.policies.lock().get_mut(&caller) {
            policy.premium_paid += amount;
        }
        {
            let mut pool = self.pool.lock();
            pool.total_balance += amount;
            pool.total_user_premiums += amount;
        }
        Ok(self.next_tx_ref())
    }

    async fn withdraw_payout(&self) -> Result<TxRef, LedgerError> {
        self.record(LedgerCall::WithdrawPayout);
        self.check_failure("withdraw_payout")?;
        let caller = Self::key(&self.caller.lock());
        if let Some(policy) = self.policies.lock().get_mut(&caller) {
            policy.has_claimed = true;
        }
        if let Some(status) = self.crash.lock().get_mut(&caller) {
            status.can_claim = false;
        }
        Ok(self.next_tx_ref())
    }

    async fn fund_pool(&self, amount: u128) -> Result<TxRef, LedgerError> {
        self.record(LedgerCall::FundPool(amount));
        self.check_failure("fund_pool")?;
        let caller = Self::key(&self.caller.lock());
        let spender = Self::key(&spender());
        {
            let mut allowances = self.allowances.lock();
            let entry = allowances.entry((caller.clone(), spender)).or_insert(0);
            *entry = entry.saturating_sub(amount);
        }
        {
            let mut balances = self.balances.lock();
            let entry = balances.entry(caller).or_insert(0);
            *entry = entry.saturating_sub(amount);
        }
        self.pool.lock().total_balance += amount;
        Ok(self.next_tx_ref())
    }

    async fn faucet(&self) -> Result<TxRef, LedgerError> {
        self.record(LedgerCall::Faucet);
        self.check_failure("faucet")?;
        let caller = Self::key(&self.caller.lock());
        *self.balances.lock().entry(caller).or_insert(0) += 1_000_000_000;
        Ok(self.next_tx_ref())
    }
}

/// Which provider requests were made, for asserting the connect flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    RequestAccounts,
    ChainId,
    SwitchChain(u64),
    AddChain(u64),
}

/// Scriptable wallet provider double.
pub struct FakeProvider {
    pub accounts: Mutex<Vec<Address>>,
    pub chain: Mutex<u64>,
    pub known_chains: Mutex<HashSet<u64>>,
    pub calls: Mutex<Vec<ProviderCall>>,
    pub unavailable: AtomicBool,
    pub reject_accounts: AtomicBool,
    pub reject_switch: AtomicBool,
    pub reject_add_chain: AtomicBool,
}

impl FakeProvider {
    /// A provider already unlocked for `USER` and sitting on the required
    /// chain.
    pub fn connected() -> Self {
        let provider = FakeProvider::on_chain(CHAIN_ID);
        provider.known_chains.lock().insert(CHAIN_ID);
        provider
    }

    pub fn on_chain(chain_id: u64) -> Self {
        FakeProvider {
            accounts: Mutex::new(vec![USER.to_string()]),
            chain: Mutex::new(chain_id),
            known_chains: Mutex::new(HashSet::from([chain_id])),
            calls: Mutex::new(Vec::new()),
            unavailable: AtomicBool::new(false),
            reject_accounts: AtomicBool::new(false),
            reject_switch: AtomicBool::new(false),
            reject_add_chain: AtomicBool::new(false),
        }
    }

    pub fn recorded_calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl WalletProvider for FakeProvider {
    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        self.calls.lock().push(ProviderCall::RequestAccounts);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ProviderError::Unavailable);
        }
        if self.reject_accounts.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected);
        }
        Ok(self.accounts.lock().clone())
    }

    async fn chain_id(&self) -> Result<u64, ProviderError> {
        self.calls.lock().push(ProviderCall::ChainId);
        Ok(*self.chain.lock())
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), ProviderError> {
        self.calls.lock().push(ProviderCall::SwitchChain(chain_id));
        if self.reject_switch.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected);
        }
        if !self.known_chains.lock().contains(&chain_id) {
            return Err(ProviderError::UnknownChain(chain_id));
        }
        *self.chain.lock() = chain_id;
        Ok(())
    }

    async fn add_chain(&self, network: &NetworkConfig) -> Result<(), ProviderError> {
        self.calls.lock().push(ProviderCall::AddChain(network.chain_id));
        if self.reject_add_chain.load(Ordering::SeqCst) {
            return Err(ProviderError::Other("user declined chain add".to_string()));
        }
        self.known_chains.lock().insert(network.chain_id);
        Ok(())
    }
}

/// A controller connected as `USER` with an initial refresh done.
pub async fn connected_controller(
    ledger: Arc<FakeLedger>,
) -> InsuranceController<FakeProvider, FakeLedger> {
    init_test_logging();
    let controller =
        InsuranceController::new(test_config(), FakeProvider::connected(), ledger.clone());
    controller
        .connect()
        .await
        .expect("connect against fakes should succeed");
    // Connect performs the initial refresh; drop those reads so tests assert
    // only the calls they trigger themselves.
    ledger.calls.lock().clear();
    controller
}
