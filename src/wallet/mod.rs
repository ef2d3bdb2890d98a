// Session manager: establishes the wallet session against the required
// network and tracks account/chain change notifications. The wallet provider
// is an injected capability, never a module-level singleton, so tests can
// substitute a fake.

use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::RwLock;
use thiserror::Error;

use crate::config::NetworkConfig;
use crate::errors::ControllerError;
use crate::ledger::Address;
use crate::utils::same_address;


/// Failure modes of the raw wallet provider.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// No provider is installed or it is unreachable.
    #[error("wallet provider unavailable")]
    Unavailable,

    /// The user declined the prompt.
    #[error("request rejected by the user")]
    Rejected,

    /// The provider does not know the requested chain (EIP-3085/3326 code
    /// 4902); the chain parameters must be registered before switching.
    #[error("unrecognized chain 0x{0:x}")]
    UnknownChain(u64),

    #[error("provider failure: {0}")]
    Other(String),
}

/// Injected wallet capability. All calls are read-only against the wallet
/// itself; no ledger writes happen here.
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Prompt for account access and return the unlocked accounts.
    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError>;

    /// Currently selected chain.
    async fn chain_id(&self) -> Result<u64, ProviderError>;

    /// Ask the wallet to switch to `chain_id`.
    async fn switch_chain(&self, chain_id: u64) -> Result<(), ProviderError>;

    /// Register an unknown chain's parameters with the wallet.
    async fn add_chain(&self, network: &NetworkConfig) -> Result<(), ProviderError>;
}

/// Active wallet identity and network context. Owned by the session manager;
/// read-only everywhere else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSession {
    pub address: Address,
    pub chain_id: u64,
    pub connected: bool,
}

/// What a provider notification did to the session, so the caller knows
/// whether cached ledger state must be discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    Unchanged,
    /// The wallet reported no accounts; the session is gone.
    Disconnected,
    /// The account or chain changed. This is a new identity: contracts are
    /// not auto-reconnected and all cached snapshots are stale.
    NewIdentity(WalletSession),
}

/// Session manager. Holds the one cached `WalletSession` and runs the
/// connect/switch-chain flow against the injected provider.
pub struct SessionManager<P: WalletProvider> {
    provider: P,
    required_network: NetworkConfig,
    session: RwLock<Option<WalletSession>>,
}

impl<P: WalletProvider> SessionManager<P> {
    pub fn new(provider: P, required_network: NetworkConfig) -> Self {
        SessionManager {
            provider,
            required_network,
            session: RwLock::new(None),
        }
    }

    /// Connect to the wallet and ensure it is on the required chain.
    ///
    /// If the wallet reports an unrecognized chain, the chain parameters are
    /// registered and the switch retried exactly once; any other switch
    /// failure is fatal to this connect attempt.
    pub async fn connect(&self) -> Result<WalletSession, ControllerError> {
        let accounts = self.provider.request_accounts().await.map_err(|err| match err {
            ProviderError::Rejected => ControllerError::UserRejected,
            // Anything else at this stage means there is no usable provider.
            _ => ControllerError::NoProvider,
        })?;
        let address = match accounts.into_iter().next() {
            Some(addr) => addr,
            None => {
                warn!("Wallet returned an empty account list on connect");
                return Err(ControllerError::UserRejected);
            }
        };

        let required = self.required_network.chain_id;
        let current = self
            .provider
            .chain_id()
            .await
            .map_err(|err| ControllerError::NetworkSwitch(err.to_string()))?;
        if current != required {
            debug!(
                "Wallet on chain 0x{:x}, switching to 0x{:x}",
                current, required
            );
            self.ensure_required_chain(required).await?;
        }

        let session = WalletSession {
            address: address.clone(),
            chain_id: required,
            connected: true,
        };
        *self.session.write() = Some(session.clone());
        info!(
            "Wallet session established for {} on {}",
            address, self.required_network.display_name
        );
        Ok(session)
    }

    async fn ensure_required_chain(&self, required: u64) -> Result<(), ControllerError> {
        match self.provider.switch_chain(required).await {
            Ok(()) => Ok(()),
            Err(ProviderError::UnknownChain(_)) => {
                info!(
                    "Chain 0x{:x} unknown to the wallet, registering {}",
                    required, self.required_network.display_name
                );
                self.provider
                    .add_chain(&self.required_network)
                    .await
                    .map_err(|err| ControllerError::NetworkSwitch(err.to_string()))?;
                // One retry after registering; a second failure is fatal.
                self.provider
                    .switch_chain(required)
                    .await
                    .map_err(|err| ControllerError::NetworkSwitch(err.to_string()))
            }
            Err(ProviderError::Rejected) => Err(ControllerError::UserRejected),
            Err(err) => Err(ControllerError::NetworkSwitch(err.to_string())),
        }
    }

    /// Pure read of the cached session.
    pub fn active_session(&self) -> Option<WalletSession> {
        self.session.read().clone()
    }

    pub fn required_network(&self) -> &NetworkConfig {
        &self.required_network
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Handle a provider accounts-changed notification. An empty account
    /// list is equivalent to disconnect; a new account replaces the identity
    /// without reconnecting anything on the ledger side.
    pub fn handle_accounts_changed(&self, accounts: &[Address]) -> SessionChange {
        let mut guard = self.session.write();
        match accounts.first() {
            None => {
                if guard.take().is_some() {
                    info!("Wallet disconnected (empty account list)");
                    SessionChange::Disconnected
                } else {
                    SessionChange::Unchanged
                }
            }
            Some(new_address) => match guard.as_mut() {
                Some(session) if same_address(&session.address, new_address) => {
                    SessionChange::Unchanged
                }
                Some(session) => {
                    info!("Wallet account changed to {}", new_address);
                    session.address = new_address.clone();
                    SessionChange::NewIdentity(session.clone())
                }
                // Notification without a prior connect; nothing cached to
                // invalidate, and we do not fabricate a session from it.
                None => SessionChange::Unchanged,
            },
        }
    }

    /// Handle a provider chain-changed notification.
    pub fn handle_chain_changed(&self, chain_id: u64) -> SessionChange {
        let mut guard = self.session.write();
        match guard.as_mut() {
            Some(session) if session.chain_id == chain_id => SessionChange::Unchanged,
            Some(session) => {
                warn!(
                    "Wallet network changed from 0x{:x} to 0x{:x}",
                    session.chain_id, chain_id
                );
                session.chain_id = chain_id;
                SessionChange::NewIdentity(session.clone())
            }
            None => SessionChange::Unchanged,
        }
    }
}
