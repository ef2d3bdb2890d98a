// Configuration for the CryptoShield controller: target network parameters,
// deployed contract addresses, and the revert-selector table used for error
// classification. The selector table is external, versioned data because
// custom error selectors are specific to one contract build.

use std::collections::HashMap;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;


/// Minimum coverage period accepted at registration.
pub const MIN_DUE_DATE_DAYS: u64 = 90;

/// Ledger-side crash threshold, in percent. Display-side knowledge only; the
/// contract is the authority on crash math.
pub const CRASH_THRESHOLD_PERCENT: u8 = 15;

/// Payout tiers: 65% coverage for a 15-49% crash, 40% for 50% and above.
pub const COVERAGE_TIER_HIGH_PERCENT: u8 = 65;
pub const COVERAGE_TIER_LOW_PERCENT: u8 = 40;

/// Delay between a write confirmation and the follow-up state refresh.
/// Immediate post-confirmation reads can still return pre-transaction values
/// from lagging read replicas.
pub const DEFAULT_REFRESH_DELAY_MS: u64 = 1_500;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Native currency of the target chain, used only when registering the chain
/// with a wallet that does not know it yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeCurrency {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

/// Network identity consumed by the session manager's switch/add-chain flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub display_name: String,
    pub rpc_url: String,
    pub explorer_url: String,
    pub native_currency: NativeCurrency,
}

impl NetworkConfig {
    /// Chain id in the 0x-prefixed hex form wallet providers expect.
    pub fn chain_id_hex(&self) -> String {
        format!("0x{:x}", self.chain_id)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        // Somnia testnet, where the reference contracts are deployed.
        NetworkConfig {
            chain_id: 50312,
            display_name: "Somnia Testnet".to_string(),
            rpc_url: "https://testnet.somnia.network/".to_string(),
            explorer_url: "https://testnet-explorer.somnia.network/".to_string(),
            native_currency: NativeCurrency {
                name: "Somnia Test Token".to_string(),
                symbol: "STT".to_string(),
                decimals: 18,
            },
        }
    }
}

/// Deployed contract addresses. The logic contract is the spender in every
/// allowance-gated transfer; the token contract holds the value being spent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractConfig {
    pub logic_address: String,
    pub token_address: String,
}

impl Default for ContractConfig {
    fn default() -> Self {
        ContractConfig {
            logic_address: "0x01554ef8c24889714143cc12df95d7370c462ad8".to_string(),
            token_address: "0x95d59ecb48d56fc7befa62a19482d052193560a4".to_string(),
        }
    }
}

/// Classification a decoded revert selector maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RevertKind {
    InvalidAmount,
    NotRegistered,
    AlreadyRegistered,
    InvalidAddress,
    InvalidDueDate,
    Unauthorized,
    /// Solidity `Error(string)`: the reason string is the payload.
    ErrorString,
}

/// Selector-to-classification table for the deployed contract build.
///
/// Loaded from TOML so it can be versioned alongside contract deployments;
/// the compiled-in default matches the reference build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertTable {
    selectors: HashMap<String, RevertKind>,
}

impl RevertTable {
    pub fn lookup(&self, selector: &str) -> Option<RevertKind> {
        self.selectors.get(&normalize_selector(selector)).copied()
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }
}

impl Default for RevertTable {
    fn default() -> Self {
        let mut selectors = HashMap::new();
        selectors.insert("0x13be252b".to_string(), RevertKind::InvalidAmount);
        selectors.insert("0x7138356f".to_string(), RevertKind::NotRegistered);
        selectors.insert("0x1f2a2005".to_string(), RevertKind::AlreadyRegistered);
        selectors.insert("0xe6c4247b".to_string(), RevertKind::InvalidAddress);
        selectors.insert("0x15279c05".to_string(), RevertKind::InvalidDueDate);
        selectors.insert("0x08c379a0".to_string(), RevertKind::ErrorString);
        RevertTable { selectors }
    }
}

fn normalize_selector(selector: &str) -> String {
    let lower = selector.to_ascii_lowercase();
    if lower.starts_with("0x") {
        lower
    } else {
        format!("0x{}", lower)
    }
}

/// Top-level controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Milliseconds to wait after a confirmation before refreshing state.
    pub refresh_delay_ms: u64,
    pub min_due_date_days: u64,
    pub network: NetworkConfig,
    pub contracts: ContractConfig,
    pub reverts: RevertTable,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            refresh_delay_ms: DEFAULT_REFRESH_DELAY_MS,
            min_due_date_days: MIN_DUE_DATE_DAYS,
            network: NetworkConfig::default(),
            contracts: ContractConfig::default(),
            reverts: RevertTable::default(),
        }
    }
}

impl ControllerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: ControllerConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading controller configuration from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.chain_id == 0 {
            return Err(ConfigError::InvalidValue("chain_id must be non-zero".into()));
        }
        if self.network.rpc_url.is_empty() {
            return Err(ConfigError::InvalidValue("rpc_url must be set".into()));
        }
        for (name, addr) in [
            ("logic_address", &self.contracts.logic_address),
            ("token_address", &self.contracts.token_address),
        ] {
            if !is_hex_address(addr) {
                return Err(ConfigError::InvalidValue(format!(
                    "{} is not a valid address: {}",
                    name, addr
                )));
            }
        }
        if self.min_due_date_days == 0 {
            return Err(ConfigError::InvalidValue(
                "min_due_date_days must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

fn is_hex_address(addr: &str) -> bool {
    match addr.strip_prefix("0x") {
        Some(body) => body.len() == 40 && hex::decode(body).is_ok(),
        None => false,
    }
}
