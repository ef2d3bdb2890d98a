pub mod config;
pub mod controller;
pub mod errors;
pub mod ledger;
pub mod policy;
pub mod transfer;
pub mod utils;
pub mod wallet;

// Re-export commonly used items
pub use config::{ControllerConfig, NetworkConfig, RevertTable};
pub use controller::InsuranceController;
pub use errors::{ControllerError, IneligibilityReason, OperationResult, OperationStatus};
pub use ledger::{Asset, LedgerClient, LedgerError};
pub use policy::{AccountState, CrashStatus, PolicySnapshot, PoolSnapshot};
pub use transfer::{TransferIntent, TransferPurpose};
pub use wallet::{SessionChange, WalletProvider, WalletSession};
