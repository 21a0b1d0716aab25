//! Escrow Client - rental security-deposit escrow client core
//!
//! Discovers every vault registered in an escrow factory, caches the list,
//! classifies vaults for display and runs the approve-then-execute
//! transactions that fund, accrue and settle them.

pub mod chain;
pub mod client;
pub mod config;
pub mod flows;
pub mod format;
pub mod metrics;
pub mod observability;
pub mod session;
pub mod structured_logging;
pub mod test_utils;
pub mod vault;

pub use chain::{ChainClient, ChainError, EvmChainClient, RawVaultState, TxReceipt, WriteCall};
pub use client::{connect, EscrowClient};
pub use config::{AppConfig, ConfigError};
pub use flows::{AgreementTerms, FlowError, FlowEvent, FlowOutcome, FlowProgress, FlowStep, TxFlows};
pub use session::{Session, SessionError, WalletEvent, WalletProvider};
pub use vault::{Role, ScanError, Stage, VaultCache, VaultRecord, VaultScanner};
