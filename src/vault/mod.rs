//! Vault registry: records, scanning, caching and classification

pub mod cache;
pub mod classify;
pub mod record;
pub mod scanner;

pub use cache::{CacheInvalidator, VaultCache, VaultList, DEFAULT_TTL};
pub use classify::{
    can_deposit, can_settle, classify, filter_by_stage, relevant_vaults, role_for, sort_vaults, sorted,
    vaults_for_role, PortfolioStats, Role, RoleView, Stage, StageFilter,
};
pub use record::VaultRecord;
pub use scanner::{ScanError, ScanSettings, VaultScanner, VaultSource};
