//! Chain access layer
//!
//! The [`ChainClient`] trait is the only seam between the core and the
//! blockchain. Reads are view calls; writes are split into submission and
//! confirmation so callers can report a transaction hash before it is mined.

use alloy_primitives::{Address, TxHash, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod errors;
pub mod evm;
pub mod retry;

pub use errors::{ChainError, ChainResult};
pub use evm::EvmChainClient;
pub use retry::{batch_execute, with_retry, BatchConfig, RetryPolicy};

/// Raw vault attributes as returned by the vault contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawVaultState {
    pub landlord: Address,
    pub tenant: Address,
    pub deposit_amount: U256,
    pub start_ts: u64,
    pub end_ts: u64,
    pub deposited: bool,
    pub settled: bool,
    pub property_name: B256,
    pub property_location: B256,
    /// Present only for rent-bearing vault variants
    pub rent: Option<RentTerms>,
}

/// Accessory rent fields of rent-bearing vaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentTerms {
    pub monthly_rent: U256,
    pub total_rent_paid: U256,
    pub current_month_index: u64,
}

/// State-changing contract calls issued by the flows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCall {
    /// ERC-20 `approve(spender, amount)`
    Approve {
        token: Address,
        spender: Address,
        amount: U256,
    },
    /// Vault `depositAndSupply()`
    DepositAndSupply { vault: Address },
    /// Vault `settle()`
    Settle { vault: Address },
    /// Lending pool `accrue(amount)`
    Accrue { pool: Address, amount: U256 },
    /// Factory `createAgreement(...)`
    CreateAgreement {
        factory: Address,
        landlord: Address,
        tenant: Address,
        deposit_amount: U256,
        start_ts: u64,
        end_ts: u64,
        property_name: B256,
        property_location: B256,
    },
}

impl WriteCall {
    /// Contract the call is addressed to
    pub fn target(&self) -> Address {
        match self {
            WriteCall::Approve { token, .. } => *token,
            WriteCall::DepositAndSupply { vault } | WriteCall::Settle { vault } => *vault,
            WriteCall::Accrue { pool, .. } => *pool,
            WriteCall::CreateAgreement { factory, .. } => *factory,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WriteCall::Approve { .. } => "approve",
            WriteCall::DepositAndSupply { .. } => "depositAndSupply",
            WriteCall::Settle { .. } => "settle",
            WriteCall::Accrue { .. } => "accrue",
            WriteCall::CreateAgreement { .. } => "createAgreement",
        }
    }
}

/// Minimal receipt view needed by the flows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub success: bool,
}

/// Read and write surface of the escrow contracts.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> ChainResult<u64>;

    /// Factory `nextId()`
    async fn next_vault_id(&self, factory: Address) -> ChainResult<u64>;

    /// Factory `vaults(id)`; the zero address marks an empty slot
    async fn vault_address(&self, factory: Address, id: u64) -> ChainResult<Address>;

    /// All attribute reads of one vault. Fails if any single read fails.
    async fn vault_state(&self, vault: Address, rent_bearing: bool) -> ChainResult<RawVaultState>;

    /// ERC-20 `balanceOf(holder)`
    async fn token_balance(&self, token: Address, holder: Address) -> ChainResult<U256>;

    /// ERC-20 `allowance(owner, spender)`
    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> ChainResult<U256>;

    /// Lending pool `owner()`
    async fn pool_owner(&self, pool: Address) -> ChainResult<Address>;

    /// Sign and broadcast a write call from `from`, returning its hash.
    async fn submit(&self, from: Address, call: WriteCall) -> ChainResult<TxHash>;

    /// Block until the transaction is mined.
    async fn wait_for_confirmation(&self, tx: TxHash) -> ChainResult<TxReceipt>;
}

/// Narrow a `uint256` counter to `u64`.
pub(crate) fn u256_to_u64(value: U256, field: &str) -> ChainResult<u64> {
    if value > U256::from(u64::MAX) {
        return Err(ChainError::Contract(format!(
            "{field} does not fit in u64: {value}"
        )));
    }
    Ok(value.to::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_call_target() {
        let vault = Address::repeat_byte(0x42);
        assert_eq!(WriteCall::Settle { vault }.target(), vault);
        assert_eq!(WriteCall::DepositAndSupply { vault }.name(), "depositAndSupply");
    }

    #[test]
    fn test_u256_to_u64_bounds() {
        assert_eq!(u256_to_u64(U256::from(4u64), "nextId").unwrap(), 4);
        assert!(u256_to_u64(U256::MAX, "nextId").is_err());
    }
}
