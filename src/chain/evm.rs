//! `alloy`-backed implementation of [`ChainClient`].
//!
//! Signing is delegated to whatever wallet filler the supplied provider was
//! built with; a provider without one can still serve every read.

use super::errors::{ChainError, ChainResult};
use super::{u256_to_u64, ChainClient, RawVaultState, RentTerms, TxReceipt, WriteCall};
use alloy::contract::Error as ContractError;
use alloy::network::ReceiptResponse;
use alloy::providers::{PendingTransactionBuilder, PendingTransactionError, Provider, ProviderBuilder, WatchTxError};
use alloy::sol;
use alloy::transports::RpcError;
use alloy_primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use std::fmt;
use std::future::IntoFuture;
use std::time::Duration;
use tracing::{debug, instrument};

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract EscrowFactory {
        function nextId() external view returns (uint256);
        function vaults(uint256 id) external view returns (address);
        function createAgreement(
            address landlord,
            address tenant,
            uint256 depositAmount,
            uint256 startTs,
            uint256 endTs,
            bytes32 propertyName,
            bytes32 propertyLocation
        ) external returns (address);
    }
}

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract EscrowVault {
        function landlord() external view returns (address);
        function tenant() external view returns (address);
        function depositAmount() external view returns (uint256);
        function startTs() external view returns (uint256);
        function endTs() external view returns (uint256);
        function deposited() external view returns (bool);
        function settled() external view returns (bool);
        function propertyName() external view returns (bytes32);
        function propertyLocation() external view returns (bytes32);
        function monthlyRent() external view returns (uint256);
        function totalRentPaid() external view returns (uint256);
        function currentMonthIndex() external view returns (uint256);
        function depositAndSupply() external;
        function settle() external;
    }
}

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract Erc20 {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }
}

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract LendingPool {
        function accrue(uint256 amount) external;
        function owner() external view returns (address);
    }
}

const DEFAULT_CONFIRMATIONS: u64 = 1;
const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(180);

/// Chain client over any `alloy` provider
#[derive(Clone)]
pub struct EvmChainClient<P> {
    provider: P,
    confirmations: u64,
    confirmation_timeout: Duration,
}

impl<P> fmt::Debug for EvmChainClient<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvmChainClient")
            .field("confirmations", &self.confirmations)
            .field("confirmation_timeout", &self.confirmation_timeout)
            .finish_non_exhaustive()
    }
}

impl<P: Provider + Clone + 'static> EvmChainClient<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            confirmations: DEFAULT_CONFIRMATIONS,
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
        }
    }

    pub fn with_confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = confirmations.max(1);
        self
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}

/// Read-only client over plain HTTP.
pub fn connect_http(rpc_url: &str) -> ChainResult<EvmChainClient<impl Provider + Clone + 'static>> {
    let url = rpc_url
        .parse()
        .map_err(|e| ChainError::Configuration(format!("invalid RPC URL {rpc_url}: {e}")))?;
    Ok(EvmChainClient::new(ProviderBuilder::new().connect_http(url)))
}

fn map_rpc_error<E: fmt::Display>(err: RpcError<E>) -> ChainError {
    match &err {
        RpcError::ErrorResp(payload) => ChainError::classify(&payload.message, Some(payload.code)),
        _ => ChainError::classify(&err.to_string(), None),
    }
}

fn map_contract_error(err: ContractError) -> ChainError {
    match err {
        ContractError::TransportError(inner) => map_rpc_error(inner),
        other => ChainError::Contract(other.to_string()),
    }
}

fn map_pending_error(err: PendingTransactionError, timeout: Duration) -> ChainError {
    match err {
        PendingTransactionError::TxWatcher(WatchTxError::Timeout) => ChainError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        },
        PendingTransactionError::TransportError(inner) => map_rpc_error(inner),
        other => ChainError::Transport(other.to_string()),
    }
}

async fn read<F, T>(call: F) -> ChainResult<T>
where
    F: IntoFuture<Output = Result<T, ContractError>>,
{
    call.await.map_err(map_contract_error)
}

#[async_trait]
impl<P: Provider + Clone + 'static> ChainClient for EvmChainClient<P> {
    async fn chain_id(&self) -> ChainResult<u64> {
        self.provider.get_chain_id().await.map_err(map_rpc_error)
    }

    async fn next_vault_id(&self, factory: Address) -> ChainResult<u64> {
        let factory = EscrowFactory::new(factory, &self.provider);
        let next_id = read(factory.nextId().call()).await?;
        u256_to_u64(next_id, "nextId")
    }

    async fn vault_address(&self, factory: Address, id: u64) -> ChainResult<Address> {
        let factory = EscrowFactory::new(factory, &self.provider);
        read(factory.vaults(U256::from(id)).call()).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn vault_state(&self, vault: Address, rent_bearing: bool) -> ChainResult<RawVaultState> {
        let contract = EscrowVault::new(vault, &self.provider);

        // Call builders must outlive the joined futures that borrow them
        let (landlord, tenant, deposit_amount) = (contract.landlord(), contract.tenant(), contract.depositAmount());
        let (start_ts, end_ts) = (contract.startTs(), contract.endTs());
        let (deposited, settled) = (contract.deposited(), contract.settled());
        let (name, location) = (contract.propertyName(), contract.propertyLocation());

        let (landlord, tenant, deposit_amount, start_ts, end_ts, deposited, settled, name, location) = tokio::try_join!(
            read(landlord.call()),
            read(tenant.call()),
            read(deposit_amount.call()),
            read(start_ts.call()),
            read(end_ts.call()),
            read(deposited.call()),
            read(settled.call()),
            read(name.call()),
            read(location.call()),
        )?;

        let rent = if rent_bearing {
            let monthly_rent = contract.monthlyRent();
            let total_rent_paid = contract.totalRentPaid();
            let month_index = contract.currentMonthIndex();
            let (monthly_rent, total_rent_paid, month_index) = tokio::try_join!(
                read(monthly_rent.call()),
                read(total_rent_paid.call()),
                read(month_index.call()),
            )?;
            Some(RentTerms {
                monthly_rent,
                total_rent_paid,
                current_month_index: u256_to_u64(month_index, "currentMonthIndex")?,
            })
        } else {
            None
        };

        Ok(RawVaultState {
            landlord,
            tenant,
            deposit_amount,
            start_ts: u256_to_u64(start_ts, "startTs")?,
            end_ts: u256_to_u64(end_ts, "endTs")?,
            deposited,
            settled,
            property_name: name,
            property_location: location,
            rent,
        })
    }

    async fn token_balance(&self, token: Address, holder: Address) -> ChainResult<U256> {
        let token = Erc20::new(token, &self.provider);
        read(token.balanceOf(holder).call()).await
    }

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> ChainResult<U256> {
        let token = Erc20::new(token, &self.provider);
        read(token.allowance(owner, spender).call()).await
    }

    async fn pool_owner(&self, pool: Address) -> ChainResult<Address> {
        let pool = LendingPool::new(pool, &self.provider);
        read(pool.owner().call()).await
    }

    async fn submit(&self, from: Address, call: WriteCall) -> ChainResult<TxHash> {
        debug!(call = call.name(), target = %call.target(), from = %from, "Submitting transaction");

        let pending = match call {
            WriteCall::Approve {
                token,
                spender,
                amount,
            } => {
                Erc20::new(token, &self.provider)
                    .approve(spender, amount)
                    .from(from)
                    .send()
                    .await
            }
            WriteCall::DepositAndSupply { vault } => {
                EscrowVault::new(vault, &self.provider)
                    .depositAndSupply()
                    .from(from)
                    .send()
                    .await
            }
            WriteCall::Settle { vault } => {
                EscrowVault::new(vault, &self.provider)
                    .settle()
                    .from(from)
                    .send()
                    .await
            }
            WriteCall::Accrue { pool, amount } => {
                LendingPool::new(pool, &self.provider)
                    .accrue(amount)
                    .from(from)
                    .send()
                    .await
            }
            WriteCall::CreateAgreement {
                factory,
                landlord,
                tenant,
                deposit_amount,
                start_ts,
                end_ts,
                property_name,
                property_location,
            } => {
                EscrowFactory::new(factory, &self.provider)
                    .createAgreement(
                        landlord,
                        tenant,
                        deposit_amount,
                        U256::from(start_ts),
                        U256::from(end_ts),
                        property_name,
                        property_location,
                    )
                    .from(from)
                    .send()
                    .await
            }
        }
        .map_err(map_contract_error)?;

        Ok(*pending.tx_hash())
    }

    async fn wait_for_confirmation(&self, tx: TxHash) -> ChainResult<TxReceipt> {
        let receipt = PendingTransactionBuilder::new(self.provider.root().clone(), tx)
            .with_required_confirmations(self.confirmations)
            .with_timeout(Some(self.confirmation_timeout))
            .get_receipt()
            .await
            .map_err(|e| map_pending_error(e, self.confirmation_timeout))?;

        Ok(TxReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            success: ReceiptResponse::status(&receipt),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_http_rejects_bad_url() {
        let err = connect_http("not a url").unwrap_err();
        assert!(matches!(err, ChainError::Configuration(_)));
    }

    #[test]
    fn test_connect_http_accepts_url() {
        let client = connect_http("http://localhost:8545").unwrap();
        assert_eq!(client.confirmations, DEFAULT_CONFIRMATIONS);
    }

    #[test]
    fn test_confirmation_timeout_keeps_configured_limit() {
        let err = map_pending_error(
            PendingTransactionError::TxWatcher(WatchTxError::Timeout),
            Duration::from_secs(90),
        );
        assert_eq!(err, ChainError::Timeout { timeout_ms: 90_000 });
        assert!(err.is_retryable());
    }

    #[test]
    fn test_watcher_registration_failure_is_transport() {
        let err = map_pending_error(PendingTransactionError::FailedToRegister, DEFAULT_CONFIRMATION_TIMEOUT);
        assert!(matches!(err, ChainError::Transport(_)));
    }
}
