//! Wiring of chain client, scanner, cache and flows from an [`AppConfig`].

use crate::chain::evm::connect_http;
use crate::chain::{with_retry, ChainClient, ChainError, ChainResult, EvmChainClient};
use crate::config::AppConfig;
use crate::flows::TxFlows;
use crate::session::{Session, WalletProvider};
use crate::vault::{ScanSettings, VaultCache, VaultScanner};
use alloy::providers::Provider;
use alloy_primitives::{Address, U256};
use std::sync::Arc;
use tracing::info;

/// One escrow deployment: its chain client, vault cache and flows
pub struct EscrowClient<C: ?Sized> {
    chain: Arc<C>,
    cache: Arc<VaultCache>,
    flows: TxFlows<C>,
    config: AppConfig,
}

impl<C> EscrowClient<C>
where
    C: ChainClient + ?Sized + 'static,
{
    pub fn new(chain: Arc<C>, config: AppConfig) -> Self {
        let settings = ScanSettings {
            retry: config.scan.retry_policy(),
            batch: config.scan.batch_config(),
            rent_bearing: config.contracts.rent_bearing,
        };
        let scanner = VaultScanner::new(
            Arc::clone(&chain),
            config.contracts.factory,
            config.contracts.yield_token,
            settings,
        );
        let cache = Arc::new(VaultCache::new(Arc::new(scanner), config.scan.cache_ttl()));
        let flows = TxFlows::new(
            Arc::clone(&chain),
            cache.clone(),
            config.contracts.clone(),
            config.scan.retry_policy(),
        );

        Self {
            chain,
            cache,
            flows,
            config,
        }
    }

    /// Fail unless the node serves the configured chain.
    pub async fn verify_network(&self) -> ChainResult<()> {
        let actual = self.chain.chain_id().await?;
        let expected = self.config.network.chain_id;
        if actual != expected {
            return Err(ChainError::Configuration(format!(
                "RPC endpoint serves chain {actual}, expected {expected}"
            )));
        }
        Ok(())
    }

    /// Stablecoin held by `account`, in base units.
    pub async fn stablecoin_balance(&self, account: Address) -> ChainResult<U256> {
        let token = self.config.contracts.stablecoin;
        let retry = self.config.scan.retry_policy();
        with_retry("stablecoin.balanceOf", &retry, || self.chain.token_balance(token, account)).await
    }

    pub fn chain(&self) -> &Arc<C> {
        &self.chain
    }

    pub fn cache(&self) -> &Arc<VaultCache> {
        &self.cache
    }

    pub fn flows(&self) -> &TxFlows<C> {
        &self.flows
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Wallet session sharing this client's cache
    pub fn session<W>(&self, wallet: Arc<W>) -> Session<W>
    where
        W: WalletProvider + ?Sized,
    {
        Session::new(wallet, Arc::clone(&self.cache), self.config.network.chain_id)
    }
}

/// Connect over HTTP and check the chain id.
pub async fn connect(
    config: AppConfig,
) -> anyhow::Result<EscrowClient<EvmChainClient<impl Provider + Clone + 'static>>> {
    let chain = connect_http(&config.network.rpc_url)?;
    let client = EscrowClient::new(Arc::new(chain), config);
    client.verify_network().await?;
    info!(
        rpc_url = %client.config().network.rpc_url,
        chain_id = client.config().network.chain_id,
        factory = %client.config().contracts.factory,
        "Escrow client connected"
    );
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContractsConfig, LoggingConfig, NetworkConfig, ScanConfig};
    use crate::flows::FlowProgress;
    use crate::format::format_usdc;
    use crate::test_utils::{raw_vault, MockChainClient};

    fn config(mock: &MockChainClient, chain_id: u64) -> AppConfig {
        AppConfig {
            network: NetworkConfig {
                rpc_url: "http://localhost:8545".into(),
                chain_id,
            },
            contracts: ContractsConfig {
                factory: mock.factory,
                stablecoin: mock.stablecoin,
                lending_pool: mock.pool,
                yield_token: Some(mock.yield_token),
                rent_bearing: false,
            },
            scan: ScanConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_verify_network() {
        let mock = Arc::new(MockChainClient::new());
        let ok = EscrowClient::new(mock.clone(), config(&mock, 31337));
        assert!(ok.verify_network().await.is_ok());

        let wrong = EscrowClient::new(mock.clone(), config(&mock, 1));
        assert!(matches!(
            wrong.verify_network().await,
            Err(ChainError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_successful_deposit_invalidates_shared_cache() {
        let mock = Arc::new(MockChainClient::new());
        let tenant = Address::repeat_byte(0x22);
        let (_, vault) = mock.add_vault(raw_vault(
            Address::repeat_byte(0x11),
            tenant,
            U256::from(500_000_000u64),
            false,
            false,
        ));
        let client = EscrowClient::new(mock.clone(), config(&mock, 31337));

        let before = client.cache().fetch_all_vaults(false).await.unwrap();
        assert!(!before[0].deposited);

        client
            .flows()
            .deposit(tenant, vault, &FlowProgress::none())
            .await
            .unwrap();
        assert_eq!(client.cache().generation(), 1);

        let after = client.cache().fetch_all_vaults(false).await.unwrap();
        assert!(after[0].deposited);
    }

    #[tokio::test]
    async fn test_stablecoin_balance() {
        let mock = Arc::new(MockChainClient::new());
        let account = Address::repeat_byte(0x22);
        let client = EscrowClient::new(mock.clone(), config(&mock, 31337));

        assert_eq!(client.stablecoin_balance(account).await.unwrap(), U256::ZERO);

        mock.set_balance(mock.stablecoin, account, U256::from(1_234_560_000u64));
        mock.set_balance(mock.yield_token, account, U256::from(7u64));
        let balance = client.stablecoin_balance(account).await.unwrap();
        assert_eq!(format_usdc(balance), "1234.56");

        mock.fail_balance_reads(account);
        assert!(matches!(
            client.stablecoin_balance(account).await,
            Err(ChainError::Timeout { .. })
        ));
    }
}
