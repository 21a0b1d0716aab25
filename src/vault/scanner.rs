//! Full registry scan: factory counter, slot addresses, per-vault attributes.

use super::record::VaultRecord;
use crate::chain::{batch_execute, with_retry, BatchConfig, ChainClient, ChainError, ChainResult, RetryPolicy};
use crate::metrics::{metrics, Timer};
use alloy_primitives::Address;
use async_trait::async_trait;
use std::convert::Infallible;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// A scan that produced no usable result.
///
/// Per-vault failures never surface here; they drop the vault instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScanError {
    #[error("factory counter read failed: {0}")]
    Factory(ChainError),

    #[error("factory slot {id} read failed: {source}")]
    Registry { id: u64, source: ChainError },

    #[error("scan task failed: {0}")]
    Internal(String),
}

impl ScanError {
    /// Underlying chain error, if any
    pub fn chain_error(&self) -> Option<&ChainError> {
        match self {
            ScanError::Factory(e) | ScanError::Registry { source: e, .. } => Some(e),
            ScanError::Internal(_) => None,
        }
    }
}

/// Anything that can produce the full vault list.
///
/// The cache only depends on this trait so scans can be replaced in tests.
#[async_trait]
pub trait VaultSource: Send + Sync + 'static {
    async fn scan(&self) -> Result<Vec<VaultRecord>, ScanError>;
}

#[derive(Debug, Clone, Default)]
pub struct ScanSettings {
    pub retry: RetryPolicy,
    pub batch: BatchConfig,
    /// Also read the rent accessory fields
    pub rent_bearing: bool,
}

/// Reads every vault registered in one factory
pub struct VaultScanner<C: ?Sized> {
    client: Arc<C>,
    factory: Address,
    yield_token: Option<Address>,
    settings: ScanSettings,
}

impl<C> VaultScanner<C>
where
    C: ChainClient + ?Sized,
{
    pub fn new(client: Arc<C>, factory: Address, yield_token: Option<Address>, settings: ScanSettings) -> Self {
        Self {
            client,
            factory,
            yield_token,
            settings,
        }
    }

    pub fn factory(&self) -> Address {
        self.factory
    }

    /// Scan the registry. Results are in id order and unfiltered.
    pub async fn scan_registry(&self) -> Result<Vec<VaultRecord>, ScanError> {
        let timer = Timer::new();
        metrics().scans_started.inc();

        let result = self.scan_inner().await;
        match &result {
            Ok(records) => {
                metrics().scans_succeeded.inc();
                timer.observe_duration(&metrics().scan_latency);
                info!(factory = %self.factory, vaults = records.len(), "Registry scan completed");
            }
            Err(err) => {
                metrics().scans_failed.inc();
                warn!(factory = %self.factory, error = %err, "Registry scan aborted");
            }
        }
        result
    }

    async fn scan_inner(&self) -> Result<Vec<VaultRecord>, ScanError> {
        let client = &self.client;
        let factory = self.factory;
        let retry = &self.settings.retry;

        let next_id = with_retry("factory.nextId", retry, || client.next_vault_id(factory))
            .await
            .map_err(ScanError::Factory)?;

        if next_id <= 1 {
            debug!(factory = %factory, "Factory has no vaults");
            return Ok(Vec::new());
        }

        let slot_reads: Vec<_> = (1..next_id)
            .map(|id| {
                move || async move {
                    with_retry("factory.vaults", retry, || client.vault_address(factory, id))
                        .await
                        .map(|address| (id, address))
                        .map_err(|source| ScanError::Registry { id, source })
                }
            })
            .collect();
        let slots = batch_execute(slot_reads, &self.settings.batch).await?;

        let live: Vec<(u64, Address)> = slots
            .into_iter()
            .filter(|(id, address)| {
                if address.is_zero() {
                    debug!(vault_id = id, "Skipping empty registry slot");
                    false
                } else {
                    true
                }
            })
            .collect();

        let fetches: Vec<_> = live
            .into_iter()
            .map(|(id, address)| move || async move { Ok::<_, Infallible>(self.fetch_vault(id, address).await) })
            .collect();
        let fetched = batch_execute(fetches, &self.settings.batch)
            .await
            .unwrap_or_else(|never| match never {});

        Ok(fetched.into_iter().flatten().collect())
    }

    async fn fetch_vault(&self, id: u64, address: Address) -> Option<VaultRecord> {
        match self.try_fetch_vault(id, address).await {
            Ok(record) => Some(record),
            Err(err) => {
                metrics().vaults_dropped.inc();
                warn!(vault_id = id, vault = %address, error = %err, "Dropping vault after failed read");
                None
            }
        }
    }

    async fn try_fetch_vault(&self, id: u64, address: Address) -> ChainResult<VaultRecord> {
        let retry = &self.settings.retry;
        let rent_bearing = self.settings.rent_bearing;

        let raw = with_retry("vault.state", retry, || self.client.vault_state(address, rent_bearing)).await?;

        let current_value = match self.yield_token {
            Some(token) if raw.deposited && !raw.settled => Some(
                with_retry("yieldToken.balanceOf", retry, || self.client.token_balance(token, address)).await?,
            ),
            _ => None,
        };

        let record = VaultRecord::from_raw(id, address, raw, current_value);
        let violations = record.invariant_violations();
        if !violations.is_empty() {
            warn!(vault_id = id, vault = %address, ?violations, "Vault breaks on-chain invariants");
        }
        Ok(record)
    }
}

#[async_trait]
impl<C> VaultSource for VaultScanner<C>
where
    C: ChainClient + ?Sized + 'static,
{
    async fn scan(&self) -> Result<Vec<VaultRecord>, ScanError> {
        self.scan_registry().await
    }
}
