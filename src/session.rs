//! Wallet session: connected account, active chain and the vault cache they
//! scope.
//!
//! Wallet notifications arrive as [`WalletEvent`]s on a channel instead of
//! callbacks. [`Session::handle_event`] is a plain state transition; the
//! follow-up scan is done by [`Session::run`].

use crate::vault::{relevant_vaults, RoleView, ScanError, VaultCache};
use alloy_primitives::Address;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    #[error("No wallet available")]
    Unavailable,

    #[error("Wallet request rejected: {0}")]
    Rejected(String),

    #[error("Wallet error: {0}")]
    Provider(String),
}

/// Account access offered by an injected wallet
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Prompt the user to expose accounts
    async fn request_accounts(&self) -> Result<Vec<Address>, WalletError>;

    /// Accounts already exposed to this site, without prompting
    async fn get_accounts(&self) -> Result<Vec<Address>, WalletError>;

    async fn chain_id(&self) -> Result<u64, WalletError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
    Disconnected,
}

/// Result of applying one [`WalletEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    Unchanged,
    AccountSwitched { account: Address },
    Disconnected,
    /// Account and vault list were dropped; the wallet must be re-read
    ChainReset { chain_id: u64 },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error("No account connected")]
    NotConnected,

    #[error("Wrong network: expected chain {expected}, wallet is on {actual}")]
    WrongNetwork { expected: u64, actual: u64 },

    #[error(transparent)]
    Scan(#[from] ScanError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkMismatch {
    pub expected: u64,
    pub actual: u64,
}

#[derive(Debug, Default)]
struct SessionState {
    account: Option<Address>,
    chain_id: Option<u64>,
}

pub struct Session<W: ?Sized> {
    wallet: Arc<W>,
    cache: Arc<VaultCache>,
    expected_chain_id: u64,
    state: Mutex<SessionState>,
}

impl<W> Session<W>
where
    W: WalletProvider + ?Sized,
{
    pub fn new(wallet: Arc<W>, cache: Arc<VaultCache>, expected_chain_id: u64) -> Self {
        Self {
            wallet,
            cache,
            expected_chain_id,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn cache(&self) -> &Arc<VaultCache> {
        &self.cache
    }

    pub fn account(&self) -> Option<Address> {
        self.state.lock().account
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.state.lock().chain_id
    }

    /// Ask the wallet for an account, prompting the user if needed.
    pub async fn connect(&self) -> Result<Address, SessionError> {
        let accounts = self.wallet.request_accounts().await?;
        let account = accounts.first().copied().ok_or(SessionError::NotConnected)?;
        self.adopt(account).await
    }

    /// Reconnect silently if the wallet already trusts this site.
    pub async fn auto_connect(&self) -> Result<Option<Address>, SessionError> {
        match self.wallet.get_accounts().await?.first().copied() {
            Some(account) => self.adopt(account).await.map(Some),
            None => {
                debug!("No previously authorized account");
                Ok(None)
            }
        }
    }

    async fn adopt(&self, account: Address) -> Result<Address, SessionError> {
        let chain_id = self.wallet.chain_id().await?;
        {
            let mut state = self.state.lock();
            state.account = Some(account);
            state.chain_id = Some(chain_id);
        }
        info!(account = %account, chain_id, "Wallet connected");
        if let Some(mismatch) = self.network_mismatch() {
            warn!(expected = mismatch.expected, actual = mismatch.actual, "Wallet is on the wrong network");
        }
        Ok(account)
    }

    /// `Some` when the wallet's chain differs from the configured one.
    pub fn network_mismatch(&self) -> Option<NetworkMismatch> {
        let actual = self.state.lock().chain_id?;
        (actual != self.expected_chain_id).then_some(NetworkMismatch {
            expected: self.expected_chain_id,
            actual,
        })
    }

    /// Apply a wallet notification.
    ///
    /// Any change of account or chain invalidates the vault cache.
    pub fn handle_event(&self, event: WalletEvent) -> SessionTransition {
        let transition = {
            let mut state = self.state.lock();
            match event {
                WalletEvent::AccountsChanged(accounts) => match accounts.first().copied() {
                    Some(account) if state.account == Some(account) => SessionTransition::Unchanged,
                    Some(account) => {
                        state.account = Some(account);
                        SessionTransition::AccountSwitched { account }
                    }
                    None => {
                        state.account = None;
                        SessionTransition::Disconnected
                    }
                },
                WalletEvent::ChainChanged(chain_id) => {
                    *state = SessionState {
                        account: None,
                        chain_id: Some(chain_id),
                    };
                    SessionTransition::ChainReset { chain_id }
                }
                WalletEvent::Disconnected => {
                    *state = SessionState::default();
                    SessionTransition::Disconnected
                }
            }
        };

        if transition != SessionTransition::Unchanged {
            self.cache.invalidate();
            info!(?transition, "Wallet session changed");
        }
        transition
    }

    /// Consume wallet events until the sender is dropped, re-scanning after
    /// every account switch. A chain change onto the expected network
    /// reconnects silently before the re-scan.
    pub async fn run(&self, mut events: mpsc::Receiver<WalletEvent>) {
        while let Some(event) = events.recv().await {
            let rescan = match self.handle_event(event) {
                SessionTransition::AccountSwitched { .. } => true,
                SessionTransition::ChainReset { .. } if self.network_mismatch().is_none() => {
                    if let Err(err) = self.auto_connect().await {
                        warn!(error = %err, "Reconnect after chain change failed");
                    }
                    true
                }
                SessionTransition::ChainReset { .. } | SessionTransition::Unchanged | SessionTransition::Disconnected => {
                    false
                }
            };

            if rescan {
                if let Err(err) = self.cache.fetch_all_vaults(false).await {
                    warn!(error = %err, "Re-scan after wallet change failed");
                }
            }
        }
        debug!("Wallet event stream closed");
    }

    /// Vaults of the connected account with its role, in display order.
    pub async fn my_vaults(&self, force_refresh: bool) -> Result<Vec<RoleView>, SessionError> {
        let account = self.account().ok_or(SessionError::NotConnected)?;
        if let Some(mismatch) = self.network_mismatch() {
            return Err(SessionError::WrongNetwork {
                expected: mismatch.expected,
                actual: mismatch.actual,
            });
        }

        let vaults = self.cache.fetch_all_vaults(force_refresh).await?;
        Ok(relevant_vaults(&vaults, account))
    }
}
