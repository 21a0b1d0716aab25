//! Test Utilities Module
//!
//! In-memory stand-ins for the chain and the wallet so scans, flows and the
//! session can be exercised without a node.
//!
//! These utilities are only compiled when running tests or when the
//! `test_utils` feature is enabled.

#![cfg(any(test, feature = "test_utils"))]

use crate::chain::{ChainClient, ChainError, ChainResult, RawVaultState, TxReceipt, WriteCall};
use crate::session::{WalletError, WalletProvider};
use crate::vault::CacheInvalidator;
use alloy_primitives::{Address, TxHash, B256, U256};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Raw vault attributes with a one-month term starting at 1_700_000_000
pub fn raw_vault(landlord: Address, tenant: Address, deposit_amount: U256, deposited: bool, settled: bool) -> RawVaultState {
    RawVaultState {
        landlord,
        tenant,
        deposit_amount,
        start_ts: 1_700_000_000,
        end_ts: 1_702_592_000,
        deposited,
        settled,
        property_name: B256::ZERO,
        property_location: B256::ZERO,
        rent: None,
    }
}

/// A write call as seen by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTx {
    pub from: Address,
    pub call: WriteCall,
    pub tx: TxHash,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    slots: HashMap<u64, Address>,
    vaults: HashMap<Address, RawVaultState>,
    balances: HashMap<(Address, Address), U256>,
    allowances: HashMap<(Address, Address, Address), U256>,
    pool_owner: Address,
    failing_slots: HashSet<u64>,
    failing_vaults: HashSet<Address>,
    vault_errors: HashMap<Address, VecDeque<ChainError>>,
    failing_balances: HashSet<Address>,
    factory_errors: VecDeque<ChainError>,
    submit_errors: HashMap<&'static str, VecDeque<ChainError>>,
    reverting: HashSet<&'static str>,
    receipts: HashMap<TxHash, TxReceipt>,
    submitted: Vec<SubmittedTx>,
    tx_counter: u64,
}

/// Mock chain client
///
/// Write calls take effect at submission, the way a single-block devnet
/// would. Contract-level checks (caller, flags, allowance) reject at submit
/// time with a revert-style error.
pub struct MockChainClient {
    pub chain_id: u64,
    pub factory: Address,
    pub stablecoin: Address,
    pub yield_token: Address,
    pub pool: Address,
    state: Mutex<MockState>,
}

impl Default for MockChainClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChainClient {
    pub fn new() -> Self {
        let state = MockState {
            next_id: 1,
            pool_owner: Address::repeat_byte(0x0e),
            ..MockState::default()
        };
        Self {
            chain_id: 31337,
            factory: Address::repeat_byte(0xfa),
            stablecoin: Address::repeat_byte(0x5c),
            yield_token: Address::repeat_byte(0xa7),
            pool: Address::repeat_byte(0x90),
            state: Mutex::new(state),
        }
    }

    fn slot_address(id: u64) -> Address {
        Address::left_padding_from(&(0x1000 + id).to_be_bytes())
    }

    /// Register a vault in the next slot
    pub fn add_vault(&self, raw: RawVaultState) -> (u64, Address) {
        let mut state = self.state.lock();
        let id = state.next_id;
        let address = Self::slot_address(id);
        state.slots.insert(id, address);
        state.vaults.insert(address, raw);
        state.next_id += 1;
        (id, address)
    }

    /// Burn a slot with the zero address
    pub fn add_empty_slot(&self) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.slots.insert(id, Address::ZERO);
        state.next_id += 1;
        id
    }

    pub fn vault_address_of(&self, id: u64) -> Option<Address> {
        self.state.lock().slots.get(&id).copied()
    }

    pub fn vault_raw(&self, vault: Address) -> Option<RawVaultState> {
        self.state.lock().vaults.get(&vault).cloned()
    }

    pub fn set_balance(&self, token: Address, holder: Address, amount: U256) {
        self.state.lock().balances.insert((token, holder), amount);
    }

    pub fn set_allowance(&self, token: Address, owner: Address, spender: Address, amount: U256) {
        self.state.lock().allowances.insert((token, owner, spender), amount);
    }

    pub fn allowance_of(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.state
            .lock()
            .allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default()
    }

    pub fn set_pool_owner(&self, owner: Address) {
        self.state.lock().pool_owner = owner;
    }

    /// Every attribute read of `vault` fails
    pub fn fail_vault_reads(&self, vault: Address) {
        self.state.lock().failing_vaults.insert(vault);
    }

    /// Every registry read of slot `id` fails
    pub fn fail_slot_reads(&self, id: u64) {
        self.state.lock().failing_slots.insert(id);
    }

    /// Errors returned, in order, by the next attribute reads of `vault`
    pub fn queue_vault_errors(&self, vault: Address, errors: Vec<ChainError>) {
        self.state.lock().vault_errors.entry(vault).or_default().extend(errors);
    }

    /// Every `balanceOf(holder)` fails
    pub fn fail_balance_reads(&self, holder: Address) {
        self.state.lock().failing_balances.insert(holder);
    }

    /// Errors returned, in order, by the next `nextId()` reads
    pub fn queue_factory_errors(&self, errors: Vec<ChainError>) {
        self.state.lock().factory_errors.extend(errors);
    }

    /// The next submission of `call_name` fails before broadcast
    pub fn fail_next_submit_of(&self, call_name: &'static str, error: ChainError) {
        self.state
            .lock()
            .submit_errors
            .entry(call_name)
            .or_default()
            .push_back(error);
    }

    /// The next `call_name` is mined but reverts
    pub fn revert_next(&self, call_name: &'static str) {
        self.state.lock().reverting.insert(call_name);
    }

    pub fn submitted(&self) -> Vec<SubmittedTx> {
        self.state.lock().submitted.clone()
    }

    pub fn submitted_names(&self) -> Vec<&'static str> {
        self.state.lock().submitted.iter().map(|s| s.call.name()).collect()
    }

    fn revert(reason: &str) -> ChainError {
        ChainError::Contract(format!("execution reverted: {reason}"))
    }

    fn apply(state: &mut MockState, stablecoin: Address, from: Address, call: &WriteCall) -> ChainResult<()> {
        match call {
            WriteCall::Approve { token, spender, amount } => {
                state.allowances.insert((*token, from, *spender), *amount);
            }
            WriteCall::DepositAndSupply { vault } => {
                let raw = state.vaults.get(vault).cloned().ok_or_else(|| Self::revert("no vault"))?;
                if raw.tenant != from {
                    return Err(Self::revert("only tenant"));
                }
                if raw.deposited {
                    return Err(Self::revert("already deposited"));
                }
                let key = (stablecoin, from, *vault);
                let allowance = state.allowances.get(&key).copied().unwrap_or_default();
                if allowance < raw.deposit_amount {
                    return Err(Self::revert("ERC20: insufficient allowance"));
                }
                state.allowances.insert(key, allowance - raw.deposit_amount);
                if let Some(v) = state.vaults.get_mut(vault) {
                    v.deposited = true;
                }
            }
            WriteCall::Settle { vault } => {
                let raw = state.vaults.get_mut(vault).ok_or_else(|| Self::revert("no vault"))?;
                if raw.landlord != from {
                    return Err(Self::revert("only landlord"));
                }
                if !raw.deposited || raw.settled {
                    return Err(Self::revert("not active"));
                }
                raw.settled = true;
            }
            WriteCall::Accrue { pool, amount } => {
                if state.pool_owner != from {
                    return Err(Self::revert("Ownable: caller is not the owner"));
                }
                let key = (stablecoin, from, *pool);
                let allowance = state.allowances.get(&key).copied().unwrap_or_default();
                if allowance < *amount {
                    return Err(Self::revert("ERC20: insufficient allowance"));
                }
                state.allowances.insert(key, allowance - *amount);
            }
            WriteCall::CreateAgreement {
                landlord,
                tenant,
                deposit_amount,
                start_ts,
                end_ts,
                property_name,
                property_location,
                ..
            } => {
                let id = state.next_id;
                let address = Self::slot_address(id);
                state.slots.insert(id, address);
                state.vaults.insert(
                    address,
                    RawVaultState {
                        landlord: *landlord,
                        tenant: *tenant,
                        deposit_amount: *deposit_amount,
                        start_ts: *start_ts,
                        end_ts: *end_ts,
                        deposited: false,
                        settled: false,
                        property_name: *property_name,
                        property_location: *property_location,
                        rent: None,
                    },
                );
                state.next_id += 1;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn chain_id(&self) -> ChainResult<u64> {
        Ok(self.chain_id)
    }

    async fn next_vault_id(&self, factory: Address) -> ChainResult<u64> {
        let mut state = self.state.lock();
        if let Some(err) = state.factory_errors.pop_front() {
            return Err(err);
        }
        if factory != self.factory {
            return Err(ChainError::Contract("no contract code at factory address".into()));
        }
        Ok(state.next_id)
    }

    async fn vault_address(&self, _factory: Address, id: u64) -> ChainResult<Address> {
        let state = self.state.lock();
        if state.failing_slots.contains(&id) {
            return Err(ChainError::Transport(format!("vaults({id}) connection reset")));
        }
        Ok(state.slots.get(&id).copied().unwrap_or(Address::ZERO))
    }

    async fn vault_state(&self, vault: Address, _rent_bearing: bool) -> ChainResult<RawVaultState> {
        let mut state = self.state.lock();
        if let Some(err) = state.vault_errors.get_mut(&vault).and_then(|q| q.pop_front()) {
            return Err(err);
        }
        if state.failing_vaults.contains(&vault) {
            return Err(ChainError::Contract("abi decode failed".into()));
        }
        state
            .vaults
            .get(&vault)
            .cloned()
            .ok_or_else(|| ChainError::Contract(format!("no vault at {vault}")))
    }

    async fn token_balance(&self, token: Address, holder: Address) -> ChainResult<U256> {
        let state = self.state.lock();
        if state.failing_balances.contains(&holder) {
            return Err(ChainError::Timeout { timeout_ms: 30_000 });
        }
        Ok(state.balances.get(&(token, holder)).copied().unwrap_or_default())
    }

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> ChainResult<U256> {
        Ok(self
            .state
            .lock()
            .allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default())
    }

    async fn pool_owner(&self, _pool: Address) -> ChainResult<Address> {
        Ok(self.state.lock().pool_owner)
    }

    async fn submit(&self, from: Address, call: WriteCall) -> ChainResult<TxHash> {
        let mut state = self.state.lock();
        let name = call.name();

        if let Some(err) = state.submit_errors.get_mut(name).and_then(|q| q.pop_front()) {
            return Err(err);
        }

        let reverts = state.reverting.remove(name);
        if !reverts {
            Self::apply(&mut state, self.stablecoin, from, &call)?;
        }

        state.tx_counter += 1;
        let block = state.tx_counter;
        let tx = B256::left_padding_from(&block.to_be_bytes());
        state.receipts.insert(
            tx,
            TxReceipt {
                tx_hash: tx,
                block_number: Some(block),
                success: !reverts,
            },
        );
        state.submitted.push(SubmittedTx { from, call, tx });
        Ok(tx)
    }

    async fn wait_for_confirmation(&self, tx: TxHash) -> ChainResult<TxReceipt> {
        self.state
            .lock()
            .receipts
            .get(&tx)
            .cloned()
            .ok_or_else(|| ChainError::Transport(format!("unknown transaction {tx}")))
    }
}

/// Counts invalidation calls
#[derive(Debug, Default)]
pub struct CountingInvalidator {
    count: AtomicUsize,
}

impl CountingInvalidator {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl CacheInvalidator for CountingInvalidator {
    fn invalidate(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Mock wallet with scriptable account, chain and connection outcome
pub struct MockWallet {
    state: Mutex<MockWalletState>,
}

struct MockWalletState {
    accounts: Vec<Address>,
    authorized: bool,
    chain_id: u64,
    reject_requests: bool,
    requests: usize,
}

impl MockWallet {
    /// Wallet holding `accounts` on `chain_id`, not yet authorized
    pub fn new(accounts: Vec<Address>, chain_id: u64) -> Self {
        Self {
            state: Mutex::new(MockWalletState {
                accounts,
                authorized: false,
                chain_id,
                reject_requests: false,
                requests: 0,
            }),
        }
    }

    /// Site already approved earlier; silent reconnection succeeds
    pub fn authorized(self) -> Self {
        self.state.lock().authorized = true;
        self
    }

    pub fn reject_requests(&self) {
        self.state.lock().reject_requests = true;
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.state.lock().chain_id = chain_id;
    }

    pub fn set_accounts(&self, accounts: Vec<Address>) {
        self.state.lock().accounts = accounts;
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().requests
    }
}

#[async_trait]
impl WalletProvider for MockWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>, WalletError> {
        let mut state = self.state.lock();
        state.requests += 1;
        if state.reject_requests {
            return Err(WalletError::Rejected("User rejected the request.".into()));
        }
        state.authorized = true;
        Ok(state.accounts.clone())
    }

    async fn get_accounts(&self) -> Result<Vec<Address>, WalletError> {
        let state = self.state.lock();
        if state.authorized {
            Ok(state.accounts.clone())
        } else {
            Ok(Vec::new())
        }
    }

    async fn chain_id(&self) -> Result<u64, WalletError> {
        Ok(self.state.lock().chain_id)
    }
}
