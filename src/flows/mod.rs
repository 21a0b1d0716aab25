//! Transaction flows
//!
//! Deposit and accrual are two-phase: an exact-amount ERC-20 approval (only
//! when the current allowance is short) followed by the domain call. Settle
//! and agreement creation are single calls. Every flow reports its step and
//! transaction hashes through [`FlowProgress`] as they become known,
//! returns a typed [`FlowError`] naming the failed phase, and invalidates the
//! vault cache once on success.
//!
//! Writes are never retried. Re-running a failed flow re-reads the
//! allowance, so an approval that already confirmed is not repeated.

use crate::chain::{with_retry, ChainClient, ChainError, ChainResult, RawVaultState, RetryPolicy, TxReceipt, WriteCall};
use crate::config::ContractsConfig;
use crate::metrics::metrics;
use crate::structured_logging::FlowLogger;
use crate::vault::CacheInvalidator;
use alloy_primitives::{Address, TxHash, U256};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod accrual;
pub mod agreement;
pub mod deposit;
pub mod settle;

pub use agreement::AgreementTerms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKind {
    Deposit,
    Accrual,
    Settle,
    CreateAgreement,
}

impl FlowKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FlowKind::Deposit => "deposit",
            FlowKind::Accrual => "accrual",
            FlowKind::Settle => "settle",
            FlowKind::CreateAgreement => "create_agreement",
        }
    }
}

/// Position in the flow state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowStep {
    Idle,
    CheckingAllowance,
    Approving,
    WaitingApproval,
    Executing,
    WaitingExecution,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowEvent {
    Step(FlowStep),
    ApprovalSubmitted(TxHash),
    ApprovalConfirmed(TxHash),
    ExecutionSubmitted(TxHash),
    ExecutionConfirmed(TxHash),
}

/// Optional sink for incremental flow events
#[derive(Debug, Clone, Default)]
pub struct FlowProgress {
    sender: Option<mpsc::UnboundedSender<FlowEvent>>,
}

impl FlowProgress {
    /// Discard all events
    pub fn none() -> Self {
        Self::default()
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<FlowEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender: Some(sender) }, receiver)
    }

    fn emit(&self, event: FlowEvent) {
        if let Some(sender) = &self.sender {
            // Receiver gone means nobody is watching
            let _ = sender.send(event);
        }
    }

    fn step(&self, step: FlowStep) {
        self.emit(FlowEvent::Step(step));
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlowError {
    /// Caller or vault state does not allow the flow
    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Reading current state failed: {0}")]
    StateRead(ChainError),

    #[error("Allowance check failed: {0}")]
    AllowanceCheck(ChainError),

    /// `tx` is set when the approval was broadcast before failing
    #[error("Approval failed: {source}")]
    Approval { tx: Option<TxHash>, source: ChainError },

    /// `tx` is set when the call was broadcast before failing
    #[error("Execution failed: {source}")]
    Execution {
        approval_tx: Option<TxHash>,
        tx: Option<TxHash>,
        source: ChainError,
    },
}

impl FlowError {
    /// Step the flow was in when it failed
    pub fn phase(&self) -> FlowStep {
        match self {
            FlowError::Precondition(_) | FlowError::StateRead(_) => FlowStep::Idle,
            FlowError::AllowanceCheck(_) => FlowStep::CheckingAllowance,
            FlowError::Approval { tx: None, .. } => FlowStep::Approving,
            FlowError::Approval { tx: Some(_), .. } => FlowStep::WaitingApproval,
            FlowError::Execution { tx: None, .. } => FlowStep::Executing,
            FlowError::Execution { tx: Some(_), .. } => FlowStep::WaitingExecution,
        }
    }

    pub fn chain_error(&self) -> Option<&ChainError> {
        match self {
            FlowError::Precondition(_) => None,
            FlowError::StateRead(e) | FlowError::AllowanceCheck(e) => Some(e),
            FlowError::Approval { source, .. } | FlowError::Execution { source, .. } => Some(source),
        }
    }

    pub fn is_user_rejection(&self) -> bool {
        self.chain_error().is_some_and(ChainError::is_user_rejection)
    }
}

/// Hashes and final receipt of a successful flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowOutcome {
    pub approval_tx: Option<TxHash>,
    pub execution_tx: TxHash,
    pub receipt: TxReceipt,
}

/// Parameters of one approve-then-execute run
#[derive(Debug, Clone)]
pub struct TwoPhaseRequest {
    pub account: Address,
    pub token: Address,
    pub spender: Address,
    pub amount: U256,
    pub call: WriteCall,
}

/// Entry point for every state-changing flow
pub struct TxFlows<C: ?Sized> {
    client: Arc<C>,
    invalidator: Arc<dyn CacheInvalidator>,
    contracts: ContractsConfig,
    retry: RetryPolicy,
}

impl<C> TxFlows<C>
where
    C: ChainClient + ?Sized,
{
    pub fn new(
        client: Arc<C>,
        invalidator: Arc<dyn CacheInvalidator>,
        contracts: ContractsConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            invalidator,
            contracts,
            retry,
        }
    }

    pub fn contracts(&self) -> &ContractsConfig {
        &self.contracts
    }

    /// Live vault attributes, never the cached copy
    async fn read_vault(&self, vault: Address) -> Result<RawVaultState, FlowError> {
        let rent_bearing = self.contracts.rent_bearing;
        with_retry("vault.state", &self.retry, || self.client.vault_state(vault, rent_bearing))
            .await
            .map_err(FlowError::StateRead)
    }

    async fn run_two_phase(
        &self,
        request: TwoPhaseRequest,
        progress: &FlowProgress,
        logger: &FlowLogger,
    ) -> Result<FlowOutcome, FlowError> {
        let client = &self.client;

        progress.step(FlowStep::CheckingAllowance);
        let allowance = with_retry("token.allowance", &self.retry, || {
            client.allowance(request.token, request.account, request.spender)
        })
        .await
        .map_err(FlowError::AllowanceCheck)?;
        logger.log_allowance(allowance, request.amount);

        let approval_tx = if allowance < request.amount {
            progress.step(FlowStep::Approving);
            let approve = WriteCall::Approve {
                token: request.token,
                spender: request.spender,
                amount: request.amount,
            };
            let tx = client
                .submit(request.account, approve)
                .await
                .map_err(|source| FlowError::Approval { tx: None, source })?;
            logger.log_tx_submitted("approve", tx);
            progress.emit(FlowEvent::ApprovalSubmitted(tx));

            progress.step(FlowStep::WaitingApproval);
            let receipt = self
                .confirm(tx)
                .await
                .map_err(|source| FlowError::Approval { tx: Some(tx), source })?;
            logger.log_tx_confirmed("approve", tx, receipt.block_number);
            progress.emit(FlowEvent::ApprovalConfirmed(tx));
            Some(tx)
        } else {
            metrics().approvals_skipped.inc();
            None
        };

        self.execute(request.account, request.call, approval_tx, progress, logger)
            .await
    }

    async fn execute(
        &self,
        account: Address,
        call: WriteCall,
        approval_tx: Option<TxHash>,
        progress: &FlowProgress,
        logger: &FlowLogger,
    ) -> Result<FlowOutcome, FlowError> {
        let name = call.name();

        progress.step(FlowStep::Executing);
        let tx = self
            .client
            .submit(account, call)
            .await
            .map_err(|source| FlowError::Execution {
                approval_tx,
                tx: None,
                source,
            })?;
        logger.log_tx_submitted(name, tx);
        progress.emit(FlowEvent::ExecutionSubmitted(tx));

        progress.step(FlowStep::WaitingExecution);
        let receipt = self.confirm(tx).await.map_err(|source| FlowError::Execution {
            approval_tx,
            tx: Some(tx),
            source,
        })?;
        logger.log_tx_confirmed(name, tx, receipt.block_number);
        progress.emit(FlowEvent::ExecutionConfirmed(tx));

        Ok(FlowOutcome {
            approval_tx,
            execution_tx: tx,
            receipt,
        })
    }

    async fn confirm(&self, tx: TxHash) -> ChainResult<TxReceipt> {
        let receipt = self.client.wait_for_confirmation(tx).await?;
        if !receipt.success {
            return Err(ChainError::Reverted { tx });
        }
        Ok(receipt)
    }

    /// Record the outcome and invalidate the cache after a success.
    fn finish(
        &self,
        logger: &FlowLogger,
        progress: &FlowProgress,
        started: Instant,
        result: Result<FlowOutcome, FlowError>,
    ) -> Result<FlowOutcome, FlowError> {
        let latency_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => {
                self.invalidator.invalidate();
                metrics().flows_succeeded.inc();
                logger.log_succeeded(outcome.execution_tx, latency_ms);
                progress.step(FlowStep::Done);
            }
            Err(err) => {
                metrics().flows_failed.inc();
                logger.log_failed(&err.to_string(), latency_ms);
                progress.step(FlowStep::Failed);
            }
        }
        result
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::test_utils::{CountingInvalidator, MockChainClient};

    pub(crate) fn contracts(mock: &MockChainClient) -> ContractsConfig {
        ContractsConfig {
            factory: mock.factory,
            stablecoin: mock.stablecoin,
            lending_pool: mock.pool,
            yield_token: Some(mock.yield_token),
            rent_bearing: false,
        }
    }

    pub(crate) fn flows(
        mock: &Arc<MockChainClient>,
    ) -> (TxFlows<MockChainClient>, Arc<CountingInvalidator>) {
        let invalidator = Arc::new(CountingInvalidator::default());
        let flows = TxFlows::new(
            mock.clone(),
            invalidator.clone(),
            contracts(mock),
            RetryPolicy::default(),
        );
        (flows, invalidator)
    }

    pub(crate) fn drain(receiver: &mut mpsc::UnboundedReceiver<FlowEvent>) -> Vec<FlowEvent> {
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_error_phase_mapping() {
        let source = ChainError::UserRejected("denied".into());
        let tx = TxHash::repeat_byte(0x01);

        assert_eq!(FlowError::Precondition("x".into()).phase(), FlowStep::Idle);
        assert_eq!(
            FlowError::Approval { tx: None, source: source.clone() }.phase(),
            FlowStep::Approving
        );
        assert_eq!(
            FlowError::Execution {
                approval_tx: Some(tx),
                tx: Some(tx),
                source: source.clone()
            }
            .phase(),
            FlowStep::WaitingExecution
        );
        assert!(FlowError::Approval { tx: None, source }.is_user_rejection());
        assert!(!FlowError::Precondition("x".into()).is_user_rejection());
    }

    #[test]
    fn test_progress_without_receiver_is_silent() {
        let (progress, receiver) = FlowProgress::channel();
        drop(receiver);
        progress.step(FlowStep::Executing);
        FlowProgress::none().step(FlowStep::Done);
    }
}
