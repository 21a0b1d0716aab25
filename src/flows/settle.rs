use super::{FlowError, FlowKind, FlowOutcome, FlowProgress, TxFlows};
use crate::chain::{ChainClient, WriteCall};
use crate::structured_logging::FlowLogger;
use alloy_primitives::Address;
use std::time::Instant;

impl<C> TxFlows<C>
where
    C: ChainClient + ?Sized,
{
    /// Landlord settles an active vault once its term has ended.
    ///
    /// `now_secs` is the caller's wall clock; the contract enforces the same
    /// bound against block time.
    pub async fn settle(
        &self,
        account: Address,
        vault: Address,
        now_secs: u64,
        progress: &FlowProgress,
    ) -> Result<FlowOutcome, FlowError> {
        let logger = FlowLogger::new(FlowKind::Settle.as_str());
        let started = Instant::now();

        let result = async {
            let state = self.read_vault(vault).await?;
            if state.landlord != account {
                return Err(FlowError::Precondition(format!(
                    "{account} is not the landlord of vault {vault}"
                )));
            }
            if !state.deposited || state.settled {
                return Err(FlowError::Precondition(format!("vault {vault} is not active")));
            }
            if now_secs < state.end_ts {
                return Err(FlowError::Precondition(format!(
                    "vault {vault} term ends at {}",
                    state.end_ts
                )));
            }

            logger.log_started(account, vault, state.deposit_amount);
            self.execute(account, WriteCall::Settle { vault }, None, progress, &logger)
                .await
        }
        .await;

        self.finish(&logger, progress, started, result)
    }
}
