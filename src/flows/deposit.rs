use super::{FlowError, FlowKind, FlowOutcome, FlowProgress, TwoPhaseRequest, TxFlows};
use crate::chain::{ChainClient, WriteCall};
use crate::structured_logging::FlowLogger;
use alloy_primitives::Address;
use std::time::Instant;

impl<C> TxFlows<C>
where
    C: ChainClient + ?Sized,
{
    /// Tenant funds `vault` with its deposit amount and supplies it to the
    /// lending pool.
    pub async fn deposit(
        &self,
        account: Address,
        vault: Address,
        progress: &FlowProgress,
    ) -> Result<FlowOutcome, FlowError> {
        let logger = FlowLogger::new(FlowKind::Deposit.as_str());
        let started = Instant::now();

        let result = async {
            let state = self.read_vault(vault).await?;
            if state.tenant != account {
                return Err(FlowError::Precondition(format!(
                    "{account} is not the tenant of vault {vault}"
                )));
            }
            if state.deposited {
                return Err(FlowError::Precondition(format!("vault {vault} is already funded")));
            }

            logger.log_started(account, vault, state.deposit_amount);
            let request = TwoPhaseRequest {
                account,
                token: self.contracts.stablecoin,
                spender: vault,
                amount: state.deposit_amount,
                call: WriteCall::DepositAndSupply { vault },
            };
            self.run_two_phase(request, progress, &logger).await
        }
        .await;

        self.finish(&logger, progress, started, result)
    }
}
