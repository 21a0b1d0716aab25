use super::{FlowError, FlowKind, FlowOutcome, FlowProgress, TwoPhaseRequest, TxFlows};
use crate::chain::{with_retry, ChainClient, WriteCall};
use crate::structured_logging::FlowLogger;
use alloy_primitives::{Address, U256};
use std::time::Instant;

impl<C> TxFlows<C>
where
    C: ChainClient + ?Sized,
{
    /// Pool owner injects `amount` of stablecoin as yield.
    ///
    /// Active vault values change afterwards, so the cache is invalidated
    /// like after any other write.
    pub async fn accrue(
        &self,
        account: Address,
        amount: U256,
        progress: &FlowProgress,
    ) -> Result<FlowOutcome, FlowError> {
        let logger = FlowLogger::new(FlowKind::Accrual.as_str());
        let started = Instant::now();
        let pool = self.contracts.lending_pool;

        let result = async {
            if amount.is_zero() {
                return Err(FlowError::Precondition("accrual amount must be positive".into()));
            }
            let owner = self.pool_owner().await?;
            if owner != account {
                return Err(FlowError::Precondition(format!(
                    "{account} is not the lending pool owner"
                )));
            }

            logger.log_started(account, pool, amount);
            let request = TwoPhaseRequest {
                account,
                token: self.contracts.stablecoin,
                spender: pool,
                amount,
                call: WriteCall::Accrue { pool, amount },
            };
            self.run_two_phase(request, progress, &logger).await
        }
        .await;

        self.finish(&logger, progress, started, result)
    }

    /// Current owner of the lending pool
    pub async fn pool_owner(&self) -> Result<Address, FlowError> {
        let pool = self.contracts.lending_pool;
        with_retry("pool.owner", &self.retry, || self.client.pool_owner(pool))
            .await
            .map_err(FlowError::StateRead)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::flows;
    use super::super::FlowStep;
    use super::*;
    use crate::chain::ChainError;
    use crate::test_utils::MockChainClient;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_owner_accrues_with_exact_approval() {
        let mock = Arc::new(MockChainClient::new());
        let owner = Address::repeat_byte(0x0e);
        let (flows, invalidator) = flows(&mock);
        let amount = U256::from(25_000_000u64);

        let outcome = flows.accrue(owner, amount, &FlowProgress::none()).await.unwrap();

        let submitted = mock.submitted();
        assert_eq!(
            submitted[0].call,
            WriteCall::Approve {
                token: mock.stablecoin,
                spender: mock.pool,
                amount,
            }
        );
        assert_eq!(submitted[1].call, WriteCall::Accrue { pool: mock.pool, amount });
        assert_eq!(outcome.execution_tx, submitted[1].tx);
        assert_eq!(mock.allowance_of(mock.stablecoin, owner, mock.pool), U256::ZERO);
        assert_eq!(invalidator.count(), 1);
    }

    #[tokio::test]
    async fn test_non_owner_is_refused_before_any_write() {
        let mock = Arc::new(MockChainClient::new());
        let (flows, invalidator) = flows(&mock);

        let err = flows
            .accrue(Address::repeat_byte(0x33), U256::from(1u64), &FlowProgress::none())
            .await
            .unwrap_err();

        assert!(matches!(err, FlowError::Precondition(_)));
        assert!(mock.submitted().is_empty());
        assert_eq!(invalidator.count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_execution_leaves_approval_in_place() {
        let mock = Arc::new(MockChainClient::new());
        let owner = Address::repeat_byte(0x0e);
        let (flows, _) = flows(&mock);
        let amount = U256::from(7u64);
        mock.fail_next_submit_of("accrue", ChainError::UserRejected("rejected".into()));

        let err = flows.accrue(owner, amount, &FlowProgress::none()).await.unwrap_err();

        assert_eq!(err.phase(), FlowStep::Executing);
        assert_eq!(mock.allowance_of(mock.stablecoin, owner, mock.pool), amount);
    }

    #[tokio::test]
    async fn test_zero_amount_is_refused() {
        let mock = Arc::new(MockChainClient::new());
        let (flows, _) = flows(&mock);

        let err = flows
            .accrue(Address::repeat_byte(0x0e), U256::ZERO, &FlowProgress::none())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Precondition(_)));
    }
}
