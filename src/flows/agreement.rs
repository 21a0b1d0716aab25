use super::{FlowError, FlowKind, FlowOutcome, FlowProgress, TxFlows};
use crate::chain::{ChainClient, WriteCall};
use crate::format::encode_bytes32;
use crate::structured_logging::FlowLogger;
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Terms of a new escrow agreement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementTerms {
    pub landlord: Address,
    pub tenant: Address,
    pub deposit_amount: U256,
    pub start_ts: u64,
    pub end_ts: u64,
    pub property_name: String,
    pub property_location: String,
}

impl AgreementTerms {
    /// Build the factory call, rejecting terms the contract would refuse.
    pub fn to_call(&self, factory: Address) -> Result<WriteCall, FlowError> {
        if self.landlord.is_zero() || self.tenant.is_zero() {
            return Err(FlowError::Precondition("landlord and tenant must be set".into()));
        }
        if self.landlord == self.tenant {
            return Err(FlowError::Precondition("landlord and tenant must differ".into()));
        }
        if self.deposit_amount.is_zero() {
            return Err(FlowError::Precondition("deposit amount must be positive".into()));
        }
        if self.end_ts <= self.start_ts {
            return Err(FlowError::Precondition("end date must be after start date".into()));
        }

        let property_name = encode_bytes32(&self.property_name)
            .map_err(|e| FlowError::Precondition(format!("property name: {e}")))?;
        let property_location = encode_bytes32(&self.property_location)
            .map_err(|e| FlowError::Precondition(format!("property location: {e}")))?;

        Ok(WriteCall::CreateAgreement {
            factory,
            landlord: self.landlord,
            tenant: self.tenant,
            deposit_amount: self.deposit_amount,
            start_ts: self.start_ts,
            end_ts: self.end_ts,
            property_name,
            property_location,
        })
    }
}

impl<C> TxFlows<C>
where
    C: ChainClient + ?Sized,
{
    /// Register a new vault through the factory.
    pub async fn create_agreement(
        &self,
        account: Address,
        terms: &AgreementTerms,
        progress: &FlowProgress,
    ) -> Result<FlowOutcome, FlowError> {
        let logger = FlowLogger::new(FlowKind::CreateAgreement.as_str());
        let started = Instant::now();
        let factory = self.contracts.factory;

        let result = async {
            let call = terms.to_call(factory)?;
            logger.log_started(account, factory, terms.deposit_amount);
            self.execute(account, call, None, progress, &logger).await
        }
        .await;

        self.finish(&logger, progress, started, result)
    }
}
