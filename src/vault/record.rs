use crate::chain::{RawVaultState, RentTerms};
use crate::format::decode_bytes32;
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// One escrow vault as observed by the last scan.
///
/// Records are value objects: a newer scan replaces them, nothing mutates
/// them in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    /// 1-based index in the factory registry
    pub id: u64,
    pub address: Address,
    pub landlord: Address,
    pub tenant: Address,
    /// Smallest stablecoin unit
    pub deposit_amount: U256,
    pub start_timestamp: u64,
    pub end_timestamp: u64,
    pub property_name: String,
    pub property_location: String,
    pub deposited: bool,
    pub settled: bool,
    /// Principal plus accrued yield. Equal to `deposit_amount` unless the
    /// vault is active and a yield token balance was read.
    pub current_value: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rent: Option<RentTerms>,
}

impl VaultRecord {
    pub fn from_raw(id: u64, address: Address, raw: RawVaultState, current_value: Option<U256>) -> Self {
        Self {
            id,
            address,
            landlord: raw.landlord,
            tenant: raw.tenant,
            deposit_amount: raw.deposit_amount,
            start_timestamp: raw.start_ts,
            end_timestamp: raw.end_ts,
            property_name: decode_bytes32(&raw.property_name),
            property_location: decode_bytes32(&raw.property_location),
            deposited: raw.deposited,
            settled: raw.settled,
            current_value: current_value.unwrap_or(raw.deposit_amount),
            rent: raw.rent,
        }
    }

    /// Deposited and not yet settled
    pub fn is_active(&self) -> bool {
        self.deposited && !self.settled
    }

    /// Yield above principal, floored at zero
    pub fn accrued_yield(&self) -> U256 {
        self.current_value.saturating_sub(self.deposit_amount)
    }

    /// Human label: property name, or `Vault #id` when unnamed
    pub fn display_name(&self) -> String {
        if self.property_name.is_empty() {
            format!("Vault #{}", self.id)
        } else {
            self.property_name.clone()
        }
    }

    /// Violated on-chain invariants, if any
    pub fn invariant_violations(&self) -> Vec<&'static str> {
        let mut violations = Vec::new();
        if self.end_timestamp <= self.start_timestamp {
            violations.push("end_timestamp <= start_timestamp");
        }
        if self.settled && !self.deposited {
            violations.push("settled without deposit");
        }
        violations
    }
}
