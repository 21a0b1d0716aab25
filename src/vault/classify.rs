//! Lifecycle stage, display order, role attribution and portfolio figures.
//!
//! Everything here is pure; no I/O.

use super::record::VaultRecord;
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Lifecycle stage of a vault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Waiting for the tenant's deposit
    Pending,
    /// Deposit supplied to the lending pool
    Active,
    /// Funds distributed
    Settled,
}

impl Stage {
    /// Display rank: Active, then Pending, then Settled
    pub fn rank(self) -> u8 {
        match self {
            Stage::Active => 0,
            Stage::Pending => 1,
            Stage::Settled => 2,
        }
    }
}

pub fn classify(record: &VaultRecord) -> Stage {
    if record.settled {
        Stage::Settled
    } else if record.deposited {
        Stage::Active
    } else {
        Stage::Pending
    }
}

/// Sort by `(stage rank, id)` ascending.
pub fn sort_vaults(records: &mut [VaultRecord]) {
    records.sort_by_key(|v| (classify(v).rank(), v.id));
}

pub fn sorted(mut records: Vec<VaultRecord>) -> Vec<VaultRecord> {
    sort_vaults(&mut records);
    records
}

/// Relationship of an account to a vault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Landlord,
    Tenant,
}

/// `None` when the vault is not relevant to `account`.
///
/// `Address` equality is byte equality, so checksum casing never matters.
pub fn role_for(record: &VaultRecord, account: Address) -> Option<Role> {
    if record.landlord == account {
        Some(Role::Landlord)
    } else if record.tenant == account {
        Some(Role::Tenant)
    } else {
        None
    }
}

/// A vault together with the viewer's role in it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleView {
    pub role: Role,
    pub stage: Stage,
    pub vault: VaultRecord,
}

/// Vaults `account` takes part in, in display order.
pub fn relevant_vaults(records: &[VaultRecord], account: Address) -> Vec<RoleView> {
    let mut views: Vec<RoleView> = records
        .iter()
        .filter_map(|v| {
            role_for(v, account).map(|role| RoleView {
                role,
                stage: classify(v),
                vault: v.clone(),
            })
        })
        .collect();
    views.sort_by_key(|view| (view.stage.rank(), view.vault.id));
    views
}

/// Like [`relevant_vaults`] but restricted to one role.
pub fn vaults_for_role(records: &[VaultRecord], account: Address, role: Role) -> Vec<VaultRecord> {
    relevant_vaults(records, account)
        .into_iter()
        .filter(|view| view.role == role)
        .map(|view| view.vault)
        .collect()
}

/// Dashboard tab filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StageFilter {
    #[default]
    All,
    Only(Stage),
}

impl StageFilter {
    pub fn matches(self, record: &VaultRecord) -> bool {
        match self {
            StageFilter::All => true,
            StageFilter::Only(stage) => classify(record) == stage,
        }
    }
}

pub fn filter_by_stage(records: &[VaultRecord], filter: StageFilter) -> Vec<VaultRecord> {
    records.iter().filter(|v| filter.matches(v)).cloned().collect()
}

/// Tenant may run the deposit flow
pub fn can_deposit(record: &VaultRecord, account: Address) -> bool {
    record.tenant == account && !record.deposited
}

/// Landlord may settle once the term has ended
pub fn can_settle(record: &VaultRecord, account: Address, now_secs: u64) -> bool {
    record.landlord == account && record.is_active() && now_secs >= record.end_timestamp
}

/// Aggregate figures over a set of vaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioStats {
    pub total: usize,
    pub active: usize,
    pub pending: usize,
    pub settled: usize,
    /// Principal held by active vaults
    pub active_deposits: U256,
    /// Yield accrued by active vaults
    pub active_yield: U256,
}

impl PortfolioStats {
    pub fn from_records(records: &[VaultRecord]) -> Self {
        let mut stats = Self {
            total: records.len(),
            ..Self::default()
        };

        for record in records {
            match classify(record) {
                Stage::Active => {
                    stats.active += 1;
                    stats.active_deposits = stats.active_deposits.saturating_add(record.deposit_amount);
                    stats.active_yield = stats.active_yield.saturating_add(record.accrued_yield());
                }
                Stage::Pending => stats.pending += 1,
                Stage::Settled => stats.settled += 1,
            }
        }

        stats
    }

    /// Active yield relative to active principal, in basis points
    pub fn average_yield_bps(&self) -> u64 {
        if self.active_deposits.is_zero() {
            return 0;
        }
        let bps = self.active_yield.saturating_mul(U256::from(10_000u64)) / self.active_deposits;
        if bps > U256::from(u64::MAX) {
            u64::MAX
        } else {
            bps.to::<u64>()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn vault(id: u64, deposited: bool, settled: bool) -> VaultRecord {
        VaultRecord {
            id,
            address: Address::with_last_byte(id as u8),
            landlord: Address::repeat_byte(0xaa),
            tenant: Address::repeat_byte(0xbb),
            deposit_amount: U256::from(1_000_000u64),
            start_timestamp: 100,
            end_timestamp: 200,
            property_name: String::new(),
            property_location: String::new(),
            deposited,
            settled,
            current_value: U256::from(1_000_000u64),
            rent: None,
        }
    }

    #[test]
    fn test_classify_valid_flag_pairs() {
        assert_eq!(classify(&vault(1, false, false)), Stage::Pending);
        assert_eq!(classify(&vault(1, true, false)), Stage::Active);
        assert_eq!(classify(&vault(1, true, true)), Stage::Settled);
    }

    #[test]
    fn test_sort_groups_by_stage_then_id() {
        let records = vec![
            vault(5, true, true),
            vault(4, false, false),
            vault(3, true, false),
            vault(2, false, false),
            vault(1, true, false),
        ];

        let ids: Vec<u64> = sorted(records).iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![1, 3, 2, 4, 5]);
    }

    #[test]
    fn test_role_attribution() {
        let v = vault(1, false, false);
        assert_eq!(role_for(&v, Address::repeat_byte(0xaa)), Some(Role::Landlord));
        assert_eq!(role_for(&v, Address::repeat_byte(0xbb)), Some(Role::Tenant));
        assert_eq!(role_for(&v, Address::repeat_byte(0xcc)), None);
    }

    #[test]
    fn test_checksum_casing_does_not_affect_role() {
        let v = vault(1, false, false);
        let lower: Address = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".parse().unwrap();
        let upper: Address = "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".parse().unwrap();
        assert_eq!(role_for(&v, lower), Some(Role::Landlord));
        assert_eq!(role_for(&v, upper), Some(Role::Landlord));
    }

    #[test]
    fn test_relevant_vaults_excludes_strangers_and_sorts() {
        let mut other = vault(2, true, false);
        other.landlord = Address::repeat_byte(0x01);
        other.tenant = Address::repeat_byte(0x02);
        let records = vec![vault(3, false, false), other, vault(1, true, false)];

        let views = relevant_vaults(&records, Address::repeat_byte(0xbb));
        let ids: Vec<u64> = views.iter().map(|v| v.vault.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(views.iter().all(|v| v.role == Role::Tenant));
        assert_eq!(views[0].stage, Stage::Active);

        let landlord_side = vaults_for_role(&records, Address::repeat_byte(0xbb), Role::Landlord);
        assert!(landlord_side.is_empty());
    }

    #[test]
    fn test_stage_filter() {
        let records = vec![vault(1, true, false), vault(2, false, false), vault(3, true, true)];
        assert_eq!(filter_by_stage(&records, StageFilter::All).len(), 3);
        let pending = filter_by_stage(&records, StageFilter::Only(Stage::Pending));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, 2);
    }

    #[test]
    fn test_eligibility() {
        let landlord = Address::repeat_byte(0xaa);
        let tenant = Address::repeat_byte(0xbb);

        assert!(can_deposit(&vault(1, false, false), tenant));
        assert!(!can_deposit(&vault(1, false, false), landlord));
        assert!(!can_deposit(&vault(1, true, false), tenant));

        let active = vault(1, true, false);
        assert!(!can_settle(&active, landlord, 199));
        assert!(can_settle(&active, landlord, 200));
        assert!(!can_settle(&active, tenant, 500));
        assert!(!can_settle(&vault(1, false, false), landlord, 500));
        assert!(!can_settle(&vault(1, true, true), landlord, 500));
    }

    #[test]
    fn test_portfolio_stats() {
        let mut a = vault(1, true, false);
        a.current_value = U256::from(1_100_000u64);
        let mut b = vault(2, true, false);
        b.current_value = U256::from(1_000_000u64);
        let records = vec![a, b, vault(3, false, false), vault(4, true, true)];

        let stats = PortfolioStats::from_records(&records);
        assert_eq!((stats.total, stats.active, stats.pending, stats.settled), (4, 2, 1, 1));
        assert_eq!(stats.active_deposits, U256::from(2_000_000u64));
        assert_eq!(stats.active_yield, U256::from(100_000u64));
        assert_eq!(stats.average_yield_bps(), 500);
        assert_eq!(PortfolioStats::default().average_yield_bps(), 0);
    }

    fn arb_vault() -> impl Strategy<Value = VaultRecord> {
        (1u64..500, any::<bool>(), any::<bool>()).prop_map(|(id, deposited, settled)| {
            // settled implies deposited on-chain
            vault(id, deposited || settled, settled)
        })
    }

    proptest! {
        #[test]
        fn prop_sort_groups_stages_and_orders_ids(records in proptest::collection::vec(arb_vault(), 0..40)) {
            let out = sorted(records.clone());
            prop_assert_eq!(out.len(), records.len());
            for pair in out.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                let key_a = (classify(a).rank(), a.id);
                let key_b = (classify(b).rank(), b.id);
                prop_assert!(key_a <= key_b);
            }
        }

        #[test]
        fn prop_classification_is_total(deposited in any::<bool>(), settled in any::<bool>()) {
            prop_assume!(!( !deposited && settled));
            let stage = classify(&vault(1, deposited, settled));
            let expected = match (deposited, settled) {
                (false, false) => Stage::Pending,
                (true, false) => Stage::Active,
                _ => Stage::Settled,
            };
            prop_assert_eq!(stage, expected);
        }
    }
}
