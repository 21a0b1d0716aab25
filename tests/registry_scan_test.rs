//! Integration tests for scanning, caching and classifying the vault registry

use alloy_primitives::{Address, U256};
use escrow_client::format::format_usdc;
use escrow_client::test_utils::{raw_vault, MockChainClient};
use escrow_client::vault::{
    classify, relevant_vaults, sorted, PortfolioStats, Role, ScanError, ScanSettings, Stage, VaultCache,
    VaultScanner, DEFAULT_TTL,
};
use std::sync::Arc;
use std::time::Duration;

fn landlord() -> Address {
    Address::repeat_byte(0x11)
}

fn tenant() -> Address {
    Address::repeat_byte(0x22)
}

/// nextId = 4, slot 2 empty, vault 1 active with yield, vault 3 pending
fn seeded_registry() -> Arc<MockChainClient> {
    let mock = Arc::new(MockChainClient::new());

    let (_, vault1) = mock.add_vault(raw_vault(landlord(), tenant(), U256::from(1_000_000_000u64), true, false));
    mock.add_empty_slot();
    mock.add_vault(raw_vault(landlord(), tenant(), U256::from(750_000_000u64), false, false));
    mock.set_balance(mock.yield_token, vault1, U256::from(1_050_000_000u64));

    mock
}

fn cache_for(mock: &Arc<MockChainClient>) -> VaultCache {
    let scanner = VaultScanner::new(
        mock.clone(),
        mock.factory,
        Some(mock.yield_token),
        ScanSettings::default(),
    );
    VaultCache::new(Arc::new(scanner), DEFAULT_TTL)
}

#[tokio::test]
async fn test_end_to_end_scan_classify_sort() {
    let mock = seeded_registry();
    let cache = cache_for(&mock);

    let vaults = cache.fetch_all_vaults(false).await.unwrap();
    assert_eq!(vaults.len(), 2);

    let ordered = sorted(vaults.to_vec());
    assert_eq!(ordered[0].id, 1);
    assert_eq!(classify(&ordered[0]), Stage::Active);
    assert_eq!(ordered[0].accrued_yield(), U256::from(50_000_000u64));
    assert_eq!(format_usdc(ordered[0].accrued_yield()), "50.00");

    assert_eq!(ordered[1].id, 3);
    assert_eq!(classify(&ordered[1]), Stage::Pending);
}

#[tokio::test]
async fn test_role_views_and_stats() {
    let mock = seeded_registry();
    let cache = cache_for(&mock);
    let vaults = cache.fetch_all_vaults(false).await.unwrap();

    let as_landlord = relevant_vaults(&vaults, landlord());
    assert_eq!(as_landlord.len(), 2);
    assert!(as_landlord.iter().all(|v| v.role == Role::Landlord));

    assert!(relevant_vaults(&vaults, Address::repeat_byte(0x99)).is_empty());

    let stats = PortfolioStats::from_records(&vaults);
    assert_eq!(stats.active, 1);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.active_deposits, U256::from(1_000_000_000u64));
    assert_eq!(stats.active_yield, U256::from(50_000_000u64));
    assert_eq!(stats.average_yield_bps(), 500);
}

#[tokio::test]
async fn test_broken_vault_is_skipped_by_cached_scan() {
    let mock = seeded_registry();
    let vault3 = mock.vault_address_of(3).unwrap();
    mock.fail_vault_reads(vault3);
    let cache = cache_for(&mock);

    let vaults = cache.fetch_all_vaults(false).await.unwrap();
    let ids: Vec<u64> = vaults.iter().map(|v| v.id).collect();
    assert_eq!(ids, vec![1]);
}

#[tokio::test(start_paused = true)]
async fn test_cache_serves_fresh_list_until_ttl() {
    let mock = seeded_registry();
    let cache = cache_for(&mock);

    let first = cache.fetch_all_vaults(false).await.unwrap();

    // New vault on chain is not visible while the list is fresh
    mock.add_vault(raw_vault(landlord(), tenant(), U256::from(1u64), false, false));
    tokio::time::advance(Duration::from_secs(299)).await;
    let cached = cache.fetch_all_vaults(false).await.unwrap();
    assert!(Arc::ptr_eq(&first, &cached));

    tokio::time::advance(Duration::from_secs(2)).await;
    let refreshed = cache.fetch_all_vaults(false).await.unwrap();
    assert_eq!(refreshed.len(), 3);
}

#[tokio::test]
async fn test_registry_failure_aborts_refresh_and_keeps_snapshot() {
    let mock = seeded_registry();
    let cache = cache_for(&mock);

    let before = cache.fetch_all_vaults(false).await.unwrap();
    let fetched_at = cache.last_fetched_at();

    mock.fail_slot_reads(2);
    let err = cache.fetch_all_vaults(true).await.unwrap_err();
    assert!(matches!(err, ScanError::Registry { id: 2, .. }));

    assert!(Arc::ptr_eq(&before, &cache.snapshot()));
    assert_eq!(cache.last_fetched_at(), fetched_at);
    assert!(!cache.is_fetching());
}
