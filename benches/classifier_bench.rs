//! Benchmark for vault classification, ordering and portfolio figures

use alloy_primitives::{Address, U256};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use escrow_client::vault::{relevant_vaults, sorted, PortfolioStats, VaultRecord};

fn registry(size: u64) -> Vec<VaultRecord> {
    (1..=size)
        .rev()
        .map(|id| {
            let deposited = id % 3 != 0;
            VaultRecord {
                id,
                address: Address::left_padding_from(&id.to_be_bytes()),
                landlord: Address::repeat_byte((id % 7) as u8),
                tenant: Address::repeat_byte(0xbb),
                deposit_amount: U256::from(1_000_000_000u64),
                start_timestamp: 1_700_000_000,
                end_timestamp: 1_730_000_000,
                property_name: format!("Unit {id}"),
                property_location: String::new(),
                deposited,
                settled: deposited && id % 5 == 0,
                current_value: U256::from(1_000_000_000u64 + id * 1_000),
                rent: None,
            }
        })
        .collect()
}

fn bench_sort(c: &mut Criterion) {
    let records = registry(1_000);

    c.bench_function("sort_1000_vaults", |b| {
        b.iter(|| black_box(sorted(black_box(records.clone()))));
    });
}

fn bench_relevant_vaults(c: &mut Criterion) {
    let records = registry(1_000);
    let account = Address::repeat_byte(0x03);

    c.bench_function("relevant_vaults_1000", |b| {
        b.iter(|| black_box(relevant_vaults(black_box(&records), account)));
    });
}

fn bench_portfolio_stats(c: &mut Criterion) {
    let records = registry(1_000);

    c.bench_function("portfolio_stats_1000", |b| {
        b.iter(|| black_box(PortfolioStats::from_records(black_box(&records))));
    });
}

criterion_group!(benches, bench_sort, bench_relevant_vaults, bench_portfolio_stats);
criterion_main!(benches);
