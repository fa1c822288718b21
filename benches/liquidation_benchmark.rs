//! Benchmarks for the pure, allocation-heavy math on the scoring hot path:
//! UniswapV3 path codec and the repay/seize sizing used by every candidate
//! that clears the gate cascade.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ethers::types::Address;
use liquidation_agent::scorer::plan_builder::{repay_amount, seize_amount};
use liquidation_agent::utils::{decode_v3_path, encode_v3_path};

fn bench_v3_path_roundtrip(c: &mut Criterion) {
    let tokens = vec![
        Address::repeat_byte(0x11),
        Address::repeat_byte(0x22),
        Address::repeat_byte(0x33),
    ];
    let fees = vec![500u32, 3000u32];

    c.bench_function("encode_v3_path/3-hop", |b| {
        b.iter(|| encode_v3_path(black_box(&tokens), black_box(&fees)))
    });

    let encoded = encode_v3_path(&tokens, &fees);
    c.bench_function("decode_v3_path/3-hop", |b| {
        b.iter(|| decode_v3_path(black_box(&encoded)))
    });
}

fn bench_plan_sizing(c: &mut Criterion) {
    use ethers::types::U256;

    c.bench_function("repay_amount", |b| {
        b.iter(|| repay_amount(black_box(U256::from(10_000_000_000u64)), black_box(5000)))
    });

    c.bench_function("seize_amount", |b| {
        b.iter(|| {
            seize_amount(
                black_box(U256::from(5_000_000_000u64)),
                black_box(6),
                black_box(18),
                black_box(1.0),
                black_box(2000.0),
                black_box(500),
            )
        })
    });
}

criterion_group!(benches, bench_v3_path_roundtrip, bench_plan_sizing);
criterion_main!(benches);
