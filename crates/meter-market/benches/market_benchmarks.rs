//! Benchmarks for meter-market.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use meter_core::{Address, Amount, Asset, Wallet};
use meter_market::{
    compute_settlement, verify_proof_signature, ModelId, ModelPrice, PriceBounds, PricingBook,
    ProofClaim, ProofHash,
};

fn benchmark_effective_price(c: &mut Criterion) {
    let bounds = PriceBounds { min: 1, max: u128::MAX };
    let mut book = PricingBook::new(bounds, bounds);
    let host = Address::from_bytes([1u8; 32]);
    book.set_default_price(host, 1_000, 2_000).expect("defaults");
    for i in 0..100u32 {
        book.set_model_price(
            host,
            ModelId::from_name(&format!("model-{i}")),
            ModelPrice {
                native: Some(5_000),
                stable: None,
            },
        )
        .expect("model");
    }
    let model = ModelId::from_name("model-42");
    let stable = Asset::Token(Address::from_bytes([2u8; 32]));

    c.bench_function("effective_price_model_hit", |b| {
        b.iter(|| book.effective_price(black_box(&host), &Asset::Native, Some(&model)));
    });
    c.bench_function("effective_price_fallback", |b| {
        b.iter(|| book.effective_price(black_box(&host), &stable, Some(&model)));
    });
}

fn benchmark_settlement(c: &mut Criterion) {
    let deposit = Amount::from_whole(1);
    c.bench_function("compute_settlement", |b| {
        b.iter(|| {
            compute_settlement(
                black_box(1_000),
                black_box(500_000),
                deposit,
                1_000,
                1_000,
            )
        });
    });
}

fn benchmark_verify_proof(c: &mut Criterion) {
    let host = Wallet::generate();
    let hash = ProofHash::digest(b"benchmark work");
    let claim = ProofClaim::signed(&host, hash, 500, "cid");
    let address = host.address();

    c.bench_function("verify_proof_signature", |b| {
        b.iter(|| verify_proof_signature(&address, &hash, black_box(500), &claim.signature));
    });
}

criterion_group!(
    benches,
    benchmark_effective_price,
    benchmark_settlement,
    benchmark_verify_proof,
);
criterion_main!(benches);
