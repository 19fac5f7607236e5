//! Integration tests for the session lifecycle.
//!
//! Covers the full path from pricing through proof submission to settlement
//! and withdrawal:
//! 1. Settlement arithmetic on a one-unit native deposit
//! 2. Timeout versus cooperative completion
//! 3. Cross-session proof replay
//! 4. Host completion and the dispute window
//! 5. Pricing precedence, idempotence, rate limits and conservation

use chrono::{DateTime, Duration, TimeZone, Utc};
use meter_core::amount::BASE_PER_UNIT;
use meter_core::{Address, Amount, Asset, Wallet};
use meter_market::{
    sign_proof, AcceptedAssets, FundingSource, InMemoryHostRegistry, MarketConfig, MarketError,
    Marketplace, ModelId, ModelPrice, ProofClaim, ProofHash, RecordingSink, SessionId,
    SessionRequest, SessionStatus, SnapshotStore,
};
use proptest::prelude::*;

// ============================================================================
// Helper Functions
// ============================================================================

fn t0() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0)
        .single()
        .expect("valid timestamp")
}

fn at(secs: i64) -> DateTime<Utc> {
    t0() + Duration::seconds(secs)
}

fn treasury() -> Address {
    Address::from_bytes([0xee; 32])
}

fn depositor() -> Address {
    Address::from_bytes([0x01; 32])
}

struct Harness {
    market: Marketplace,
    registry: InMemoryHostRegistry,
}

fn harness(hosts: &[&Wallet]) -> Harness {
    let registry = InMemoryHostRegistry::new();
    for host in hosts {
        registry.register(host.address());
    }
    let config = MarketConfig::builder()
        .treasury(treasury())
        .native_min_deposit(Amount::from_base(1_000))
        .build()
        .expect("config");
    let market = Marketplace::with_config_assets(config, registry.clone()).expect("market");
    Harness { market, registry }
}

fn native_request(host: &Wallet, deposit: Amount, price: u128) -> SessionRequest {
    SessionRequest {
        host: host.address(),
        asset: Asset::Native,
        deposit,
        price_per_unit: price,
        max_duration_secs: 3_600,
        proof_interval_secs: 1,
        model: None,
    }
}

fn open(h: &mut Harness, request: SessionRequest) -> SessionId {
    h.market
        .create_session(depositor(), request, FundingSource::Direct, t0())
        .expect("create session")
}

fn claim(host: &Wallet, work: &str, units: u64) -> ProofClaim {
    ProofClaim::signed(host, ProofHash::digest(work.as_bytes()), units, format!("ipfs://{work}"))
}

// ============================================================================
// Scenario A: settlement arithmetic
// ============================================================================

#[test]
fn scenario_a_one_native_unit_settles_exactly() {
    let host = Wallet::generate();
    let mut h = harness(&[&host]);
    let id = open(&mut h, native_request(&host, Amount::from_whole(1), 500_000));

    h.market
        .submit_proof(host.address(), id, claim(&host, "batch-1", 1_000), at(1))
        .expect("proof");
    let settlement = h
        .market
        .complete_session(depositor(), id, Some("ipfs://final".into()), at(2))
        .expect("complete");

    assert_eq!(settlement.gross.as_base(), 500_000);
    assert_eq!(settlement.host_net.as_base(), 450_000);
    assert_eq!(settlement.treasury_fee.as_base(), 50_000);
    assert_eq!(settlement.refund.as_base(), BASE_PER_UNIT - 500_000);

    let ledger = h.market.ledger();
    assert_eq!(ledger.earnings(&host.address(), &Asset::Native).as_base(), 450_000);
    assert_eq!(ledger.treasury(&Asset::Native).as_base(), 50_000);
    assert_eq!(
        ledger.withdrawable(&depositor(), &Asset::Native).as_base(),
        BASE_PER_UNIT - 500_000
    );
    assert_eq!(ledger.locked(&depositor(), &Asset::Native), Amount::ZERO);
    assert!(ledger.is_conserved(&Asset::Native));

    let mut sink = RecordingSink::new();
    h.market
        .withdraw_earnings(host.address(), Asset::Native, &mut sink)
        .expect("host withdraws");
    h.market
        .withdraw_treasury(treasury(), Asset::Native, &mut sink)
        .expect("treasury withdraws");
    h.market
        .withdraw_deposit(
            depositor(),
            Asset::Native,
            Amount::from_base(BASE_PER_UNIT - 500_000),
            &mut sink,
        )
        .expect("refund withdrawn");

    let ledger = h.market.ledger();
    assert_eq!(ledger.total_out(&Asset::Native), Amount::from_whole(1));
    assert_eq!(ledger.held(&Asset::Native), 0);
    assert!(ledger.is_conserved(&Asset::Native));
}

// ============================================================================
// Scenario B: timeout settles like completion
// ============================================================================

#[test]
fn scenario_b_timeout_matches_completion() {
    let host = Wallet::generate();
    let mut h = harness(&[&host]);
    let deposit = Amount::from_base(10_000_000);
    let completed = open(&mut h, native_request(&host, deposit, 1_234));
    let timed_out = open(&mut h, native_request(&host, deposit, 1_234));

    h.market
        .submit_proof(host.address(), completed, claim(&host, "c-1", 1_500), at(1))
        .expect("proof");
    h.market
        .submit_proof(host.address(), timed_out, claim(&host, "t-1", 1_500), at(1))
        .expect("proof");

    let by_completion = h
        .market
        .complete_session(depositor(), completed, None, at(10))
        .expect("complete");

    let anyone = Address::from_bytes([0x77; 32]);
    assert!(matches!(
        h.market.trigger_timeout(anyone, timed_out, at(3_600)),
        Err(MarketError::SessionNotExpired { .. })
    ));
    let by_timeout = h
        .market
        .trigger_timeout(anyone, timed_out, at(3_601))
        .expect("timeout");

    assert_eq!(by_timeout, by_completion);
    assert_eq!(
        h.market.session(timed_out).expect("session").status,
        SessionStatus::TimedOut
    );
    assert!(h.market.ledger().is_conserved(&Asset::Native));
}

// ============================================================================
// Scenario C: cross-session replay
// ============================================================================

#[test]
fn scenario_c_proof_hash_cannot_be_credited_twice() {
    let host_a = Wallet::generate();
    let host_b = Wallet::generate();
    let mut h = harness(&[&host_a, &host_b]);
    let deposit = Amount::from_base(10_000_000);
    let session_a = open(&mut h, native_request(&host_a, deposit, 1_000));
    let session_b = open(&mut h, native_request(&host_b, deposit, 1_000));

    let original = claim(&host_a, "shared-work", 100);
    h.market
        .submit_proof(host_a.address(), session_a, original.clone(), at(1))
        .expect("first use");

    // Host A's signature does not verify for host B.
    let err = h
        .market
        .submit_proof(host_b.address(), session_b, original.clone(), at(1))
        .expect_err("foreign signature");
    assert!(matches!(err, MarketError::SignerMismatch(_)));

    // Re-signed by host B, the hash is still spent.
    let resigned = ProofClaim {
        signature: sign_proof(&host_b, &original.proof_hash, 100)
            .to_bytes()
            .to_vec(),
        ..original
    };
    let err = h
        .market
        .submit_proof(host_b.address(), session_b, resigned, at(1))
        .expect_err("replay");
    assert!(matches!(err, MarketError::ProofReplay(_)));

    assert_eq!(h.market.session(session_b).expect("session").units_claimed, 0);
    assert!(h.market.proofs(session_b).is_empty());
}

// ============================================================================
// Scenario D: dispute window
// ============================================================================

#[test]
fn scenario_d_host_completion_respects_dispute_window() {
    let host = Wallet::generate();
    let mut h = harness(&[&host]);
    let id = open(&mut h, native_request(&host, Amount::from_base(10_000_000), 1_000));
    h.market
        .submit_proof(host.address(), id, claim(&host, "w", 500), at(60))
        .expect("proof");

    let err = h
        .market
        .complete_session(host.address(), id, None, at(70))
        .expect_err("inside window");
    assert!(matches!(err, MarketError::DisputeWindowActive { remaining_secs: 20 }));
    assert!(h.market.session(id).expect("session").is_active());

    let settlement = h
        .market
        .complete_session(host.address(), id, Some("ipfs://result".into()), at(90))
        .expect("after window");
    assert_eq!(settlement.units, 500);
}

// ============================================================================
// Pricing, idempotence, host lifecycle
// ============================================================================

#[test]
fn model_override_takes_precedence_over_default() {
    let host = Wallet::generate();
    let mut h = harness(&[&host]);
    let model = ModelId::from_name("llama-3-70b");
    let other = ModelId::from_name("mistral-7b");

    h.market
        .set_default_price(host.address(), 1_000, 2_000)
        .expect("defaults");
    h.market
        .set_model_price(
            host.address(),
            model,
            ModelPrice {
                native: Some(5_000),
                stable: None,
            },
        )
        .expect("model");

    let addr = host.address();
    assert_eq!(h.market.effective_price(&addr, &Asset::Native, Some(&model)), 5_000);
    assert_eq!(h.market.effective_price(&addr, &Asset::Native, Some(&other)), 1_000);
    assert_eq!(h.market.effective_price(&addr, &Asset::Native, None), 1_000);

    let mut cheap = native_request(&host, Amount::from_base(10_000_000), 4_999);
    cheap.model = Some(model);
    let err = h
        .market
        .create_session(depositor(), cheap.clone(), FundingSource::Direct, t0())
        .expect_err("below model price");
    assert!(matches!(
        err,
        MarketError::PriceBelowMinimum {
            offered: 4_999,
            minimum: 5_000
        }
    ));

    cheap.price_per_unit = 5_000;
    h.market
        .create_session(depositor(), cheap, FundingSource::Direct, t0())
        .expect("at model price");
}

#[test]
fn settled_session_rejects_every_further_transition() {
    let host = Wallet::generate();
    let mut h = harness(&[&host]);
    let id = open(&mut h, native_request(&host, Amount::from_base(10_000_000), 1_000));
    h.market
        .submit_proof(host.address(), id, claim(&host, "w", 10), at(1))
        .expect("proof");
    h.market
        .complete_session(depositor(), id, None, at(2))
        .expect("complete");
    let before = h.market.snapshot();

    assert!(h.market.complete_session(depositor(), id, None, at(3)).is_err());
    assert!(h.market.trigger_timeout(depositor(), id, at(10_000)).is_err());
    assert!(
        h.market
            .submit_proof(host.address(), id, claim(&host, "w2", 10), at(5))
            .is_err()
    );
    assert_eq!(h.market.snapshot(), before);
}

#[test]
fn deactivated_host_keeps_existing_sessions() {
    let host = Wallet::generate();
    let mut h = harness(&[&host]);
    let id = open(&mut h, native_request(&host, Amount::from_base(10_000_000), 1_000));
    h.registry.deactivate(&host.address());

    assert!(matches!(
        h.market.create_session(
            depositor(),
            native_request(&host, Amount::from_base(10_000_000), 1_000),
            FundingSource::Direct,
            t0()
        ),
        Err(MarketError::HostNotActive(_))
    ));
    h.market
        .submit_proof(host.address(), id, claim(&host, "w", 10), at(1))
        .expect("existing session continues");
}

#[test]
fn prefunded_balance_covers_several_sessions() {
    let host = Wallet::generate();
    let mut h = harness(&[&host]);
    let deposit = Amount::from_base(1_000_000_000_000_000);
    h.market
        .deposit(depositor(), Asset::Native, Amount::from_whole(1))
        .expect("prefund");

    for _ in 0..3 {
        h.market
            .create_session(
                depositor(),
                native_request(&host, deposit, 1_000),
                FundingSource::Prefunded,
                t0(),
            )
            .expect("prefunded session");
    }

    let ledger = h.market.ledger();
    assert_eq!(
        ledger.locked(&depositor(), &Asset::Native),
        Amount::from_base(3_000_000_000_000_000)
    );
    assert_eq!(
        ledger.withdrawable(&depositor(), &Asset::Native),
        Amount::from_base(BASE_PER_UNIT - 3_000_000_000_000_000)
    );
    assert_eq!(h.market.sessions_by_depositor(&depositor()).len(), 3);
    assert!(ledger.is_conserved(&Asset::Native));
}

#[test]
fn failed_payout_keeps_earnings() {
    let host = Wallet::generate();
    let mut h = harness(&[&host]);
    let id = open(&mut h, native_request(&host, Amount::from_base(10_000_000), 1_000));
    h.market
        .submit_proof(host.address(), id, claim(&host, "w", 1_000), at(1))
        .expect("proof");
    h.market
        .complete_session(depositor(), id, None, at(2))
        .expect("complete");

    let mut failing = RecordingSink::failing("receiver reverted");
    let err = h
        .market
        .withdraw_earnings(host.address(), Asset::Native, &mut failing)
        .expect_err("payout fails");
    assert!(matches!(err, MarketError::PayoutFailed(_)));
    assert_eq!(
        h.market.ledger().earnings(&host.address(), &Asset::Native),
        Amount::from_base(900)
    );
    assert!(h.market.ledger().is_conserved(&Asset::Native));
}

#[test]
fn snapshot_survives_restart() {
    let host = Wallet::generate();
    let mut h = harness(&[&host]);
    let id = open(&mut h, native_request(&host, Amount::from_base(10_000_000), 1_000));
    h.market
        .submit_proof(host.address(), id, claim(&host, "w", 10), at(1))
        .expect("proof");

    let dir = tempfile::tempdir().expect("tempdir");
    let store = SnapshotStore::new(dir.path());
    store.save(&h.market.snapshot()).expect("save");

    let state = store.load().expect("load").expect("snapshot present");
    let config = h.market.config().clone();
    let assets = AcceptedAssets::from_config(&config);
    let mut restored =
        Marketplace::restore(config, h.registry.clone(), assets, state).expect("restore");

    assert_eq!(restored.session(id).expect("session").units_claimed, 10);
    assert!(matches!(
        restored.submit_proof(host.address(), id, claim(&host, "w", 10), at(5)),
        Err(MarketError::ProofReplay(_))
    ));
    restored
        .complete_session(depositor(), id, None, at(6))
        .expect("complete after restart");
    assert!(restored.ledger().is_conserved(&Asset::Native));
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_accepted_units_never_exceed_rate_ceiling(
        elapsed in 1i64..120,
        units in 1u64..400_000,
    ) {
        let host = Wallet::generate();
        let mut h = harness(&[&host]);
        let id = open(&mut h, native_request(&host, Amount::from_whole(1), 1_000));

        let ceiling = u64::try_from(elapsed).expect("positive") * 1_000 * 2;
        let result = h.market.submit_proof(host.address(), id, claim(&host, "w", units), at(elapsed));
        if units <= ceiling {
            prop_assert!(result.is_ok());
        } else {
            let is_rate_limited = matches!(result, Err(MarketError::RateLimitExceeded { .. }));
            prop_assert!(is_rate_limited);
        }
    }

    #[test]
    fn prop_ledger_conserves_across_sessions(
        sessions in proptest::collection::vec((1u64..2_000, 1u128..5_000, any::<bool>()), 1..6),
    ) {
        let host = Wallet::generate();
        let mut h = harness(&[&host]);
        let deposit = Amount::from_base(10_000_000);

        for (i, (units, price, timeout)) in sessions.into_iter().enumerate() {
            let id = open(&mut h, native_request(&host, deposit, price));
            h.market
                .submit_proof(host.address(), id, claim(&host, &format!("w-{i}"), units), at(1))
                .expect("proof within ceiling and capacity");

            let settlement = if timeout {
                h.market.trigger_timeout(depositor(), id, at(3_601)).expect("timeout")
            } else {
                h.market.complete_session(depositor(), id, None, at(2)).expect("complete")
            };
            prop_assert_eq!(settlement.total(), deposit);
            prop_assert!(h.market.ledger().is_conserved(&Asset::Native));
        }

        let mut sink = RecordingSink::new();
        h.market.withdraw_earnings(host.address(), Asset::Native, &mut sink).expect("withdraw");
        h.market.withdraw_treasury(treasury(), Asset::Native, &mut sink).expect("treasury");
        prop_assert!(h.market.ledger().is_conserved(&Asset::Native));
        prop_assert_eq!(h.market.active_session_count(), 0);
    }
}
