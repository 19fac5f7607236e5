//! # meter-market
//!
//! Metered, escrow-backed session marketplace.
//!
//! A depositor escrows funds against a session with a host. The host claims
//! units of work with signed proofs, rate-limited by elapsed time and capped
//! by the deposit. When the session ends, cooperatively or by timeout, the
//! deposit is split between host earnings, a treasury fee and a refund.
//!
//! This crate provides:
//!
//! - [`PricingBook`] — Three-tier host price resolution
//! - Proof verification and replay protection ([`proof`])
//! - [`Session`] lifecycle and the [`Marketplace`] engine
//! - [`Ledger`] — Balances with exact fund conservation
//! - [`SharedMarketplace`] — Thread-safe handle that rejects reentrant calls
//! - [`SnapshotStore`] — JSON persistence of the whole state

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod marketplace;
pub mod pricing;
pub mod proof;
pub mod registry;
pub mod session;
pub mod settlement;
pub mod shared;
pub mod store;

pub use config::{ConfigError, MarketConfig, MarketConfigBuilder, PriceBounds};
pub use error::{ErrorCategory, MarketError};
pub use events::{MarketEvent, PricingChange};
pub use ledger::Ledger;
pub use marketplace::Marketplace;
pub use pricing::{ModelId, ModelPrice, PriceTier, PricingBook, PricingRecord};
pub use proof::{
    proof_message, sign_proof, verify_proof_signature, ProofClaim, ProofHash, ProofSubmission,
    UsedProofSet,
};
pub use registry::{
    AcceptedAssets, AssetPolicy, HostRegistry, InMemoryHostRegistry, PayoutSink, RecordingSink,
};
pub use session::{FundingSource, Session, SessionId, SessionRequest, SessionStatus};
pub use settlement::{compute_settlement, Settlement};
pub use shared::SharedMarketplace;
pub use store::{MarketState, SnapshotStore, StoreError};
