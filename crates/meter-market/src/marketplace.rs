//! The marketplace engine.
//!
//! [`Marketplace`] owns every session, the pricing book, the ledger and the
//! used-proof set. Each operation validates its whole input before its first
//! mutation, so a rejected call leaves the engine exactly as it was.
//!
//! Time is always passed in by the caller; the engine never reads a clock.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use meter_core::{Address, Amount, Asset};
use tracing::{debug, info, warn};

use crate::config::MarketConfig;
use crate::error::MarketError;
use crate::events::{MarketEvent, PricingChange};
use crate::ledger::Ledger;
use crate::pricing::{ModelId, ModelPrice, PricingBook, PricingRecord};
use crate::proof::{verify_proof_signature, ProofClaim, ProofHash, ProofSubmission, UsedProofSet};
use crate::registry::{AcceptedAssets, AssetPolicy, HostRegistry, PayoutSink};
use crate::session::{FundingSource, Session, SessionId, SessionRequest, SessionStatus};
use crate::settlement::{compute_settlement, gross_value, Settlement};
use crate::store::MarketState;

/// Metered session escrow and settlement engine.
pub struct Marketplace {
    config: MarketConfig,
    hosts: Box<dyn HostRegistry>,
    assets: Box<dyn AssetPolicy>,
    pricing: PricingBook,
    ledger: Ledger,
    used_proofs: UsedProofSet,
    sessions: BTreeMap<SessionId, Session>,
    proofs: BTreeMap<SessionId, Vec<ProofSubmission>>,
    next_id: SessionId,
    events: Vec<MarketEvent>,
}

impl fmt::Debug for Marketplace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Marketplace")
            .field("config", &self.config)
            .field("sessions", &self.sessions.len())
            .field("next_id", &self.next_id)
            .field("used_proofs", &self.used_proofs.len())
            .finish_non_exhaustive()
    }
}

impl Marketplace {
    /// Creates an empty marketplace.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::Config` if the config is invalid.
    pub fn new(
        config: MarketConfig,
        hosts: impl HostRegistry + 'static,
        assets: impl AssetPolicy + 'static,
    ) -> Result<Self, MarketError> {
        config.validate()?;
        let pricing = PricingBook::new(config.native_price_bounds, config.stable_price_bounds);
        Ok(Self {
            config,
            hosts: Box::new(hosts),
            assets: Box::new(assets),
            pricing,
            ledger: Ledger::new(),
            used_proofs: UsedProofSet::new(),
            sessions: BTreeMap::new(),
            proofs: BTreeMap::new(),
            next_id: 1,
            events: Vec::new(),
        })
    }

    /// Creates an empty marketplace whose accepted assets come from the config.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::Config` if the config is invalid.
    pub fn with_config_assets(
        config: MarketConfig,
        hosts: impl HostRegistry + 'static,
    ) -> Result<Self, MarketError> {
        let assets = AcceptedAssets::from_config(&config);
        Self::new(config, hosts, assets)
    }

    /// Rebuilds a marketplace from a snapshot.
    ///
    /// Price bounds are taken from `config`, not from the snapshot.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::Config` for an invalid config and
    /// `MarketError::InvalidParameter` for an inconsistent snapshot.
    pub fn restore(
        config: MarketConfig,
        hosts: impl HostRegistry + 'static,
        assets: impl AssetPolicy + 'static,
        state: MarketState,
    ) -> Result<Self, MarketError> {
        let mut market = Self::new(config, hosts, assets)?;

        if let Some((&last, _)) = state.sessions.last_key_value() {
            if state.next_id <= last {
                return Err(MarketError::InvalidParameter(format!(
                    "snapshot next id {} does not follow session {last}",
                    state.next_id
                )));
            }
        }
        if state.next_id == 0 {
            return Err(MarketError::InvalidParameter("snapshot next id is zero".into()));
        }
        if let Some(asset) = state
            .ledger
            .assets()
            .into_iter()
            .find(|asset| !state.ledger.is_conserved(asset))
        {
            return Err(MarketError::InvalidParameter(format!(
                "snapshot ledger does not conserve {asset}"
            )));
        }
        if !state
            .ledger
            .escrow_matches(state.sessions.values().filter(|s| s.is_active()))
        {
            return Err(MarketError::InvalidParameter(
                "snapshot escrow does not match active session deposits".into(),
            ));
        }

        let mut pricing = state.pricing;
        pricing.set_bounds(
            market.config.native_price_bounds,
            market.config.stable_price_bounds,
        );

        market.pricing = pricing;
        market.ledger = state.ledger;
        market.used_proofs = state.used_proofs;
        market.sessions = state.sessions;
        market.proofs = state.proofs;
        market.next_id = state.next_id;
        info!(
            sessions = market.sessions.len(),
            next_id = market.next_id,
            "restored marketplace from snapshot"
        );
        Ok(market)
    }

    /// Captures the persistent state.
    #[must_use]
    pub fn snapshot(&self) -> MarketState {
        MarketState {
            sessions: self.sessions.clone(),
            proofs: self.proofs.clone(),
            next_id: self.next_id,
            pricing: self.pricing.clone(),
            ledger: self.ledger.clone(),
            used_proofs: self.used_proofs.clone(),
        }
    }

    /// Returns the active configuration.
    #[must_use]
    pub const fn config(&self) -> &MarketConfig {
        &self.config
    }

    /// Returns the balance ledger.
    #[must_use]
    pub const fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    // ---- sessions ----

    /// Opens a session and escrows its deposit.
    ///
    /// # Errors
    ///
    /// Returns `HostNotActive`, `AssetNotAccepted`, `InvalidParameter`,
    /// `PriceBelowMinimum`, `DepositBelowMinimum` or `InsufficientFunds`.
    pub fn create_session(
        &mut self,
        depositor: Address,
        request: SessionRequest,
        funding: FundingSource,
        now: DateTime<Utc>,
    ) -> Result<SessionId, MarketError> {
        if !self.hosts.is_active_host(&request.host) {
            return Err(MarketError::HostNotActive(request.host.to_string()));
        }
        let minimum_deposit = self
            .assets
            .minimum_deposit(&request.asset)
            .ok_or(MarketError::AssetNotAccepted(request.asset))?;

        if request.max_duration_secs == 0
            || request.max_duration_secs > self.config.max_session_duration_secs
        {
            return Err(MarketError::InvalidParameter(format!(
                "max duration {}s outside 1..={}s",
                request.max_duration_secs, self.config.max_session_duration_secs
            )));
        }
        if request.proof_interval_secs == 0 {
            return Err(MarketError::InvalidParameter(
                "proof interval must be at least one second".into(),
            ));
        }
        if request.price_per_unit == 0 {
            return Err(MarketError::InvalidParameter("price per unit must be positive".into()));
        }

        let minimum =
            self.pricing
                .effective_price(&request.host, &request.asset, request.model.as_ref());
        if request.price_per_unit < minimum {
            return Err(MarketError::PriceBelowMinimum {
                offered: request.price_per_unit,
                minimum,
            });
        }
        if request.deposit < minimum_deposit {
            return Err(MarketError::DepositBelowMinimum {
                asset: request.asset,
                deposit: request.deposit,
                minimum: minimum_deposit,
            });
        }

        let id = self.next_id;
        let next_id = id
            .checked_add(1)
            .ok_or_else(|| MarketError::InvalidParameter("session ids exhausted".into()))?;

        match funding {
            FundingSource::Direct => {
                self.ledger
                    .lock_direct(depositor, request.asset, request.deposit)?;
            }
            FundingSource::Prefunded => {
                self.ledger
                    .lock_prefunded(depositor, request.asset, request.deposit)?;
            }
        }

        let session = Session::new(id, depositor, request, self.config.dispute_window_secs, now);
        info!(
            session_id = id,
            depositor = %depositor,
            host = %session.host,
            asset = %session.asset,
            deposit = %session.deposit,
            price_per_unit = session.price_per_unit,
            funding = ?funding,
            "session created"
        );
        self.events.push(MarketEvent::SessionCreated {
            session_id: id,
            depositor,
            host: session.host,
            asset: session.asset,
            deposit: session.deposit,
            price_per_unit: session.price_per_unit,
            at: now,
        });
        self.sessions.insert(id, session);
        self.proofs.insert(id, Vec::new());
        self.next_id = next_id;
        Ok(id)
    }

    /// Credits a signed claim of additional units to a session.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound`, `SessionNotActive`, `NotSessionHost`,
    /// `InvalidParameter`, `ProofTooEarly`, `RateLimitExceeded`,
    /// `ExceedsDepositCapacity`, `MalformedSignature`, `SignerMismatch` or
    /// `ProofReplay`.
    pub fn submit_proof(
        &mut self,
        caller: Address,
        session_id: SessionId,
        claim: ProofClaim,
        now: DateTime<Utc>,
    ) -> Result<(), MarketError> {
        let session = self.session_ref(session_id)?;
        session.ensure_active()?;
        if caller != session.host {
            return Err(MarketError::NotSessionHost {
                session_id,
                caller: caller.to_string(),
            });
        }
        if claim.units == 0 {
            return Err(MarketError::InvalidParameter("proof must claim at least one unit".into()));
        }

        let wait = session.proof_wait_secs(now);
        if wait > 0 {
            return Err(MarketError::ProofTooEarly { remaining_secs: wait });
        }

        let ceiling = session.rate_limit_ceiling(
            now,
            self.config.base_rate_per_second,
            self.config.safety_multiplier,
        );
        if u128::from(claim.units) > ceiling {
            return Err(MarketError::RateLimitExceeded {
                claimed: claim.units,
                ceiling,
            });
        }

        let total_units = session
            .units_claimed
            .checked_add(claim.units)
            .ok_or_else(|| MarketError::InvalidParameter("claimed units overflow".into()))?;
        let claimed_value =
            gross_value(total_units, session.price_per_unit, self.config.price_precision)?;
        if claimed_value > session.deposit.as_base() {
            return Err(MarketError::ExceedsDepositCapacity {
                claimed_value,
                deposit: session.deposit,
            });
        }

        let signature =
            verify_proof_signature(&session.host, &claim.proof_hash, claim.units, &claim.signature)
                .inspect_err(|e| {
                    warn!(session_id, host = %caller, error = %e, "proof signature rejected");
                })?;
        self.used_proofs
            .check_unused(&claim.proof_hash)
            .inspect_err(|_| {
                warn!(session_id, proof_hash = %claim.proof_hash, "proof replay rejected");
            })?;

        let session = self.session_mut(session_id)?;
        session.units_claimed = total_units;
        session.last_proof_at = now;

        self.used_proofs.mark_used(claim.proof_hash);
        self.proofs.entry(session_id).or_default().push(ProofSubmission {
            proof_hash: claim.proof_hash,
            units: claim.units,
            signature,
            content_locator: claim.content_locator,
            verified: true,
            submitted_at: now,
        });
        debug!(
            session_id,
            proof_hash = %claim.proof_hash,
            units = claim.units,
            total_units,
            "proof accepted"
        );
        self.events.push(MarketEvent::ProofAccepted {
            session_id,
            proof_hash: claim.proof_hash,
            units: claim.units,
            total_units,
            at: now,
        });
        Ok(())
    }

    /// Settles a session on behalf of its depositor or, once the dispute
    /// window has passed, its host.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound`, `SessionNotActive`, `DisputeWindowActive`
    /// or `Unauthorized`.
    pub fn complete_session(
        &mut self,
        caller: Address,
        session_id: SessionId,
        content_locator: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Settlement, MarketError> {
        let session = self.session_ref(session_id)?;
        session.ensure_active()?;

        if caller != session.depositor {
            if caller != session.host {
                return Err(MarketError::Unauthorized(format!(
                    "{caller} is neither depositor nor host of session {session_id}"
                )));
            }
            let remaining_secs = session.dispute_window_remaining(now);
            if remaining_secs > 0 {
                return Err(MarketError::DisputeWindowActive { remaining_secs });
            }
        }

        let settlement = self.settle(session_id, SessionStatus::Completed, content_locator, now)?;
        info!(
            session_id,
            completed_by = %caller,
            units = settlement.units,
            host_net = %settlement.host_net,
            treasury_fee = %settlement.treasury_fee,
            refund = %settlement.refund,
            "session completed"
        );
        self.events.push(MarketEvent::SessionCompleted {
            session_id,
            completed_by: caller,
            settlement,
            at: now,
        });
        Ok(settlement)
    }

    /// Settles a session whose maximum duration has elapsed. Anyone may call.
    ///
    /// # Errors
    ///
    /// Returns `SessionNotFound`, `SessionNotActive` or `SessionNotExpired`.
    pub fn trigger_timeout(
        &mut self,
        caller: Address,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Settlement, MarketError> {
        let session = self.session_ref(session_id)?;
        session.ensure_active()?;
        if !session.is_expired(now) {
            return Err(MarketError::SessionNotExpired {
                remaining_secs: session.expiry_remaining(now),
            });
        }

        let settlement = self.settle(session_id, SessionStatus::TimedOut, None, now)?;
        info!(
            session_id,
            triggered_by = %caller,
            units = settlement.units,
            refund = %settlement.refund,
            "session timed out"
        );
        self.events.push(MarketEvent::SessionTimedOut {
            session_id,
            triggered_by: caller,
            settlement,
            at: now,
        });
        Ok(settlement)
    }

    fn settle(
        &mut self,
        session_id: SessionId,
        target: SessionStatus,
        content_locator: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Settlement, MarketError> {
        let session = self
            .sessions
            .get(&session_id)
            .ok_or(MarketError::SessionNotFound(session_id))?;
        session.check_transition(target)?;
        let settlement = compute_settlement(
            session.units_claimed,
            session.price_per_unit,
            session.deposit,
            self.config.price_precision,
            self.config.fee_basis_points,
        )?;
        self.ledger.settle(session, &settlement)?;

        self.session_mut(session_id)?
            .finish(target, settlement, content_locator, now)?;
        Ok(settlement)
    }

    // ---- balances ----

    /// Credits pre-funded value to a depositor's withdrawable balance.
    ///
    /// # Errors
    ///
    /// Returns `AssetNotAccepted` or `InvalidParameter` for a zero amount.
    pub fn deposit(&mut self, account: Address, asset: Asset, amount: Amount) -> Result<(), MarketError> {
        if !self.assets.is_accepted(&asset) {
            return Err(MarketError::AssetNotAccepted(asset));
        }
        if amount.is_zero() {
            return Err(MarketError::InvalidParameter("deposit must be positive".into()));
        }
        self.ledger.deposit(account, asset, amount)?;
        info!(account = %account, asset = %asset, amount = %amount, "deposit received");
        self.events.push(MarketEvent::DepositReceived {
            account,
            asset,
            amount,
        });
        Ok(())
    }

    /// Pays out part of a depositor's withdrawable balance.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for a zero amount, `InsufficientFunds` or
    /// `PayoutFailed`.
    pub fn withdraw_deposit(
        &mut self,
        account: Address,
        asset: Asset,
        amount: Amount,
        sink: &mut dyn PayoutSink,
    ) -> Result<Amount, MarketError> {
        if amount.is_zero() {
            return Err(MarketError::InvalidParameter("withdrawal must be positive".into()));
        }
        let paid = self.ledger.withdraw_deposit(account, asset, amount, sink)?;
        info!(account = %account, asset = %asset, amount = %paid, "deposit withdrawn");
        self.events.push(MarketEvent::DepositWithdrawn {
            account,
            asset,
            amount: paid,
        });
        Ok(paid)
    }

    /// Pays a host its entire earnings balance. Zero is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `PayoutFailed` if the sink rejects the transfer.
    pub fn withdraw_earnings(
        &mut self,
        host: Address,
        asset: Asset,
        sink: &mut dyn PayoutSink,
    ) -> Result<Amount, MarketError> {
        let paid = self.ledger.withdraw_earnings(host, asset, sink)?;
        if !paid.is_zero() {
            info!(host = %host, asset = %asset, amount = %paid, "earnings withdrawn");
            self.events.push(MarketEvent::EarningsWithdrawn {
                host,
                asset,
                amount: paid,
            });
        }
        Ok(paid)
    }

    /// Pays the configured treasury its entire fee balance. Zero is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `Unauthorized` unless `caller` is the treasury and
    /// `PayoutFailed` if the sink rejects the transfer.
    pub fn withdraw_treasury(
        &mut self,
        caller: Address,
        asset: Asset,
        sink: &mut dyn PayoutSink,
    ) -> Result<Amount, MarketError> {
        if caller != self.config.treasury {
            return Err(MarketError::Unauthorized(format!(
                "{caller} is not the treasury"
            )));
        }
        let paid = self.ledger.withdraw_treasury(caller, asset, sink)?;
        if !paid.is_zero() {
            info!(treasury = %caller, asset = %asset, amount = %paid, "treasury withdrawn");
            self.events.push(MarketEvent::TreasuryWithdrawn {
                treasury: caller,
                asset,
                amount: paid,
            });
        }
        Ok(paid)
    }

    // ---- pricing ----

    /// Sets the caller's native and stable default prices.
    ///
    /// # Errors
    ///
    /// Returns `HostNotActive` or `PriceOutOfBounds`.
    pub fn set_default_price(&mut self, caller: Address, native: u128, stable: u128) -> Result<(), MarketError> {
        self.ensure_host(&caller)?;
        self.pricing.set_default_price(caller, native, stable)?;
        self.pricing_updated(caller, PricingChange::Defaults);
        Ok(())
    }

    /// Sets a model override for the caller.
    ///
    /// # Errors
    ///
    /// Returns `HostNotActive`, `InvalidParameter` or `PriceOutOfBounds`.
    pub fn set_model_price(
        &mut self,
        caller: Address,
        model: ModelId,
        price: ModelPrice,
    ) -> Result<(), MarketError> {
        self.ensure_host(&caller)?;
        self.pricing.set_model_price(caller, model, price)?;
        self.pricing_updated(caller, PricingChange::ModelSet);
        Ok(())
    }

    /// Removes a model override. Returns whether one existed.
    ///
    /// # Errors
    ///
    /// Returns `HostNotActive`.
    pub fn clear_model_price(&mut self, caller: Address, model: &ModelId) -> Result<bool, MarketError> {
        self.ensure_host(&caller)?;
        let removed = self.pricing.clear_model_price(&caller, model);
        if removed {
            self.pricing_updated(caller, PricingChange::ModelCleared);
        }
        Ok(removed)
    }

    /// Sets the caller's price for one accepted token.
    ///
    /// # Errors
    ///
    /// Returns `HostNotActive`, `AssetNotAccepted`, `InvalidParameter` for
    /// the native asset or `PriceOutOfBounds`.
    pub fn set_token_price(&mut self, caller: Address, asset: Asset, price: u128) -> Result<(), MarketError> {
        self.ensure_host(&caller)?;
        if asset.is_native() {
            return Err(MarketError::InvalidParameter(
                "token price cannot target the native asset".into(),
            ));
        }
        if !self.assets.is_accepted(&asset) {
            return Err(MarketError::AssetNotAccepted(asset));
        }
        self.pricing.set_token_price(caller, &asset, price)?;
        self.pricing_updated(caller, PricingChange::Token);
        Ok(())
    }

    /// Returns a host's pricing record.
    #[must_use]
    pub fn pricing(&self, host: &Address) -> Option<&PricingRecord> {
        self.pricing.record(host)
    }

    /// Minimum price `host` accepts for `asset` and `model`.
    #[must_use]
    pub fn effective_price(&self, host: &Address, asset: &Asset, model: Option<&ModelId>) -> u128 {
        self.pricing.effective_price(host, asset, model)
    }

    fn ensure_host(&self, caller: &Address) -> Result<(), MarketError> {
        if self.hosts.is_active_host(caller) {
            Ok(())
        } else {
            Err(MarketError::HostNotActive(caller.to_string()))
        }
    }

    fn pricing_updated(&mut self, host: Address, change: PricingChange) {
        debug!(host = %host, change = ?change, "pricing updated");
        self.events.push(MarketEvent::PricingUpdated { host, change });
    }

    // ---- queries ----

    /// Returns a session by id.
    #[must_use]
    pub fn session(&self, session_id: SessionId) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    /// Returns the accepted proofs of a session, oldest first.
    #[must_use]
    pub fn proofs(&self, session_id: SessionId) -> &[ProofSubmission] {
        self.proofs
            .get(&session_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Sessions opened by `depositor`, in id order.
    #[must_use]
    pub fn sessions_by_depositor(&self, depositor: &Address) -> Vec<&Session> {
        self.sessions
            .values()
            .filter(|s| &s.depositor == depositor)
            .collect()
    }

    /// Sessions served by `host`, in id order.
    #[must_use]
    pub fn sessions_by_host(&self, host: &Address) -> Vec<&Session> {
        self.sessions.values().filter(|s| &s.host == host).collect()
    }

    /// Number of sessions still accepting proofs.
    #[must_use]
    pub fn active_session_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_active()).count()
    }

    /// Returns true if the proof hash has been credited to any session.
    #[must_use]
    pub fn is_proof_used(&self, proof_hash: &ProofHash) -> bool {
        self.used_proofs.contains(proof_hash)
    }

    /// Events recorded since the last drain.
    #[must_use]
    pub fn events(&self) -> &[MarketEvent] {
        &self.events
    }

    /// Returns and clears the recorded events.
    ///
    /// Events accumulate until drained, so long-running embedders should
    /// call this regularly.
    pub fn drain_events(&mut self) -> Vec<MarketEvent> {
        std::mem::take(&mut self.events)
    }

    fn session_ref(&self, session_id: SessionId) -> Result<&Session, MarketError> {
        self.sessions
            .get(&session_id)
            .ok_or(MarketError::SessionNotFound(session_id))
    }

    fn session_mut(&mut self, session_id: SessionId) -> Result<&mut Session, MarketError> {
        self.sessions
            .get_mut(&session_id)
            .ok_or(MarketError::SessionNotFound(session_id))
    }
}
