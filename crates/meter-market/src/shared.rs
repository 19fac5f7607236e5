//! Cloneable, thread-safe handle to a [`Marketplace`].
//!
//! Calls from different threads serialize on a reentrant mutex. A call that
//! re-enters the handle from the same thread while an operation is running
//! (typically a [`PayoutSink`] calling back in during a withdrawal) finds the
//! engine already borrowed and fails with [`MarketError::Reentrant`]; the
//! outer operation is unaffected.

use std::cell::RefCell;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use meter_core::{Address, Amount, Asset};
use parking_lot::ReentrantMutex;
use tracing::warn;

use crate::error::MarketError;
use crate::events::MarketEvent;
use crate::marketplace::Marketplace;
use crate::proof::ProofClaim;
use crate::registry::PayoutSink;
use crate::session::{FundingSource, SessionId, SessionRequest};
use crate::settlement::Settlement;
use crate::store::{MarketState, SnapshotStore};

/// Shared marketplace handle.
#[derive(Debug, Clone)]
pub struct SharedMarketplace {
    inner: Arc<ReentrantMutex<RefCell<Marketplace>>>,
}

impl SharedMarketplace {
    /// Wraps an engine.
    #[must_use]
    pub fn new(market: Marketplace) -> Self {
        Self {
            inner: Arc::new(ReentrantMutex::new(RefCell::new(market))),
        }
    }

    /// Runs `f` with exclusive access to the engine.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::Reentrant` when called from inside another
    /// operation on the same thread, otherwise whatever `f` returns.
    pub fn with<R>(
        &self,
        f: impl FnOnce(&mut Marketplace) -> Result<R, MarketError>,
    ) -> Result<R, MarketError> {
        let guard = self.inner.lock();
        let Ok(mut market) = guard.try_borrow_mut() else {
            warn!("reentrant marketplace call rejected");
            return Err(MarketError::Reentrant);
        };
        f(&mut market)
    }

    /// Runs `f` with shared access to the engine.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::Reentrant` while a mutation is in progress on
    /// the same thread.
    pub fn read<R>(&self, f: impl FnOnce(&Marketplace) -> R) -> Result<R, MarketError> {
        let guard = self.inner.lock();
        let Ok(market) = guard.try_borrow() else {
            warn!("marketplace read during mutation rejected");
            return Err(MarketError::Reentrant);
        };
        Ok(f(&market))
    }

    /// See [`Marketplace::create_session`].
    ///
    /// # Errors
    ///
    /// As for the engine operation, plus `Reentrant`.
    pub fn create_session(
        &self,
        depositor: Address,
        request: SessionRequest,
        funding: FundingSource,
        now: DateTime<Utc>,
    ) -> Result<SessionId, MarketError> {
        self.with(|m| m.create_session(depositor, request, funding, now))
    }

    /// See [`Marketplace::submit_proof`].
    ///
    /// # Errors
    ///
    /// As for the engine operation, plus `Reentrant`.
    pub fn submit_proof(
        &self,
        caller: Address,
        session_id: SessionId,
        claim: ProofClaim,
        now: DateTime<Utc>,
    ) -> Result<(), MarketError> {
        self.with(|m| m.submit_proof(caller, session_id, claim, now))
    }

    /// See [`Marketplace::complete_session`].
    ///
    /// # Errors
    ///
    /// As for the engine operation, plus `Reentrant`.
    pub fn complete_session(
        &self,
        caller: Address,
        session_id: SessionId,
        content_locator: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Settlement, MarketError> {
        self.with(|m| m.complete_session(caller, session_id, content_locator, now))
    }

    /// See [`Marketplace::trigger_timeout`].
    ///
    /// # Errors
    ///
    /// As for the engine operation, plus `Reentrant`.
    pub fn trigger_timeout(
        &self,
        caller: Address,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<Settlement, MarketError> {
        self.with(|m| m.trigger_timeout(caller, session_id, now))
    }

    /// See [`Marketplace::deposit`].
    ///
    /// # Errors
    ///
    /// As for the engine operation, plus `Reentrant`.
    pub fn deposit(&self, account: Address, asset: Asset, amount: Amount) -> Result<(), MarketError> {
        self.with(|m| m.deposit(account, asset, amount))
    }

    /// See [`Marketplace::withdraw_deposit`].
    ///
    /// # Errors
    ///
    /// As for the engine operation, plus `Reentrant`.
    pub fn withdraw_deposit(
        &self,
        account: Address,
        asset: Asset,
        amount: Amount,
        sink: &mut dyn PayoutSink,
    ) -> Result<Amount, MarketError> {
        self.with(|m| m.withdraw_deposit(account, asset, amount, sink))
    }

    /// See [`Marketplace::withdraw_earnings`].
    ///
    /// # Errors
    ///
    /// As for the engine operation, plus `Reentrant`.
    pub fn withdraw_earnings(
        &self,
        host: Address,
        asset: Asset,
        sink: &mut dyn PayoutSink,
    ) -> Result<Amount, MarketError> {
        self.with(|m| m.withdraw_earnings(host, asset, sink))
    }

    /// See [`Marketplace::withdraw_treasury`].
    ///
    /// # Errors
    ///
    /// As for the engine operation, plus `Reentrant`.
    pub fn withdraw_treasury(
        &self,
        caller: Address,
        asset: Asset,
        sink: &mut dyn PayoutSink,
    ) -> Result<Amount, MarketError> {
        self.with(|m| m.withdraw_treasury(caller, asset, sink))
    }

    /// Returns and clears the events recorded since the last drain.
    ///
    /// # Errors
    ///
    /// Returns `Reentrant` while a mutation is in progress on this thread.
    pub fn drain_events(&self) -> Result<Vec<MarketEvent>, MarketError> {
        self.with(|m| Ok(m.drain_events()))
    }

    /// Captures the persistent state.
    ///
    /// # Errors
    ///
    /// Returns `Reentrant` while a mutation is in progress on this thread.
    pub fn snapshot(&self) -> Result<MarketState, MarketError> {
        self.read(Marketplace::snapshot)
    }

    /// Writes the current state to `store`.
    ///
    /// # Errors
    ///
    /// Returns `Reentrant` or `Store`.
    pub fn save(&self, store: &SnapshotStore) -> Result<(), MarketError> {
        let state = self.snapshot()?;
        store.save(&state).map_err(|e| {
            warn!(path = %store.path().display(), error = %e, "failed to save market snapshot");
            MarketError::from(e)
        })
    }
}
