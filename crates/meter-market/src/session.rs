//! Metered session records and their lifecycle state machine.
//!
//! A session starts `Active` and ends exactly once, either `Completed` or
//! `TimedOut`. Both terminal states are final.

use chrono::{DateTime, Duration, Utc};
use meter_core::{Address, Amount, Asset};
use serde::{Deserialize, Serialize};

use crate::error::MarketError;
use crate::pricing::ModelId;
use crate::settlement::Settlement;

/// Monotonically assigned session identifier.
pub type SessionId = u64;

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Accepting proofs.
    Active,
    /// Settled by the depositor or the host.
    Completed,
    /// Settled after the maximum duration elapsed.
    TimedOut,
}

impl SessionStatus {
    /// Checks if a transition to the target status is valid.
    #[must_use]
    pub const fn can_transition_to(&self, target: &Self) -> bool {
        matches!(
            (self, target),
            (Self::Active, Self::Completed | Self::TimedOut)
        )
    }

    /// Returns true for `Completed` and `TimedOut`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Completed => write!(f, "Completed"),
            Self::TimedOut => write!(f, "TimedOut"),
        }
    }
}

/// Where a session's deposit comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingSource {
    /// Fresh value transferred in with the call.
    Direct,
    /// Debited from the depositor's withdrawable balance.
    Prefunded,
}

/// Parameters a depositor supplies to open a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    /// Host that will perform the work.
    pub host: Address,
    /// Payment asset.
    pub asset: Asset,
    /// Amount escrowed for the session.
    pub deposit: Amount,
    /// Offered price per unit, scaled by the price precision.
    pub price_per_unit: u128,
    /// Seconds after creation when anyone may time the session out.
    pub max_duration_secs: u64,
    /// Minimum seconds between accepted proofs.
    pub proof_interval_secs: u64,
    /// Work model the session is scoped to.
    pub model: Option<ModelId>,
}

/// A metered escrow agreement between one depositor and one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session identifier.
    pub id: SessionId,
    /// Account that escrowed the deposit.
    pub depositor: Address,
    /// Account performing the work.
    pub host: Address,
    /// Payment asset.
    pub asset: Asset,
    /// Escrowed amount.
    pub deposit: Amount,
    /// Agreed price per unit, scaled by the price precision.
    pub price_per_unit: u128,
    /// Units credited so far.
    pub units_claimed: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last accepted proof (creation time until the first proof).
    pub last_proof_at: DateTime<Utc>,
    /// Maximum session duration in seconds.
    pub max_duration_secs: u64,
    /// Minimum seconds between accepted proofs.
    pub proof_interval_secs: u64,
    /// Seconds after the last proof before the host may complete.
    pub dispute_window_secs: u64,
    /// Work model the session is scoped to.
    pub model: Option<ModelId>,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// When the session settled.
    pub ended_at: Option<DateTime<Utc>>,
    /// Final content locator supplied on completion.
    pub content_locator: Option<String>,
    /// The split applied at settlement.
    pub settlement: Option<Settlement>,
}

impl Session {
    /// Creates a new active session.
    #[must_use]
    pub fn new(
        id: SessionId,
        depositor: Address,
        request: SessionRequest,
        dispute_window_secs: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            depositor,
            host: request.host,
            asset: request.asset,
            deposit: request.deposit,
            price_per_unit: request.price_per_unit,
            units_claimed: 0,
            created_at: now,
            last_proof_at: now,
            max_duration_secs: request.max_duration_secs,
            proof_interval_secs: request.proof_interval_secs,
            dispute_window_secs,
            model: request.model,
            status: SessionStatus::Active,
            ended_at: None,
            content_locator: None,
            settlement: None,
        }
    }

    /// Returns true while the session accepts proofs.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.status, SessionStatus::Active)
    }

    /// Fails unless the session is active.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::SessionNotActive` for a terminal session.
    pub fn ensure_active(&self) -> Result<(), MarketError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(MarketError::SessionNotActive {
                session_id: self.id,
                status: self.status.to_string(),
            })
        }
    }

    /// Fails unless `target` is a valid next status.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::InvalidStateTransition` otherwise.
    pub fn check_transition(&self, target: SessionStatus) -> Result<(), MarketError> {
        if self.status.can_transition_to(&target) {
            Ok(())
        } else {
            Err(MarketError::InvalidStateTransition {
                from: self.status.to_string(),
                to: target.to_string(),
            })
        }
    }

    /// Moves the session to a terminal status and records its settlement.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::InvalidStateTransition` if the session is not active.
    pub fn finish(
        &mut self,
        target: SessionStatus,
        settlement: Settlement,
        content_locator: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), MarketError> {
        self.check_transition(target)?;
        self.status = target;
        self.settlement = Some(settlement);
        self.content_locator = content_locator;
        self.ended_at = Some(now);
        Ok(())
    }

    /// Whole seconds since the last accepted proof (zero if `now` is earlier).
    #[must_use]
    pub fn secs_since_last_proof(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((now - self.last_proof_at).num_seconds()).unwrap_or(0)
    }

    /// Maximum units a proof submitted at `now` may claim.
    #[must_use]
    pub fn rate_limit_ceiling(
        &self,
        now: DateTime<Utc>,
        base_rate_per_second: u64,
        safety_multiplier: u64,
    ) -> u128 {
        u128::from(self.secs_since_last_proof(now))
            .saturating_mul(u128::from(base_rate_per_second))
            .saturating_mul(u128::from(safety_multiplier))
    }

    /// Seconds until the next proof may be submitted, zero if allowed now.
    #[must_use]
    pub fn proof_wait_secs(&self, now: DateTime<Utc>) -> u64 {
        self.proof_interval_secs
            .saturating_sub(self.secs_since_last_proof(now))
    }

    /// When the host may complete the session unilaterally.
    #[must_use]
    pub fn dispute_window_ends_at(&self) -> DateTime<Utc> {
        add_secs(self.last_proof_at, self.dispute_window_secs)
    }

    /// Seconds left in the dispute window, zero once it has elapsed.
    #[must_use]
    pub fn dispute_window_remaining(&self, now: DateTime<Utc>) -> u64 {
        remaining_secs(now, self.dispute_window_ends_at())
    }

    /// When the session's maximum duration ends.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        add_secs(self.created_at, self.max_duration_secs)
    }

    /// Seconds until the session may be timed out, zero once it has expired.
    #[must_use]
    pub fn expiry_remaining(&self, now: DateTime<Utc>) -> u64 {
        if self.is_expired(now) {
            0
        } else {
            remaining_secs(now, self.expires_at()).saturating_add(1)
        }
    }

    /// Returns true once `now` is strictly past the maximum duration.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }
}

fn add_secs(at: DateTime<Utc>, value: u64) -> DateTime<Utc> {
    i64::try_from(value)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn remaining_secs(now: DateTime<Utc>, until: DateTime<Utc>) -> u64 {
    u64::try_from((until - now).num_seconds()).unwrap_or(0)
}
