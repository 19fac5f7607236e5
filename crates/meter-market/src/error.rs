//! Error types for meter-market.

use meter_core::{Amount, Asset, CoreError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::session::SessionId;
use crate::store::StoreError;

/// Broad classes of caller-facing failures.
///
/// Every class is recoverable by the caller and none of them changes state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Wrong caller, inactive host, or a window that has not opened yet.
    Authorization,
    /// Bad input: prices, deposits, signatures, rate limits.
    Validation,
    /// Unknown session or a session that is no longer active.
    State,
    /// A proof hash that was already consumed.
    Replay,
    /// Configuration or persistence failures outside any operation.
    Infrastructure,
}

/// Errors that can occur in marketplace operations.
#[derive(Debug, Error)]
pub enum MarketError {
    /// The caller is not the host of the session.
    #[error("caller {caller} is not the host of session {session_id}")]
    NotSessionHost {
        /// Session the call targeted.
        session_id: SessionId,
        /// Address that made the call.
        caller: String,
    },

    /// The caller is not allowed to perform this operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The host is not registered as active.
    #[error("host {0} is not active")]
    HostNotActive(String),

    /// A host tried to finalize inside the dispute window.
    #[error("dispute window still open: {remaining_secs}s remaining")]
    DisputeWindowActive {
        /// Seconds until the host may complete the session.
        remaining_secs: u64,
    },

    /// Offered price is below the host's resolved minimum.
    #[error("price {offered} is below the host minimum {minimum}")]
    PriceBelowMinimum {
        /// Price the depositor offered.
        offered: u128,
        /// Effective minimum price for the host, asset and model.
        minimum: u128,
    },

    /// Deposit is below the asset's configured minimum.
    #[error("deposit {deposit} is below the minimum {minimum} for {asset}")]
    DepositBelowMinimum {
        /// Asset of the deposit.
        asset: Asset,
        /// Deposit that was offered.
        deposit: Amount,
        /// Configured minimum.
        minimum: Amount,
    },

    /// The asset is not accepted for payment.
    #[error("asset {0} is not accepted")]
    AssetNotAccepted(Asset),

    /// A numeric or textual parameter is out of range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A host price is outside the configured bounds.
    #[error("price {price} outside bounds [{min}, {max}]")]
    PriceOutOfBounds {
        /// Price that was set.
        price: u128,
        /// Lower bound.
        min: u128,
        /// Upper bound.
        max: u128,
    },

    /// Signature bytes have the wrong length.
    #[error("malformed signature: expected {expected} bytes, got {actual}")]
    MalformedSignature {
        /// Required length.
        expected: usize,
        /// Supplied length.
        actual: usize,
    },

    /// The signature was not produced by the session host.
    #[error("signature was not produced by host {0}")]
    SignerMismatch(String),

    /// The claimed units exceed the elapsed-time allowance.
    #[error("rate limit exceeded: claimed {claimed} units, ceiling {ceiling}")]
    RateLimitExceeded {
        /// Units in the submission.
        claimed: u64,
        /// Maximum units allowed for the elapsed time.
        ceiling: u128,
    },

    /// The minimum interval between proofs has not elapsed.
    #[error("proof submitted too early: {remaining_secs}s until next proof")]
    ProofTooEarly {
        /// Seconds until the next proof is accepted.
        remaining_secs: u64,
    },

    /// The claim would accrue more value than the deposit.
    #[error("claim of {claimed_value} exceeds deposit {deposit}")]
    ExceedsDepositCapacity {
        /// Value of all units claimed including this submission.
        claimed_value: u128,
        /// Session deposit.
        deposit: Amount,
    },

    /// Insufficient withdrawable balance.
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Amount required for the operation.
        required: Amount,
        /// Amount currently available.
        available: Amount,
    },

    /// Settlement arithmetic overflowed or exceeded the deposit.
    #[error("settlement failed: {0}")]
    SettlementOverflow(String),

    /// The external transfer rejected a payout.
    #[error("payout failed: {0}")]
    PayoutFailed(String),

    /// No session with this id.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// The session is already completed or timed out.
    #[error("session {session_id} is not active (status: {status})")]
    SessionNotActive {
        /// Session the call targeted.
        session_id: SessionId,
        /// Its current status.
        status: String,
    },

    /// The session's maximum duration has not elapsed.
    #[error("session not expired: {remaining_secs}s remaining")]
    SessionNotExpired {
        /// Seconds until the session can be timed out.
        remaining_secs: u64,
    },

    /// Invalid session state transition.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
    },

    /// A nested call arrived while an operation was in progress.
    #[error("reentrant call rejected")]
    Reentrant,

    /// The proof hash has already been used.
    #[error("proof hash {0} has already been used")]
    ProofReplay(String),

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Persistence error.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MarketError {
    /// Returns the taxonomy class of this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::NotSessionHost { .. }
            | Self::Unauthorized(_)
            | Self::HostNotActive(_)
            | Self::DisputeWindowActive { .. } => ErrorCategory::Authorization,
            Self::PriceBelowMinimum { .. }
            | Self::DepositBelowMinimum { .. }
            | Self::AssetNotAccepted(_)
            | Self::InvalidParameter(_)
            | Self::PriceOutOfBounds { .. }
            | Self::MalformedSignature { .. }
            | Self::SignerMismatch(_)
            | Self::RateLimitExceeded { .. }
            | Self::ProofTooEarly { .. }
            | Self::ExceedsDepositCapacity { .. }
            | Self::InsufficientFunds { .. }
            | Self::SettlementOverflow(_)
            | Self::PayoutFailed(_) => ErrorCategory::Validation,
            Self::SessionNotFound(_)
            | Self::SessionNotActive { .. }
            | Self::SessionNotExpired { .. }
            | Self::InvalidStateTransition { .. }
            | Self::Reentrant => ErrorCategory::State,
            Self::ProofReplay(_) => ErrorCategory::Replay,
            Self::Config(_) | Self::Store(_) => ErrorCategory::Infrastructure,
        }
    }
}

impl From<CoreError> for MarketError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::MalformedSignature { expected, actual } => {
                Self::MalformedSignature { expected, actual }
            }
            CoreError::InvalidAmount(msg) => Self::InvalidParameter(msg),
            CoreError::InvalidAddress(msg) => Self::InvalidParameter(msg),
            CoreError::InvalidSignature => Self::SignerMismatch("unknown".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_taxonomy() {
        assert_eq!(
            MarketError::HostNotActive("h".into()).category(),
            ErrorCategory::Authorization
        );
        assert_eq!(
            MarketError::RateLimitExceeded {
                claimed: 10,
                ceiling: 5
            }
            .category(),
            ErrorCategory::Validation
        );
        assert_eq!(MarketError::SessionNotFound(7).category(), ErrorCategory::State);
        assert_eq!(
            MarketError::ProofReplay("ab".into()).category(),
            ErrorCategory::Replay
        );
    }

    #[test]
    fn malformed_signature_maps_from_core() {
        let err: MarketError = CoreError::MalformedSignature {
            expected: 64,
            actual: 10,
        }
        .into();
        assert!(matches!(
            err,
            MarketError::MalformedSignature {
                expected: 64,
                actual: 10
            }
        ));
    }

    #[test]
    fn messages_are_descriptive() {
        let err = MarketError::PriceBelowMinimum {
            offered: 10,
            minimum: 20,
        };
        assert_eq!(err.to_string(), "price 10 is below the host minimum 20");
    }
}
