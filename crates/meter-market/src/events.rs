//! Journal of accepted marketplace mutations.

use chrono::{DateTime, Utc};
use meter_core::{Address, Amount, Asset};
use serde::{Deserialize, Serialize};

use crate::proof::ProofHash;
use crate::session::SessionId;
use crate::settlement::Settlement;

/// An accepted state change, recorded in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    /// A depositor opened a session.
    SessionCreated {
        /// New session.
        session_id: SessionId,
        /// Depositor.
        depositor: Address,
        /// Host.
        host: Address,
        /// Payment asset.
        asset: Asset,
        /// Escrowed amount.
        deposit: Amount,
        /// Agreed price per unit.
        price_per_unit: u128,
        /// When the session opened.
        at: DateTime<Utc>,
    },
    /// A host proof was credited.
    ProofAccepted {
        /// Session credited.
        session_id: SessionId,
        /// Consumed proof hash.
        proof_hash: ProofHash,
        /// Units in this proof.
        units: u64,
        /// Units credited so far.
        total_units: u64,
        /// When the proof was accepted.
        at: DateTime<Utc>,
    },
    /// A session settled cooperatively.
    SessionCompleted {
        /// Settled session.
        session_id: SessionId,
        /// Who completed it.
        completed_by: Address,
        /// The applied split.
        settlement: Settlement,
        /// When it settled.
        at: DateTime<Utc>,
    },
    /// A session settled after its maximum duration.
    SessionTimedOut {
        /// Settled session.
        session_id: SessionId,
        /// Who triggered the timeout.
        triggered_by: Address,
        /// The applied split.
        settlement: Settlement,
        /// When it settled.
        at: DateTime<Utc>,
    },
    /// A host withdrew earnings.
    EarningsWithdrawn {
        /// Host.
        host: Address,
        /// Asset.
        asset: Asset,
        /// Amount paid.
        amount: Amount,
    },
    /// Treasury fees were withdrawn.
    TreasuryWithdrawn {
        /// Treasury address.
        treasury: Address,
        /// Asset.
        asset: Asset,
        /// Amount paid.
        amount: Amount,
    },
    /// A depositor pre-funded a balance.
    DepositReceived {
        /// Depositor.
        account: Address,
        /// Asset.
        asset: Asset,
        /// Amount credited.
        amount: Amount,
    },
    /// A depositor withdrew pre-funded or refunded value.
    DepositWithdrawn {
        /// Depositor.
        account: Address,
        /// Asset.
        asset: Asset,
        /// Amount paid.
        amount: Amount,
    },
    /// A host changed its pricing.
    PricingUpdated {
        /// Host.
        host: Address,
        /// What changed.
        change: PricingChange,
    },
}

/// Kind of pricing change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingChange {
    /// Category defaults were set.
    Defaults,
    /// A model override was set.
    ModelSet,
    /// A model override was removed.
    ModelCleared,
    /// A per-token override was set.
    Token,
}

impl MarketEvent {
    /// Session the event concerns, if any.
    #[must_use]
    pub const fn session_id(&self) -> Option<SessionId> {
        match self {
            Self::SessionCreated { session_id, .. }
            | Self::ProofAccepted { session_id, .. }
            | Self::SessionCompleted { session_id, .. }
            | Self::SessionTimedOut { session_id, .. } => Some(*session_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = MarketEvent::DepositReceived {
            account: Address::from_bytes([1u8; 32]),
            asset: Asset::Native,
            amount: Amount::from_base(10),
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "deposit_received");

        let back: MarketEvent = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, event);
        assert_eq!(back.session_id(), None);
    }
}
