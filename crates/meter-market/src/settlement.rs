//! Settlement arithmetic for finished sessions.
//!
//! Splits a session's deposit between the host, the treasury and the
//! depositor:
//!
//! ```text
//! gross  = units × price_per_unit / price_precision
//! fee    = gross × fee_basis_points / 10_000
//! net    = gross − fee
//! refund = deposit − gross
//! ```
//!
//! # Precision Guarantees
//!
//! - **Integer only**: all math is `u128`, floor division.
//! - **Exact conservation**: `net + fee + refund == deposit` for every input
//!   that settles; rounding never creates or destroys value because `net`
//!   and `refund` are computed by subtraction.
//! - **Overflow is an error**, never a silent saturation.

use meter_core::Amount;
use serde::{Deserialize, Serialize};

use crate::config::BASIS_POINTS;
use crate::error::MarketError;

/// The split applied when a session settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Units claimed at settlement time.
    pub units: u64,
    /// Total value of the claimed units.
    pub gross: Amount,
    /// Host payout after the fee.
    pub host_net: Amount,
    /// Treasury fee.
    pub treasury_fee: Amount,
    /// Value returned to the depositor.
    pub refund: Amount,
}

impl Settlement {
    /// Sum of all three payouts; always equals the original deposit.
    #[must_use]
    pub fn total(&self) -> Amount {
        Amount::from_base(
            self.host_net.as_base() + self.treasury_fee.as_base() + self.refund.as_base(),
        )
    }
}

/// Computes the value of `units` at `price_per_unit`.
///
/// # Errors
///
/// Returns `MarketError::SettlementOverflow` if the product overflows or
/// `price_precision` is zero.
pub fn gross_value(units: u64, price_per_unit: u128, price_precision: u128) -> Result<u128, MarketError> {
    u128::from(units)
        .checked_mul(price_per_unit)
        .and_then(|v| v.checked_div(price_precision))
        .ok_or_else(|| {
            MarketError::SettlementOverflow(format!(
                "value of {units} units at price {price_per_unit} is not representable"
            ))
        })
}

/// Computes the settlement split for a session.
///
/// # Errors
///
/// Returns `MarketError::SettlementOverflow` if the arithmetic overflows or
/// the claimed value exceeds the deposit.
///
/// # Examples
/// ```
/// use meter_core::Amount;
/// use meter_market::settlement::compute_settlement;
///
/// let s = compute_settlement(1_000, 500_000, Amount::from_base(1_000_000), 1_000, 1_000).unwrap();
/// assert_eq!(s.gross.as_base(), 500_000);
/// assert_eq!(s.host_net.as_base(), 450_000);
/// assert_eq!(s.treasury_fee.as_base(), 50_000);
/// assert_eq!(s.refund.as_base(), 500_000);
/// ```
pub fn compute_settlement(
    units: u64,
    price_per_unit: u128,
    deposit: Amount,
    price_precision: u128,
    fee_basis_points: u32,
) -> Result<Settlement, MarketError> {
    let gross = gross_value(units, price_per_unit, price_precision)?;

    let refund = deposit.as_base().checked_sub(gross).ok_or_else(|| {
        MarketError::SettlementOverflow(format!(
            "claimed value {gross} exceeds deposit {deposit}"
        ))
    })?;

    let fee = gross
        .checked_mul(u128::from(fee_basis_points))
        .map(|v| v / BASIS_POINTS)
        .ok_or_else(|| MarketError::SettlementOverflow(format!("fee on {gross} overflows")))?;
    if fee > gross {
        return Err(MarketError::SettlementOverflow(format!(
            "fee {fee} exceeds gross {gross}"
        )));
    }

    Ok(Settlement {
        units,
        gross: Amount::from_base(gross),
        host_net: Amount::from_base(gross - fee),
        treasury_fee: Amount::from_base(fee),
        refund: Amount::from_base(refund),
    })
}
