//! Asset amount type with fixed-point precision.
//!
//! The Amount type represents balances in base units with 18 decimal places,
//! the same scale used for native currency and stable tokens alike.
//! All arithmetic operations are overflow-checked.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::CoreError;

/// Number of decimal places carried by an [`Amount`].
pub const DECIMALS: u32 = 18;

/// One whole unit expressed in base units.
pub const BASE_PER_UNIT: u128 = 1_000_000_000_000_000_000;

/// Represents an asset amount with fixed-point precision (18 decimals).
///
/// Internally stored as base units (10^-18 of a whole unit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(u128);

impl Amount {
    /// Zero amount constant.
    pub const ZERO: Self = Self(0);

    /// Maximum representable amount.
    pub const MAX: Self = Self(u128::MAX);

    /// Creates an Amount from base units.
    #[must_use]
    pub const fn from_base(base: u128) -> Self {
        Self(base)
    }

    /// Creates an Amount from whole units.
    #[must_use]
    pub const fn from_whole(whole: u64) -> Self {
        Self(whole as u128 * BASE_PER_UNIT)
    }

    /// Returns the amount in base units.
    #[must_use]
    pub const fn as_base(self) -> u128 {
        self.0
    }

    /// Returns the amount in whole units (truncates the fractional part).
    #[must_use]
    pub const fn as_whole(self) -> u128 {
        self.0 / BASE_PER_UNIT
    }

    /// Checked addition. Returns `None` on overflow.
    #[must_use]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match self.0.checked_add(rhs.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Checked subtraction. Returns `None` on underflow.
    #[must_use]
    pub const fn checked_sub(self, rhs: Self) -> Option<Self> {
        match self.0.checked_sub(rhs.0) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Checked multiplication by a scalar. Returns `None` on overflow.
    #[must_use]
    pub const fn checked_mul(self, rhs: u128) -> Option<Self> {
        match self.0.checked_mul(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Checked division by a scalar. Returns `None` if divisor is zero.
    #[must_use]
    pub const fn checked_div(self, rhs: u128) -> Option<Self> {
        match self.0.checked_div(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Returns true if this amount is zero.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / BASE_PER_UNIT;
        let frac = self.0 % BASE_PER_UNIT;
        write!(f, "{whole}.{frac:018}")
    }
}

impl FromStr for Amount {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with('-') {
            return Err(CoreError::InvalidAmount("negative values not allowed".into()));
        }

        let (whole_str, frac_str) = match s.split_once('.') {
            Some((whole, frac)) => (whole, frac),
            None => (s, ""),
        };

        if whole_str.is_empty() && frac_str.is_empty() {
            return Err(CoreError::InvalidAmount("empty amount".into()));
        }
        if frac_str.contains('.') {
            return Err(CoreError::InvalidAmount(format!("invalid format: {s}")));
        }
        if !whole_str.bytes().chain(frac_str.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(CoreError::InvalidAmount(format!("invalid digits: {s}")));
        }
        if frac_str.len() > DECIMALS as usize {
            return Err(CoreError::InvalidAmount("too many decimal places".into()));
        }

        let whole: u128 = if whole_str.is_empty() {
            0
        } else {
            whole_str
                .parse()
                .map_err(|_| CoreError::InvalidAmount(format!("invalid whole part: {s}")))?
        };

        let frac: u128 = if frac_str.is_empty() {
            0
        } else {
            format!("{frac_str:0<18}")
                .parse()
                .map_err(|_| CoreError::InvalidAmount(format!("invalid fractional part: {s}")))?
        };

        whole
            .checked_mul(BASE_PER_UNIT)
            .and_then(|w| w.checked_add(frac))
            .map(Amount)
            .ok_or_else(|| CoreError::InvalidAmount("overflow".into()))
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let whole = self.0 / BASE_PER_UNIT;
        let frac = self.0 % BASE_PER_UNIT;

        let s = if frac == 0 {
            format!("{whole}")
        } else {
            let frac_str = format!("{frac:018}");
            let trimmed = frac_str.trim_end_matches('0');
            format!("{whole}.{trimmed}")
        };

        serializer.serialize_str(&s)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
