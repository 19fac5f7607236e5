//! Payment assets accepted for session deposits.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::wallet::Address;

/// Pricing category of an asset.
///
/// Every token shares the stable category; per-token overrides refine it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetCategory {
    /// The chain's native currency.
    Native,
    /// Stable-value fungible tokens.
    Stable,
}

/// The asset a session is denominated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Asset {
    /// Native currency.
    Native,
    /// A fungible token identified by its contract address.
    Token(Address),
}

impl Asset {
    /// Returns the pricing category of this asset.
    #[must_use]
    pub const fn category(&self) -> AssetCategory {
        match self {
            Self::Native => AssetCategory::Native,
            Self::Token(_) => AssetCategory::Stable,
        }
    }

    /// Returns true for the native currency.
    #[must_use]
    pub const fn is_native(&self) -> bool {
        matches!(self, Self::Native)
    }

    /// Returns the token address, if this is a token.
    #[must_use]
    pub const fn token(&self) -> Option<&Address> {
        match self {
            Self::Native => None,
            Self::Token(address) => Some(address),
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Token(address) => write!(f, "token:{address}"),
        }
    }
}

impl fmt::Display for AssetCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => write!(f, "native"),
            Self::Stable => write!(f, "stable"),
        }
    }
}
