//! Host pricing and minimum price resolution.
//!
//! A host's minimum price for a session is resolved through three tiers:
//!
//! 1. a per-model override for the asset's category,
//! 2. a per-token override (tokens only),
//! 3. the host's category default, or the configured floor if unset.
//!
//! The native and stable sub-prices of a model override resolve
//! independently: an override that only sets `native` leaves stable
//! sessions for that model on tiers 2 and 3.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use meter_core::{Address, Asset, AssetCategory};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::config::PriceBounds;
use crate::error::MarketError;

/// Identifier of the work model a session is scoped to.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModelId([u8; 32]);

impl ModelId {
    /// Creates a model id from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Derives a model id from a human-readable name (`repo/file` style).
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self(*blake3::hash(name.as_bytes()).as_bytes())
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModelId({self})")
    }
}

impl FromStr for ModelId {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| MarketError::InvalidParameter(format!("invalid model id: {e}")))?;
        Ok(Self(bytes))
    }
}

impl Serialize for ModelId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ModelId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Model-specific price override. `None` means unset for that category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPrice {
    /// Override for native sessions.
    pub native: Option<u128>,
    /// Override for stable sessions.
    pub stable: Option<u128>,
}

impl ModelPrice {
    /// Returns the sub-price for a category.
    #[must_use]
    pub const fn for_category(&self, category: AssetCategory) -> Option<u128> {
        match category {
            AssetCategory::Native => self.native,
            AssetCategory::Stable => self.stable,
        }
    }
}

/// Prices owned by one host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingRecord {
    /// Default price for native sessions.
    pub native_default: Option<u128>,
    /// Default price for stable sessions.
    pub stable_default: Option<u128>,
    /// Per-model overrides.
    pub models: HashMap<ModelId, ModelPrice>,
    /// Per-token overrides.
    pub tokens: HashMap<Address, u128>,
}

impl PricingRecord {
    /// Returns the category default, if the host set one.
    #[must_use]
    pub const fn default_for(&self, category: AssetCategory) -> Option<u128> {
        match category {
            AssetCategory::Native => self.native_default,
            AssetCategory::Stable => self.stable_default,
        }
    }
}

/// Which tier produced an effective price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceTier {
    /// A model override.
    Model,
    /// A per-token override.
    Token,
    /// The host's category default.
    HostDefault,
    /// The configured floor (host never set a default).
    Floor,
}

/// All host pricing records plus the bounds they must respect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingBook {
    records: HashMap<Address, PricingRecord>,
    native_bounds: PriceBounds,
    stable_bounds: PriceBounds,
}

impl PricingBook {
    /// Creates an empty pricing book.
    #[must_use]
    pub fn new(native_bounds: PriceBounds, stable_bounds: PriceBounds) -> Self {
        Self {
            records: HashMap::new(),
            native_bounds,
            stable_bounds,
        }
    }

    /// Replaces the price bounds. Existing records are kept as they are.
    pub fn set_bounds(&mut self, native_bounds: PriceBounds, stable_bounds: PriceBounds) {
        self.native_bounds = native_bounds;
        self.stable_bounds = stable_bounds;
    }

    /// Returns the pricing record of a host.
    #[must_use]
    pub fn record(&self, host: &Address) -> Option<&PricingRecord> {
        self.records.get(host)
    }

    /// Returns the number of hosts with a pricing record.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no host has set a price.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    const fn bounds(&self, category: AssetCategory) -> PriceBounds {
        match category {
            AssetCategory::Native => self.native_bounds,
            AssetCategory::Stable => self.stable_bounds,
        }
    }

    /// Resolves the minimum price `host` accepts for `asset` and `model`.
    #[must_use]
    pub fn effective_price(&self, host: &Address, asset: &Asset, model: Option<&ModelId>) -> u128 {
        self.resolve(host, asset, model).0
    }

    /// Resolves the minimum price and reports which tier supplied it.
    #[must_use]
    pub fn resolve(
        &self,
        host: &Address,
        asset: &Asset,
        model: Option<&ModelId>,
    ) -> (u128, PriceTier) {
        let category = asset.category();
        let floor = self.bounds(category).min;
        let Some(record) = self.records.get(host) else {
            return (floor, PriceTier::Floor);
        };

        if let Some(price) = model
            .and_then(|m| record.models.get(m))
            .and_then(|p| p.for_category(category))
        {
            return (price, PriceTier::Model);
        }

        if let Some(price) = asset.token().and_then(|t| record.tokens.get(t)) {
            return (*price, PriceTier::Token);
        }

        record
            .default_for(category)
            .map_or((floor, PriceTier::Floor), |price| {
                (price, PriceTier::HostDefault)
            })
    }

    fn check_bounds(&self, category: AssetCategory, price: u128) -> Result<(), MarketError> {
        let bounds = self.bounds(category);
        if bounds.contains(price) {
            Ok(())
        } else {
            Err(MarketError::PriceOutOfBounds {
                price,
                min: bounds.min,
                max: bounds.max,
            })
        }
    }

    /// Sets both category defaults for `host`.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::PriceOutOfBounds` if either price is out of range.
    pub fn set_default_price(
        &mut self,
        host: Address,
        native: u128,
        stable: u128,
    ) -> Result<(), MarketError> {
        self.check_bounds(AssetCategory::Native, native)?;
        self.check_bounds(AssetCategory::Stable, stable)?;

        let record = self.records.entry(host).or_default();
        record.native_default = Some(native);
        record.stable_default = Some(stable);
        Ok(())
    }

    /// Sets a model override for `host`. Either sub-price may stay unset.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::InvalidParameter` if both sub-prices are unset
    /// and `MarketError::PriceOutOfBounds` if a set price is out of range.
    pub fn set_model_price(
        &mut self,
        host: Address,
        model: ModelId,
        price: ModelPrice,
    ) -> Result<(), MarketError> {
        if price.native.is_none() && price.stable.is_none() {
            return Err(MarketError::InvalidParameter(
                "model price must set native, stable, or both".into(),
            ));
        }
        if let Some(native) = price.native {
            self.check_bounds(AssetCategory::Native, native)?;
        }
        if let Some(stable) = price.stable {
            self.check_bounds(AssetCategory::Stable, stable)?;
        }

        self.records
            .entry(host)
            .or_default()
            .models
            .insert(model, price);
        Ok(())
    }

    /// Sets a per-token override for `host`.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::InvalidParameter` for the native asset and
    /// `MarketError::PriceOutOfBounds` if the price is out of range.
    pub fn set_token_price(
        &mut self,
        host: Address,
        asset: &Asset,
        price: u128,
    ) -> Result<(), MarketError> {
        let Some(token) = asset.token() else {
            return Err(MarketError::InvalidParameter(
                "token price cannot target the native asset".into(),
            ));
        };
        self.check_bounds(AssetCategory::Stable, price)?;

        self.records
            .entry(host)
            .or_default()
            .tokens
            .insert(*token, price);
        Ok(())
    }

    /// Removes a model override entirely. Returns whether one existed.
    pub fn clear_model_price(&mut self, host: &Address, model: &ModelId) -> bool {
        self.records
            .get_mut(host)
            .is_some_and(|record| record.models.remove(model).is_some())
    }
}
