//! Marketplace configuration.
//!
//! Configuration is plain serde data with defaults for every field, so a JSON
//! file only needs to name the values it changes. The one exception is the
//! treasury: its default is the all-zero key, which validation rejects.

use std::collections::HashMap;
use std::path::Path;

use meter_core::{Address, Amount, AssetCategory};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Denominator for fee basis points.
pub const BASIS_POINTS: u128 = 10_000;

const UNSET_TREASURY: Address = Address::from_bytes([0u8; 32]);

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid JSON for [`MarketConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Inclusive price range for one asset category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBounds {
    /// Lowest price a host may set; also the floor used when a host has no default.
    pub min: u128,
    /// Highest price a host may set.
    pub max: u128,
}

impl PriceBounds {
    /// Returns true if `price` lies within the bounds.
    #[must_use]
    pub const fn contains(&self, price: u128) -> bool {
        price >= self.min && price <= self.max
    }
}

/// Tunable parameters of the marketplace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Treasury fee in basis points of gross session value.
    pub fee_basis_points: u32,
    /// Fixed-point scale of `price_per_unit`.
    pub price_precision: u128,
    /// Units a host is expected to produce per second.
    pub base_rate_per_second: u64,
    /// Headroom multiplier over the base rate.
    pub safety_multiplier: u64,
    /// Seconds after the last proof before a host may complete a session.
    pub dispute_window_secs: u64,
    /// Longest session a depositor may open.
    pub max_session_duration_secs: u64,
    /// Account allowed to withdraw treasury fees.
    pub treasury: Address,
    /// Canonical stable token.
    pub stable_asset: Option<Address>,
    /// Minimum deposit for native sessions.
    pub native_min_deposit: Amount,
    /// Minimum deposit for the canonical stable token.
    pub stable_min_deposit: Amount,
    /// Additional accepted tokens and their minimum deposits.
    pub token_min_deposits: HashMap<Address, Amount>,
    /// Allowed host prices for native sessions.
    pub native_price_bounds: PriceBounds,
    /// Allowed host prices for stable sessions.
    pub stable_price_bounds: PriceBounds,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            fee_basis_points: 1_000,
            price_precision: 1_000,
            base_rate_per_second: 1_000,
            safety_multiplier: 2,
            dispute_window_secs: 30,
            max_session_duration_secs: 365 * 24 * 60 * 60,
            treasury: UNSET_TREASURY,
            stable_asset: None,
            native_min_deposit: Amount::from_base(200_000_000_000_000),
            stable_min_deposit: Amount::from_base(800_000_000_000_000_000),
            token_min_deposits: HashMap::new(),
            native_price_bounds: PriceBounds {
                min: 1,
                max: 22_727_272_727_273_000,
            },
            stable_price_bounds: PriceBounds {
                min: 1,
                max: 100_000_000_000,
            },
        }
    }
}

impl MarketConfig {
    /// Creates a new config builder starting from defaults.
    #[must_use]
    pub fn builder() -> MarketConfigBuilder {
        MarketConfigBuilder::default()
    }

    /// Parses and validates a config from JSON text.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` for malformed JSON and
    /// `ConfigError::Invalid` for out-of-range values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a config from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Io` if the file cannot be read, otherwise as
    /// [`MarketConfig::from_json_str`].
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&contents)?;
        debug!(path = %path.display(), "loaded market config");
        Ok(config)
    }

    /// Checks that every value is in range.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.treasury == UNSET_TREASURY {
            return Err(ConfigError::Invalid("treasury must be set".into()));
        }
        if u128::from(self.fee_basis_points) > BASIS_POINTS {
            return Err(ConfigError::Invalid(format!(
                "fee_basis_points {} exceeds {BASIS_POINTS}",
                self.fee_basis_points
            )));
        }
        if self.price_precision == 0 {
            return Err(ConfigError::Invalid("price_precision must be positive".into()));
        }
        if self.base_rate_per_second == 0 || self.safety_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "base_rate_per_second and safety_multiplier must be positive".into(),
            ));
        }
        if self.max_session_duration_secs == 0 {
            return Err(ConfigError::Invalid(
                "max_session_duration_secs must be positive".into(),
            ));
        }
        for (name, bounds) in [
            ("native_price_bounds", self.native_price_bounds),
            ("stable_price_bounds", self.stable_price_bounds),
        ] {
            if bounds.min == 0 || bounds.min > bounds.max {
                return Err(ConfigError::Invalid(format!(
                    "{name} must satisfy 0 < min <= max"
                )));
            }
        }
        Ok(())
    }

    /// Returns the price bounds for an asset category.
    #[must_use]
    pub const fn price_bounds(&self, category: AssetCategory) -> PriceBounds {
        match category {
            AssetCategory::Native => self.native_price_bounds,
            AssetCategory::Stable => self.stable_price_bounds,
        }
    }
}

/// Builder for constructing [`MarketConfig`] instances.
#[derive(Debug, Clone, Default)]
pub struct MarketConfigBuilder {
    config: MarketConfig,
}

impl MarketConfigBuilder {
    /// Sets the treasury fee in basis points.
    #[must_use]
    pub const fn fee_basis_points(mut self, bps: u32) -> Self {
        self.config.fee_basis_points = bps;
        self
    }

    /// Sets the price precision.
    #[must_use]
    pub const fn price_precision(mut self, precision: u128) -> Self {
        self.config.price_precision = precision;
        self
    }

    /// Sets the base production rate and its safety multiplier.
    #[must_use]
    pub const fn rate_limit(mut self, base_rate_per_second: u64, safety_multiplier: u64) -> Self {
        self.config.base_rate_per_second = base_rate_per_second;
        self.config.safety_multiplier = safety_multiplier;
        self
    }

    /// Sets the host dispute window.
    #[must_use]
    pub const fn dispute_window_secs(mut self, secs: u64) -> Self {
        self.config.dispute_window_secs = secs;
        self
    }

    /// Sets the longest allowed session.
    #[must_use]
    pub const fn max_session_duration_secs(mut self, secs: u64) -> Self {
        self.config.max_session_duration_secs = secs;
        self
    }

    /// Sets the treasury account.
    #[must_use]
    pub const fn treasury(mut self, treasury: Address) -> Self {
        self.config.treasury = treasury;
        self
    }

    /// Sets the canonical stable token and its minimum deposit.
    #[must_use]
    pub const fn stable_asset(mut self, token: Address, min_deposit: Amount) -> Self {
        self.config.stable_asset = Some(token);
        self.config.stable_min_deposit = min_deposit;
        self
    }

    /// Sets the native minimum deposit.
    #[must_use]
    pub const fn native_min_deposit(mut self, amount: Amount) -> Self {
        self.config.native_min_deposit = amount;
        self
    }

    /// Accepts an additional token with the given minimum deposit.
    #[must_use]
    pub fn accept_token(mut self, token: Address, min_deposit: Amount) -> Self {
        self.config.token_min_deposits.insert(token, min_deposit);
        self
    }

    /// Sets the native price bounds.
    #[must_use]
    pub const fn native_price_bounds(mut self, min: u128, max: u128) -> Self {
        self.config.native_price_bounds = PriceBounds { min, max };
        self
    }

    /// Sets the stable price bounds.
    #[must_use]
    pub const fn stable_price_bounds(mut self, min: u128, max: u128) -> Self {
        self.config.stable_price_bounds = PriceBounds { min, max };
        self
    }

    /// Validates and builds the config.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if any value is out of range.
    pub fn build(self) -> Result<MarketConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn treasury() -> Address {
        Address::from_bytes([7u8; 32])
    }

    fn builder() -> MarketConfigBuilder {
        MarketConfig::builder().treasury(treasury())
    }

    #[test]
    fn defaults_are_valid_once_treasury_is_set() {
        let config = builder().build().expect("valid config");
        assert_eq!(config.fee_basis_points, 1_000);
        assert_eq!(config.price_precision, 1_000);
    }

    #[test]
    fn default_treasury_is_rejected() {
        let result = MarketConfig::default().validate();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
        assert!(MarketConfig::builder().build().is_err());
    }

    #[test]
    fn builder_rejects_fee_above_basis_points() {
        let result = builder().fee_basis_points(10_001).build();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn builder_rejects_zero_rate() {
        assert!(builder().rate_limit(0, 2).build().is_err());
        assert!(builder().rate_limit(10, 0).build().is_err());
    }

    #[test]
    fn builder_rejects_inverted_bounds() {
        assert!(builder().native_price_bounds(10, 5).build().is_err());
        assert!(builder().stable_price_bounds(0, 5).build().is_err());
    }

    #[test]
    fn json_overrides_only_named_fields() {
        let json = format!(r#"{{"treasury": "{}", "fee_basis_points": 250}}"#, treasury());
        let config = MarketConfig::from_json_str(&json).expect("valid config");
        assert_eq!(config.treasury, treasury());
        assert_eq!(config.fee_basis_points, 250);
        assert_eq!(config.dispute_window_secs, 30);
    }

    #[test]
    fn json_rejects_invalid_values() {
        let json = format!(r#"{{"treasury": "{}", "price_precision": 0}}"#, treasury());
        assert!(matches!(
            MarketConfig::from_json_str(&json),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            MarketConfig::from_json_str("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn json_rejects_missing_treasury() {
        assert!(matches!(
            MarketConfig::from_json_str("{}"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            MarketConfig::from_json_str(r#"{"fee_basis_points": 250}"#),
            Err(ConfigError::Invalid(_))
        ));
        let zero = Address::from_bytes([0u8; 32]);
        let json = format!(r#"{{"treasury": "{zero}"}}"#);
        assert!(matches!(
            MarketConfig::from_json_str(&json),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn loads_from_file() {
        let token = Address::from_bytes([5u8; 32]);
        let config = builder()
            .stable_asset(token, Amount::from_whole(1))
            .dispute_window_secs(90)
            .build()
            .expect("valid config");

        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(serde_json::to_string(&config).expect("serialize").as_bytes())
            .expect("write");

        let loaded = MarketConfig::from_json_file(file.path()).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = MarketConfig::from_json_file(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
