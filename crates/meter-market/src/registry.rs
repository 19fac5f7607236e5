//! Collaborator interfaces consumed by the marketplace.
//!
//! Host registration, accepted-asset policy and value transfer live outside
//! the engine. The marketplace only asks the narrow questions defined here.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use meter_core::{Address, Amount, Asset};
use parking_lot::RwLock;

use crate::config::MarketConfig;

/// Answers whether an address is an active host.
pub trait HostRegistry: Send + Sync {
    /// Returns true if `host` may accept sessions and set prices.
    fn is_active_host(&self, host: &Address) -> bool;
}

/// Answers which assets are accepted and their minimum deposits.
pub trait AssetPolicy: Send + Sync {
    /// Returns true if `asset` is accepted for deposits.
    fn is_accepted(&self, asset: &Asset) -> bool;

    /// Minimum deposit for `asset`, or `None` if the asset is not accepted.
    fn minimum_deposit(&self, asset: &Asset) -> Option<Amount>;
}

/// External value transfer used when balances leave the ledger.
///
/// Implementations may call arbitrary code; the marketplace debits balances
/// before calling and restores them if the transfer fails.
pub trait PayoutSink {
    /// Transfers `amount` of `asset` to `to`.
    ///
    /// # Errors
    ///
    /// Returns a description of the failure; the payout is then rolled back.
    fn transfer(&mut self, to: &Address, asset: &Asset, amount: Amount) -> Result<(), String>;
}

/// In-memory host registry.
///
/// Clones share the same host set, so a caller can keep a handle and change
/// registrations after passing a clone to the marketplace.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHostRegistry {
    active: Arc<RwLock<HashSet<Address>>>,
}

impl InMemoryHostRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a host active.
    pub fn register(&self, host: Address) {
        self.active.write().insert(host);
    }

    /// Marks a host inactive. Returns whether it was active.
    pub fn deactivate(&self, host: &Address) -> bool {
        self.active.write().remove(host)
    }
}

impl HostRegistry for InMemoryHostRegistry {
    fn is_active_host(&self, host: &Address) -> bool {
        self.active.read().contains(host)
    }
}

/// Accepted assets derived from [`MarketConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedAssets {
    native_min: Amount,
    tokens: HashMap<Address, Amount>,
}

impl AcceptedAssets {
    /// Builds the policy from config: native, the canonical stable token and
    /// every listed token.
    #[must_use]
    pub fn from_config(config: &MarketConfig) -> Self {
        let mut tokens = config.token_min_deposits.clone();
        if let Some(stable) = config.stable_asset {
            tokens.insert(stable, config.stable_min_deposit);
        }
        Self {
            native_min: config.native_min_deposit,
            tokens,
        }
    }
}

impl AssetPolicy for AcceptedAssets {
    fn is_accepted(&self, asset: &Asset) -> bool {
        self.minimum_deposit(asset).is_some()
    }

    fn minimum_deposit(&self, asset: &Asset) -> Option<Amount> {
        match asset {
            Asset::Native => Some(self.native_min),
            Asset::Token(token) => self.tokens.get(token).copied(),
        }
    }
}

/// A payout sink that records every transfer.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    /// Transfers in the order they were made.
    pub transfers: Vec<(Address, Asset, Amount)>,
    /// When set, every transfer fails with this message.
    pub fail_with: Option<String>,
}

impl RecordingSink {
    /// Creates a sink that accepts every transfer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sink that rejects every transfer.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            transfers: Vec::new(),
            fail_with: Some(message.into()),
        }
    }

    /// Total transferred to `to` in `asset`.
    #[must_use]
    pub fn total_to(&self, to: &Address, asset: &Asset) -> Amount {
        Amount::from_base(
            self.transfers
                .iter()
                .filter(|(addr, a, _)| addr == to && a == asset)
                .map(|(_, _, amount)| amount.as_base())
                .sum(),
        )
    }
}

impl PayoutSink for RecordingSink {
    fn transfer(&mut self, to: &Address, asset: &Asset, amount: Amount) -> Result<(), String> {
        if let Some(message) = &self.fail_with {
            return Err(message.clone());
        }
        self.transfers.push((*to, *asset, amount));
        Ok(())
    }
}
