//! Balance ledger for deposits, escrow, earnings and treasury fees.
//!
//! Every value movement in the marketplace goes through this type. For each
//! asset the ledger maintains
//!
//! ```text
//! Σ withdrawable + Σ locked + Σ earnings + treasury == total_in − total_out
//! ```
//!
//! Each mutating method computes all new balances before writing any of them,
//! so a failed call leaves the ledger untouched.

use std::collections::{HashMap, HashSet};

use meter_core::{Address, Amount, Asset};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::MarketError;
use crate::registry::PayoutSink;
use crate::session::Session;
use crate::settlement::Settlement;

type AccountKey = (Address, Asset);

/// Per-account, per-asset balance maps plus inflow/outflow counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(with = "account_map")]
    withdrawable: HashMap<AccountKey, Amount>,
    #[serde(with = "account_map")]
    locked: HashMap<AccountKey, Amount>,
    #[serde(with = "account_map")]
    earnings: HashMap<AccountKey, Amount>,
    #[serde(with = "asset_map")]
    treasury: HashMap<Asset, Amount>,
    #[serde(with = "asset_map")]
    total_in: HashMap<Asset, Amount>,
    #[serde(with = "asset_map")]
    total_out: HashMap<Asset, Amount>,
}

fn get<K: std::hash::Hash + Eq>(map: &HashMap<K, Amount>, key: &K) -> Amount {
    map.get(key).copied().unwrap_or(Amount::ZERO)
}

fn plus(current: Amount, amount: Amount) -> Result<Amount, MarketError> {
    current
        .checked_add(amount)
        .ok_or_else(|| MarketError::InvalidParameter(format!("balance overflow adding {amount}")))
}

fn minus(current: Amount, amount: Amount) -> Result<Amount, MarketError> {
    current
        .checked_sub(amount)
        .ok_or(MarketError::InsufficientFunds {
            required: amount,
            available: current,
        })
}

fn put<K: std::hash::Hash + Eq>(map: &mut HashMap<K, Amount>, key: K, value: Amount) {
    if value.is_zero() {
        map.remove(&key);
    } else {
        map.insert(key, value);
    }
}

impl Ledger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Funds a depositor could withdraw or commit to a new session.
    #[must_use]
    pub fn withdrawable(&self, account: &Address, asset: &Asset) -> Amount {
        get(&self.withdrawable, &(*account, *asset))
    }

    /// Funds escrowed in the account's active sessions.
    #[must_use]
    pub fn locked(&self, account: &Address, asset: &Asset) -> Amount {
        get(&self.locked, &(*account, *asset))
    }

    /// Net payouts accrued by a host.
    #[must_use]
    pub fn earnings(&self, host: &Address, asset: &Asset) -> Amount {
        get(&self.earnings, &(*host, *asset))
    }

    /// Protocol fees accrued for an asset.
    #[must_use]
    pub fn treasury(&self, asset: &Asset) -> Amount {
        get(&self.treasury, asset)
    }

    /// Value that has entered the ledger for an asset.
    #[must_use]
    pub fn total_in(&self, asset: &Asset) -> Amount {
        get(&self.total_in, asset)
    }

    /// Value that has been paid out of the ledger for an asset.
    #[must_use]
    pub fn total_out(&self, asset: &Asset) -> Amount {
        get(&self.total_out, asset)
    }

    /// Sum of every balance held for an asset.
    #[must_use]
    pub fn held(&self, asset: &Asset) -> u128 {
        let accounts = |map: &HashMap<AccountKey, Amount>| -> u128 {
            map.iter()
                .filter(|((_, a), _)| a == asset)
                .map(|(_, v)| v.as_base())
                .sum()
        };
        accounts(&self.withdrawable)
            + accounts(&self.locked)
            + accounts(&self.earnings)
            + self.treasury(asset).as_base()
    }

    /// Returns true if held balances equal net inflow for `asset`.
    #[must_use]
    pub fn is_conserved(&self, asset: &Asset) -> bool {
        self.total_in(asset)
            .checked_sub(self.total_out(asset))
            .is_some_and(|net| net.as_base() == self.held(asset))
    }

    /// Every asset with a non-zero balance or counter.
    #[must_use]
    pub fn assets(&self) -> HashSet<Asset> {
        let accounts = [&self.withdrawable, &self.locked, &self.earnings]
            .into_iter()
            .flat_map(|map| map.keys().map(|(_, asset)| *asset));
        let totals = [&self.treasury, &self.total_in, &self.total_out]
            .into_iter()
            .flat_map(|map| map.keys().copied());
        accounts.chain(totals).collect()
    }

    /// Returns true if escrow equals the summed deposits of `active`, per
    /// depositor and asset, with nothing locked for anyone else.
    #[must_use]
    pub fn escrow_matches<'a>(&self, active: impl IntoIterator<Item = &'a Session>) -> bool {
        let mut expected: HashMap<AccountKey, Amount> = HashMap::new();
        for session in active {
            let entry = expected
                .entry((session.depositor, session.asset))
                .or_insert(Amount::ZERO);
            let Some(sum) = entry.checked_add(session.deposit) else {
                return false;
            };
            *entry = sum;
        }
        expected.retain(|_, amount| !amount.is_zero());
        expected == self.locked
    }

    /// Credits fresh value to an account's withdrawable balance.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::InvalidParameter` on balance overflow.
    pub fn deposit(&mut self, account: Address, asset: Asset, amount: Amount) -> Result<(), MarketError> {
        let key = (account, asset);
        let balance = plus(get(&self.withdrawable, &key), amount)?;
        let inflow = plus(self.total_in(&asset), amount)?;

        put(&mut self.withdrawable, key, balance);
        put(&mut self.total_in, asset, inflow);
        Ok(())
    }

    /// Escrows fresh value for a new session.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::InvalidParameter` on balance overflow.
    pub fn lock_direct(&mut self, account: Address, asset: Asset, amount: Amount) -> Result<(), MarketError> {
        let key = (account, asset);
        let locked = plus(get(&self.locked, &key), amount)?;
        let inflow = plus(self.total_in(&asset), amount)?;

        put(&mut self.locked, key, locked);
        put(&mut self.total_in, asset, inflow);
        Ok(())
    }

    /// Moves withdrawable funds into escrow for a new session.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::InsufficientFunds` if the withdrawable balance is short.
    pub fn lock_prefunded(&mut self, account: Address, asset: Asset, amount: Amount) -> Result<(), MarketError> {
        let key = (account, asset);
        let available = minus(get(&self.withdrawable, &key), amount)?;
        let locked = plus(get(&self.locked, &key), amount)?;

        put(&mut self.withdrawable, key, available);
        put(&mut self.locked, key, locked);
        Ok(())
    }

    /// Applies a session settlement: releases the escrow and credits the
    /// host, the treasury and the depositor's refund.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::SettlementOverflow` if the split does not add up
    /// to the deposit and `MarketError::InsufficientFunds` if the escrow is
    /// smaller than the deposit.
    pub fn settle(&mut self, session: &Session, settlement: &Settlement) -> Result<(), MarketError> {
        if settlement.total() != session.deposit {
            return Err(MarketError::SettlementOverflow(format!(
                "split {} does not match deposit {}",
                settlement.total(),
                session.deposit
            )));
        }

        let asset = session.asset;
        let depositor = (session.depositor, asset);
        let host = (session.host, asset);

        let locked = minus(get(&self.locked, &depositor), session.deposit)?;
        let earnings = plus(get(&self.earnings, &host), settlement.host_net)?;
        let treasury = plus(self.treasury(&asset), settlement.treasury_fee)?;
        let refund = plus(get(&self.withdrawable, &depositor), settlement.refund)?;

        put(&mut self.locked, depositor, locked);
        put(&mut self.earnings, host, earnings);
        put(&mut self.treasury, asset, treasury);
        put(&mut self.withdrawable, depositor, refund);
        Ok(())
    }

    /// Pays out a host's entire earnings balance. Zero is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::PayoutFailed` if the sink rejects the transfer;
    /// the balance is restored.
    pub fn withdraw_earnings(
        &mut self,
        host: Address,
        asset: Asset,
        sink: &mut dyn PayoutSink,
    ) -> Result<Amount, MarketError> {
        let source = Source::Earnings((host, asset));
        let amount = self.balance(source);
        self.pay_out(source, amount, &host, sink)
    }

    /// Pays out the entire treasury balance for an asset. Zero is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::PayoutFailed` if the sink rejects the transfer;
    /// the balance is restored.
    pub fn withdraw_treasury(
        &mut self,
        treasury: Address,
        asset: Asset,
        sink: &mut dyn PayoutSink,
    ) -> Result<Amount, MarketError> {
        let source = Source::Treasury(asset);
        let amount = self.balance(source);
        self.pay_out(source, amount, &treasury, sink)
    }

    /// Pays out part of a depositor's withdrawable balance.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::InsufficientFunds` if the balance is short and
    /// `MarketError::PayoutFailed` if the sink rejects the transfer.
    pub fn withdraw_deposit(
        &mut self,
        account: Address,
        asset: Asset,
        amount: Amount,
        sink: &mut dyn PayoutSink,
    ) -> Result<Amount, MarketError> {
        self.pay_out(Source::Withdrawable((account, asset)), amount, &account, sink)
    }

    fn balance(&self, source: Source) -> Amount {
        match source {
            Source::Withdrawable(key) => get(&self.withdrawable, &key),
            Source::Earnings(key) => get(&self.earnings, &key),
            Source::Treasury(asset) => self.treasury(&asset),
        }
    }

    fn set_balance(&mut self, source: Source, value: Amount) {
        match source {
            Source::Withdrawable(key) => put(&mut self.withdrawable, key, value),
            Source::Earnings(key) => put(&mut self.earnings, key, value),
            Source::Treasury(asset) => put(&mut self.treasury, asset, value),
        }
    }

    /// Debits `source`, transfers, and restores the debit if the transfer fails.
    fn pay_out(
        &mut self,
        source: Source,
        amount: Amount,
        to: &Address,
        sink: &mut dyn PayoutSink,
    ) -> Result<Amount, MarketError> {
        if amount.is_zero() {
            return Ok(Amount::ZERO);
        }
        let asset = source.asset();
        let before = self.balance(source);
        let after = minus(before, amount)?;
        let previous_out = self.total_out(&asset);
        let outflow = plus(previous_out, amount)?;

        self.set_balance(source, after);
        put(&mut self.total_out, asset, outflow);

        if let Err(reason) = sink.transfer(to, &asset, amount) {
            self.set_balance(source, before);
            put(&mut self.total_out, asset, previous_out);
            warn!(to = %to, asset = %asset, amount = %amount, reason = %reason, "payout rejected, balance restored");
            return Err(MarketError::PayoutFailed(reason));
        }
        Ok(amount)
    }
}

/// Balance a payout is drawn from.
#[derive(Debug, Clone, Copy)]
enum Source {
    Withdrawable(AccountKey),
    Earnings(AccountKey),
    Treasury(Asset),
}

impl Source {
    const fn asset(&self) -> Asset {
        match self {
            Self::Withdrawable((_, asset)) | Self::Earnings((_, asset)) | Self::Treasury(asset) => {
                *asset
            }
        }
    }
}

/// Serializes account-keyed maps as entry lists (JSON keys must be strings).
mod account_map {
    use std::collections::HashMap;

    use meter_core::{Address, Amount, Asset};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Entry {
        account: Address,
        asset: Asset,
        amount: Amount,
    }

    pub fn serialize<S>(map: &HashMap<(Address, Asset), Amount>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut entries: Vec<Entry> = map
            .iter()
            .map(|(&(account, asset), &amount)| Entry {
                account,
                asset,
                amount,
            })
            .collect();
        entries.sort_by(|a, b| (a.account, a.asset).cmp(&(b.account, b.asset)));
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<HashMap<(Address, Asset), Amount>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        Ok(entries
            .into_iter()
            .map(|e| ((e.account, e.asset), e.amount))
            .collect())
    }
}

/// Serializes asset-keyed maps as entry lists.
mod asset_map {
    use std::collections::HashMap;

    use meter_core::{Amount, Asset};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Entry {
        asset: Asset,
        amount: Amount,
    }

    pub fn serialize<S>(map: &HashMap<Asset, Amount>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut entries: Vec<Entry> = map
            .iter()
            .map(|(&asset, &amount)| Entry { asset, amount })
            .collect();
        entries.sort_by(|a, b| a.asset.cmp(&b.asset));
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<HashMap<Asset, Amount>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        Ok(entries.into_iter().map(|e| (e.asset, e.amount)).collect())
    }
}
