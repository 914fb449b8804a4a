//! Denomination-keyed coin multisets
//!
//! `Coins` and `DecCoins` are kept sorted by denomination with no zero
//! entries, so two equal multisets always compare (and encode) equal.

use super::dec::Dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Token amount in base units
pub type Amount = u128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoinError {
    #[error("invalid denomination: {0:?}")]
    InvalidDenom(String),

    #[error("coins are not sorted or contain duplicates: {0}")]
    Unsorted(String),

    #[error("coin amount must be positive: {0}")]
    NotPositive(String),
}

/// Checks a denomination against `[a-zA-Z][a-zA-Z0-9/:._-]{2,127}`
pub fn validate_denom(denom: &str) -> Result<(), CoinError> {
    let bytes = denom.as_bytes();
    let valid_len = (3..=128).contains(&bytes.len());
    let valid_first = bytes.first().map_or(false, |b| b.is_ascii_alphabetic());
    let valid_rest = bytes
        .iter()
        .skip(1)
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'/' | b':' | b'.' | b'_' | b'-'));

    if valid_len && valid_first && valid_rest {
        Ok(())
    } else {
        Err(CoinError::InvalidDenom(denom.to_string()))
    }
}

/// Single-denomination integer amount
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: Amount,
}

impl Coin {
    pub fn new(denom: impl Into<String>, amount: Amount) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

/// Sorted set of non-zero coins
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coins(Vec<Coin>);

impl Coins {
    /// Builds a normalized multiset: duplicates are merged, zero amounts
    /// dropped, denominations sorted.
    pub fn new(coins: impl IntoIterator<Item = Coin>) -> Self {
        let mut merged: BTreeMap<String, Amount> = BTreeMap::new();
        for coin in coins {
            *merged.entry(coin.denom).or_default() += coin.amount;
        }
        Self::from_map(merged)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn single(denom: impl Into<String>, amount: Amount) -> Self {
        Self::new([Coin::new(denom, amount)])
    }

    fn from_map(map: BTreeMap<String, Amount>) -> Self {
        Self(
            map.into_iter()
                .filter(|(_, amount)| *amount > 0)
                .map(|(denom, amount)| Coin { denom, amount })
                .collect(),
        )
    }

    fn to_map(&self) -> BTreeMap<String, Amount> {
        self.0
            .iter()
            .map(|c| (c.denom.clone(), c.amount))
            .collect()
    }

    pub fn as_slice(&self) -> &[Coin] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Coin> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn denoms(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|c| c.denom.as_str())
    }

    pub fn amount_of(&self, denom: &str) -> Amount {
        self.0
            .binary_search_by(|c| c.denom.as_str().cmp(denom))
            .map(|i| self.0[i].amount)
            .unwrap_or(0)
    }

    pub fn add(&self, other: &Coins) -> Coins {
        let mut map = self.to_map();
        for coin in other.iter() {
            *map.entry(coin.denom.clone()).or_default() += coin.amount;
        }
        Self::from_map(map)
    }

    /// `self - other`, or `None` if any denomination would go negative
    pub fn checked_sub(&self, other: &Coins) -> Option<Coins> {
        let mut map = self.to_map();
        for coin in other.iter() {
            let entry = map.entry(coin.denom.clone()).or_default();
            *entry = entry.checked_sub(coin.amount)?;
        }
        Some(Self::from_map(map))
    }

    /// Per-denomination subtraction floored at zero
    pub fn saturating_sub(&self, other: &Coins) -> Coins {
        let mut map = self.to_map();
        for coin in other.iter() {
            if let Some(entry) = map.get_mut(&coin.denom) {
                *entry = entry.saturating_sub(coin.amount);
            }
        }
        Self::from_map(map)
    }

    /// Per-denomination minimum; denominations missing from either side are
    /// dropped
    pub fn min(&self, other: &Coins) -> Coins {
        Self::new(self.0.iter().map(|c| {
            Coin::new(c.denom.clone(), c.amount.min(other.amount_of(&c.denom)))
        }))
    }

    /// True when every denomination of `other` is covered by `self`
    pub fn is_all_gte(&self, other: &Coins) -> bool {
        other.iter().all(|c| self.amount_of(&c.denom) >= c.amount)
    }

    /// Per-denomination `floor(amount * dec)`
    pub fn mul_dec_truncate(&self, dec: &Dec) -> Coins {
        Self::new(
            self.0
                .iter()
                .map(|c| Coin::new(c.denom.clone(), dec.mul_int(c.amount).truncate_int())),
        )
    }

    pub fn to_dec_coins(&self) -> DecCoins {
        DecCoins::new(
            self.0
                .iter()
                .map(|c| DecCoin::new(c.denom.clone(), Dec::from_int(c.amount))),
        )
    }

    /// Only the denominations accepted by `keep`
    pub fn filter(&self, mut keep: impl FnMut(&str) -> bool) -> Coins {
        Self(self.0.iter().filter(|c| keep(&c.denom)).cloned().collect())
    }

    /// Validation for externally supplied coins: denominations well formed,
    /// strictly sorted and every amount positive
    pub fn validate(coins: &[Coin]) -> Result<(), CoinError> {
        for coin in coins {
            validate_denom(&coin.denom)?;
            if coin.amount == 0 {
                return Err(CoinError::NotPositive(coin.to_string()));
            }
        }
        if coins.windows(2).any(|w| w[0].denom >= w[1].denom) {
            let listed: Vec<String> = coins.iter().map(|c| c.to_string()).collect();
            return Err(CoinError::Unsorted(listed.join(",")));
        }
        Ok(())
    }
}

impl fmt::Display for Coins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

impl From<Coin> for Coins {
    fn from(coin: Coin) -> Self {
        Coins::new([coin])
    }
}

impl<'a> IntoIterator for &'a Coins {
    type Item = &'a Coin;
    type IntoIter = std::slice::Iter<'a, Coin>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Single-denomination decimal amount
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DecCoin {
    pub denom: String,
    pub amount: Dec,
}

impl DecCoin {
    pub fn new(denom: impl Into<String>, amount: Dec) -> Self {
        Self {
            denom: denom.into(),
            amount,
        }
    }
}

impl fmt::Display for DecCoin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.denom)
    }
}

/// Sorted set of non-zero decimal coins
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecCoins(Vec<DecCoin>);

impl DecCoins {
    pub fn new(coins: impl IntoIterator<Item = DecCoin>) -> Self {
        let mut merged: BTreeMap<String, Dec> = BTreeMap::new();
        for coin in coins {
            *merged.entry(coin.denom).or_default() += &coin.amount;
        }
        Self::from_map(merged)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn single(denom: impl Into<String>, amount: Dec) -> Self {
        Self::new([DecCoin::new(denom, amount)])
    }

    fn from_map(map: BTreeMap<String, Dec>) -> Self {
        Self(
            map.into_iter()
                .filter(|(_, amount)| !amount.is_zero())
                .map(|(denom, amount)| DecCoin { denom, amount })
                .collect(),
        )
    }

    fn to_map(&self) -> BTreeMap<String, Dec> {
        self.0
            .iter()
            .map(|c| (c.denom.clone(), c.amount.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DecCoin> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn amount_of(&self, denom: &str) -> Dec {
        self.0
            .binary_search_by(|c| c.denom.as_str().cmp(denom))
            .map(|i| self.0[i].amount.clone())
            .unwrap_or_default()
    }

    pub fn add(&self, other: &DecCoins) -> DecCoins {
        let mut map = self.to_map();
        for coin in other.iter() {
            *map.entry(coin.denom.clone()).or_default() += &coin.amount;
        }
        Self::from_map(map)
    }

    /// `self - other`, or `None` if any denomination would go negative
    pub fn checked_sub(&self, other: &DecCoins) -> Option<DecCoins> {
        let mut map = self.to_map();
        for coin in other.iter() {
            let entry = map.entry(coin.denom.clone()).or_default();
            *entry -= &coin.amount;
            if entry.is_negative() {
                return None;
            }
        }
        Some(Self::from_map(map))
    }

    /// True when every denomination of `other` is covered by `self`
    pub fn is_all_gte(&self, other: &DecCoins) -> bool {
        other.iter().all(|c| self.amount_of(&c.denom) >= c.amount)
    }

    /// Per-denomination multiplication, rounded half to even
    pub fn mul_dec(&self, dec: &Dec) -> DecCoins {
        Self::new(
            self.0
                .iter()
                .map(|c| DecCoin::new(c.denom.clone(), c.amount.mul(dec))),
        )
    }

    /// Per-denomination multiplication, truncated
    pub fn mul_dec_truncate(&self, dec: &Dec) -> DecCoins {
        Self::new(
            self.0
                .iter()
                .map(|c| DecCoin::new(c.denom.clone(), c.amount.mul_truncate(dec))),
        )
    }

    /// Per-denomination minimum; denominations missing from either side are
    /// dropped
    pub fn min(&self, other: &DecCoins) -> DecCoins {
        Self::new(self.0.iter().map(|c| {
            DecCoin::new(c.denom.clone(), c.amount.clone().min(other.amount_of(&c.denom)))
        }))
    }

    /// Splits into whole coins and the remaining fractional change
    pub fn truncate_decimal(&self) -> (Coins, DecCoins) {
        let truncated = Coins::new(
            self.0
                .iter()
                .map(|c| Coin::new(c.denom.clone(), c.amount.truncate_int())),
        );
        let change = self
            .checked_sub(&truncated.to_dec_coins())
            .unwrap_or_default();
        (truncated, change)
    }

    /// Validation for externally supplied amounts: denominations well
    /// formed, strictly sorted and every amount positive
    pub fn validate(coins: &[DecCoin]) -> Result<(), CoinError> {
        for coin in coins {
            validate_denom(&coin.denom)?;
            if !coin.amount.is_positive() {
                return Err(CoinError::NotPositive(coin.to_string()));
            }
        }
        if coins.windows(2).any(|w| w[0].denom >= w[1].denom) {
            let listed: Vec<String> = coins.iter().map(|c| c.to_string()).collect();
            return Err(CoinError::Unsorted(listed.join(",")));
        }
        Ok(())
    }
}

impl fmt::Display for DecCoins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

impl From<DecCoin> for DecCoins {
    fn from(coin: DecCoin) -> Self {
        DecCoins::new([coin])
    }
}

impl<'a> IntoIterator for &'a DecCoins {
    type Item = &'a DecCoin;
    type IntoIter = std::slice::Iter<'a, DecCoin>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
