//! Validator entity and its exchange-rate math
//!
//! ## Exchange rate
//!
//! Each bond denomination has its own token/share ratio. Delegating `x`
//! tokens of denomination `d` issues
//!
//! ```text
//! shares = tokens[d] == 0 ? x : delegator_shares[d] * x / tokens[d]
//! ```
//!
//! and unbonding `s` shares returns `floor(s * tokens[d] / delegator_shares[d])`.
//! Slashing burns tokens without touching shares, which lowers the rate for
//! every delegator at once.

use super::{Address, ConsAddress, Height, PubKey, Timestamp, UnbondingId, POWER_REDUCTION};
use crate::error::{Result, StakingError};
use crate::math::{Amount, Coin, Coins, Dec, DecCoin, DecCoins};
use serde::{Deserialize, Serialize};

/// Sentinel for description fields left unchanged by an edit
pub const DO_NOT_MODIFY_DESC: &str = "[do-not-modify]";

const MAX_MONIKER_LENGTH: usize = 70;
const MAX_IDENTITY_LENGTH: usize = 3000;
const MAX_WEBSITE_LENGTH: usize = 140;
const MAX_SECURITY_CONTACT_LENGTH: usize = 140;
const MAX_DETAILS_LENGTH: usize = 280;

/// 24 hours in milliseconds
const COMMISSION_UPDATE_INTERVAL: Timestamp = 24 * 60 * 60 * 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BondStatus {
    Unbonded,
    Unbonding,
    Bonded,
}

/// Entry of the list handed to the consensus engine; power 0 removes the
/// validator from the active set
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorUpdate {
    pub pub_key: PubKey,
    pub power: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    pub moniker: String,
    pub identity: String,
    pub website: String,
    pub security_contact: String,
    pub details: String,
}

impl Description {
    pub fn new(moniker: impl Into<String>) -> Self {
        Self {
            moniker: moniker.into(),
            ..Default::default()
        }
    }

    /// Checks field lengths
    pub fn ensure_length(&self) -> Result<()> {
        let checks = [
            ("moniker", &self.moniker, MAX_MONIKER_LENGTH),
            ("identity", &self.identity, MAX_IDENTITY_LENGTH),
            ("website", &self.website, MAX_WEBSITE_LENGTH),
            ("security contact", &self.security_contact, MAX_SECURITY_CONTACT_LENGTH),
            ("details", &self.details, MAX_DETAILS_LENGTH),
        ];

        for (field, value, max) in checks {
            if value.len() > max {
                return Err(StakingError::InvalidDescription(format!(
                    "invalid {} length; got: {}, max: {}",
                    field,
                    value.len(),
                    max
                )));
            }
        }
        Ok(())
    }

    /// Applies an edit; fields equal to [`DO_NOT_MODIFY_DESC`] keep their
    /// current value
    pub fn update(&self, edit: &Description) -> Result<Description> {
        let pick = |new: &String, old: &String| {
            if new == DO_NOT_MODIFY_DESC {
                old.clone()
            } else {
                new.clone()
            }
        };

        let updated = Description {
            moniker: pick(&edit.moniker, &self.moniker),
            identity: pick(&edit.identity, &self.identity),
            website: pick(&edit.website, &self.website),
            security_contact: pick(&edit.security_contact, &self.security_contact),
            details: pick(&edit.details, &self.details),
        };
        updated.ensure_length()?;
        Ok(updated)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRates {
    pub rate: Dec,
    pub max_rate: Dec,
    pub max_change_rate: Dec,
}

impl CommissionRates {
    pub fn new(rate: Dec, max_rate: Dec, max_change_rate: Dec) -> Self {
        Self {
            rate,
            max_rate,
            max_change_rate,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_rate.is_negative() {
            return Err(StakingError::CommissionNegative);
        }
        if self.max_rate > Dec::one() {
            return Err(StakingError::CommissionHuge);
        }
        if self.rate.is_negative() {
            return Err(StakingError::CommissionNegative);
        }
        if self.rate > self.max_rate {
            return Err(StakingError::CommissionGtMaxRate);
        }
        if self.max_change_rate.is_negative() {
            return Err(StakingError::CommissionChangeRateNegative);
        }
        if self.max_change_rate > self.max_rate {
            return Err(StakingError::CommissionChangeRateGtMaxRate);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commission {
    pub rates: CommissionRates,
    pub update_time: Timestamp,
}

impl Commission {
    pub fn new(rates: CommissionRates, update_time: Timestamp) -> Self {
        Self { rates, update_time }
    }

    /// Checks a requested rate change against the schedule
    pub fn validate_new_rate(&self, new_rate: &Dec, block_time: Timestamp) -> Result<()> {
        if block_time.saturating_sub(self.update_time) < COMMISSION_UPDATE_INTERVAL {
            return Err(StakingError::CommissionUpdateTime);
        }
        if new_rate.is_negative() {
            return Err(StakingError::CommissionNegative);
        }
        if *new_rate > self.rates.max_rate {
            return Err(StakingError::CommissionGtMaxRate);
        }
        if new_rate - &self.rates.rate > self.rates.max_change_rate {
            return Err(StakingError::CommissionGtMaxChangeRate);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub operator: Address,
    pub consensus_pubkey: PubKey,
    pub jailed: bool,
    pub status: BondStatus,
    /// Tokens backing all delegations, per denomination
    pub tokens: Coins,
    /// Shares issued to delegators, per denomination
    pub delegator_shares: DecCoins,
    pub description: Description,
    pub unbonding_height: Height,
    pub unbonding_time: Timestamp,
    pub commission: Commission,
    /// Weighted sum over `tokens`
    pub voting_power: Amount,
    /// Per-denomination contributions to `voting_power`
    pub voting_powers: Coins,
    /// Outstanding holds on the current validator unbonding
    pub unbonding_on_hold_ref_count: u64,
    pub unbonding_ids: Vec<UnbondingId>,
}

impl Validator {
    pub fn new(
        operator: Address,
        consensus_pubkey: PubKey,
        description: Description,
        commission: Commission,
    ) -> Self {
        Self {
            operator,
            consensus_pubkey,
            jailed: false,
            status: BondStatus::Unbonded,
            tokens: Coins::empty(),
            delegator_shares: DecCoins::empty(),
            description,
            unbonding_height: 0,
            unbonding_time: 0,
            commission,
            voting_power: 0,
            voting_powers: Coins::empty(),
            unbonding_on_hold_ref_count: 0,
            unbonding_ids: Vec::new(),
        }
    }

    pub fn cons_address(&self) -> ConsAddress {
        self.consensus_pubkey.address()
    }

    pub fn is_bonded(&self) -> bool {
        self.status == BondStatus::Bonded
    }

    pub fn is_unbonding(&self) -> bool {
        self.status == BondStatus::Unbonding
    }

    pub fn is_unbonded(&self) -> bool {
        self.status == BondStatus::Unbonded
    }

    /// Power the validator would have if bonded
    pub fn potential_consensus_power(&self) -> i64 {
        i64::try_from(self.voting_power / POWER_REDUCTION).unwrap_or(i64::MAX)
    }

    /// Power as seen by the consensus engine: zero unless bonded
    pub fn consensus_power(&self) -> i64 {
        if self.is_bonded() {
            self.potential_consensus_power()
        } else {
            0
        }
    }

    pub fn abci_validator_update(&self) -> ValidatorUpdate {
        ValidatorUpdate {
            pub_key: self.consensus_pubkey,
            power: self.consensus_power(),
        }
    }

    pub fn abci_validator_update_zero(&self) -> ValidatorUpdate {
        ValidatorUpdate {
            pub_key: self.consensus_pubkey,
            power: 0,
        }
    }

    /// True if some denomination has shares outstanding but no tokens left,
    /// which makes new delegations in it impossible to price
    pub fn invalid_ex_rate(&self) -> bool {
        self.delegator_shares
            .iter()
            .any(|s| s.amount.is_positive() && self.tokens.amount_of(&s.denom) == 0)
    }

    /// Shares worth `amount` at the current rate, truncated
    pub fn shares_from_tokens(&self, amount: &Coins) -> Result<DecCoins> {
        let mut shares = Vec::with_capacity(amount.len());
        for coin in amount {
            let tokens = self.tokens.amount_of(&coin.denom);
            if tokens == 0 {
                return Err(StakingError::InsufficientShares);
            }
            let share = self
                .delegator_shares
                .amount_of(&coin.denom)
                .mul_int(coin.amount)
                .quo_int(tokens);
            shares.push(DecCoin::new(coin.denom.clone(), share));
        }
        Ok(DecCoins::new(shares))
    }

    /// Tokens the given shares are worth, rounded half to even
    pub fn tokens_from_shares(&self, shares: &DecCoins) -> DecCoins {
        self.map_shares(shares, |s, tokens, total| s.mul_int(tokens).quo(total))
    }

    /// Tokens the given shares are worth, truncated
    pub fn tokens_from_shares_truncated(&self, shares: &DecCoins) -> DecCoins {
        self.map_shares(shares, |s, tokens, total| s.mul_int(tokens).quo_truncate(total))
    }

    /// Tokens the given shares are worth, rounded up
    pub fn tokens_from_shares_round_up(&self, shares: &DecCoins) -> DecCoins {
        self.map_shares(shares, |s, tokens, total| s.mul_int(tokens).quo_round_up(total))
    }

    fn map_shares(
        &self,
        shares: &DecCoins,
        convert: impl Fn(&Dec, Amount, &Dec) -> Dec,
    ) -> DecCoins {
        DecCoins::new(shares.iter().filter_map(|s| {
            let total = self.delegator_shares.amount_of(&s.denom);
            if total.is_zero() {
                return None;
            }
            let tokens = self.tokens.amount_of(&s.denom);
            Some(DecCoin::new(s.denom.clone(), convert(&s.amount, tokens, &total)))
        }))
    }

    /// Adds delegated tokens and returns the shares issued for them
    pub fn add_tokens_from_del(&mut self, amount: &Coins) -> DecCoins {
        let issued = DecCoins::new(amount.iter().map(|coin| {
            let tokens = self.tokens.amount_of(&coin.denom);
            let shares = if tokens == 0 {
                Dec::from_int(coin.amount)
            } else {
                self.delegator_shares
                    .amount_of(&coin.denom)
                    .mul_int(coin.amount)
                    .quo_int(tokens)
            };
            DecCoin::new(coin.denom.clone(), shares)
        }));

        self.tokens = self.tokens.add(amount);
        self.delegator_shares = self.delegator_shares.add(&issued);
        issued
    }

    /// Burns delegator shares and returns the tokens released for them.
    /// The last share of a denomination takes all remaining tokens of it.
    pub fn remove_del_shares(&mut self, del_shares: &DecCoins) -> Result<Coins> {
        let remaining = self
            .delegator_shares
            .checked_sub(del_shares)
            .ok_or_else(|| {
                StakingError::invariant(format!(
                    "removing more shares ({}) than validator {} has ({})",
                    del_shares, self.operator, self.delegator_shares
                ))
            })?;

        let mut issued = Vec::with_capacity(del_shares.len());
        for share in del_shares {
            let tokens = self.tokens.amount_of(&share.denom);
            let amount = if remaining.amount_of(&share.denom).is_zero() {
                tokens
            } else {
                self.tokens_from_shares_truncated(&DecCoins::from(share.clone()))
                    .amount_of(&share.denom)
                    .truncate_int()
            };
            issued.push(Coin::new(share.denom.clone(), amount));
        }
        let issued = Coins::new(issued);

        self.tokens = self.tokens.checked_sub(&issued).ok_or_else(|| {
            StakingError::invariant(format!(
                "attempting to remove more tokens ({}) than validator {} has ({})",
                issued, self.operator, self.tokens
            ))
        })?;
        self.delegator_shares = remaining;
        Ok(issued)
    }

    /// Removes tokens without touching shares (slashing)
    pub fn remove_tokens(&mut self, tokens: &Coins) -> Result<()> {
        self.tokens = self.tokens.checked_sub(tokens).ok_or_else(|| {
            StakingError::invariant(format!(
                "removing more tokens ({}) than validator {} has ({})",
                tokens, self.operator, self.tokens
            ))
        })?;
        Ok(())
    }

    pub fn set_voting_power(&mut self, power: Amount, powers: Coins) {
        self.voting_power = power;
        self.voting_powers = powers;
    }
}
