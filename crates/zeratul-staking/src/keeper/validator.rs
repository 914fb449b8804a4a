//! Validator table and its indexes
//!
//! Besides the primary record each validator is indexed by consensus address,
//! by power (non-jailed only) and, while eligible, in the whitelist. Every
//! token change goes through [`Keeper::add_validator_tokens_and_shares`],
//! [`Keeper::remove_validator_tokens_and_shares`] or
//! [`Keeper::remove_validator_tokens`], which drop the stale power key,
//! recompute voting power from raw tokens and write the new key back.

use super::Keeper;
use crate::error::{Result, StakingError};
use crate::expected::BankKeeper;
use crate::hooks::StakingHooks;
use crate::math::{Coins, Dec, DecCoins};
use crate::store::keys;
use crate::types::{
    Address, BondStatus, Commission, CommissionRates, ConsAddress, Description, Height,
    LastValidatorPower, PubKey, Timestamp, Validator,
};
use std::collections::BTreeMap;
use tracing::debug;

impl<B: BankKeeper + Clone> Keeper<B> {
    pub fn get_validator(&self, addr: &Address) -> Result<Option<Validator>> {
        self.store.get(&keys::validator_key(addr))
    }

    /// Like [`Keeper::get_validator`] but absence is an error
    pub fn validator(&self, addr: &Address) -> Result<Validator> {
        self.get_validator(addr)?
            .ok_or_else(|| StakingError::NoValidatorFound(addr.to_string()))
    }

    pub fn get_validator_by_cons_addr(&self, cons: &ConsAddress) -> Result<Option<Validator>> {
        let operator: Option<Address> = self.store.get(&keys::validator_by_cons_addr_key(cons))?;
        match operator {
            Some(operator) => self.get_validator(&operator),
            None => Ok(None),
        }
    }

    pub fn validator_by_cons_addr(&self, cons: &ConsAddress) -> Result<Validator> {
        self.get_validator_by_cons_addr(cons)?
            .ok_or_else(|| StakingError::NoValidatorFound(cons.to_string()))
    }

    pub(crate) fn set_validator(&mut self, validator: &Validator) -> Result<()> {
        self.store.set(keys::validator_key(&validator.operator), validator)
    }

    pub(crate) fn set_validator_by_cons_addr(&mut self, validator: &Validator) -> Result<()> {
        self.store.set(
            keys::validator_by_cons_addr_key(&validator.cons_address()),
            &validator.operator,
        )
    }

    /// Jailed validators are never kept in the power index
    pub(crate) fn set_validator_by_power_index(&mut self, validator: &Validator) {
        if validator.jailed {
            return;
        }
        self.store.set_raw(
            keys::validator_by_power_index_key(
                validator.potential_consensus_power(),
                &validator.operator,
            ),
            Vec::new(),
        );
    }

    pub(crate) fn delete_validator_by_power_index(&mut self, validator: &Validator) {
        self.store.delete(&keys::validator_by_power_index_key(
            validator.potential_consensus_power(),
            &validator.operator,
        ));
    }

    pub fn is_whitelisted(&self, addr: &Address) -> bool {
        self.store.has(&keys::whitelist_key(addr))
    }

    /// Validators whose power is recomputed every block, by address
    pub fn whitelisted_validators(&self) -> Vec<Address> {
        let prefix = [keys::WHITELIST_KEY];
        self.store
            .prefix_iter(&prefix)
            .filter_map(|(k, _)| keys::parse_single_address_key(keys::WHITELIST_KEY, k))
            .collect()
    }

    /// Adds or drops the validator from the whitelist depending on its
    /// current power and jail state
    pub(crate) fn update_whitelist(&mut self, validator: &Validator) -> Result<()> {
        let min_voting_power = self.params()?.min_voting_power;
        let key = keys::whitelist_key(&validator.operator);
        if !validator.jailed && validator.voting_power >= min_voting_power {
            self.store.set_raw(key, Vec::new());
        } else {
            self.store.delete(&key);
        }
        Ok(())
    }

    /// Recomputes voting power from raw tokens under the current weights
    pub(crate) fn refresh_voting_power(&self, validator: &mut Validator) -> Result<()> {
        let (power, powers) = self.voting_power(&validator.tokens)?;
        validator.set_voting_power(power, powers);
        Ok(())
    }

    /// Writes a validator whose tokens changed: fresh voting power, power
    /// index and whitelist membership
    fn store_reweighted_validator(&mut self, mut validator: Validator) -> Result<Validator> {
        self.refresh_voting_power(&mut validator)?;
        self.set_validator(&validator)?;
        self.set_validator_by_power_index(&validator);
        self.update_whitelist(&validator)?;
        Ok(validator)
    }

    pub(crate) fn add_validator_tokens_and_shares(
        &mut self,
        mut validator: Validator,
        tokens: &Coins,
    ) -> Result<(Validator, DecCoins)> {
        self.delete_validator_by_power_index(&validator);
        let issued = validator.add_tokens_from_del(tokens);
        let validator = self.store_reweighted_validator(validator)?;
        Ok((validator, issued))
    }

    pub(crate) fn remove_validator_tokens_and_shares(
        &mut self,
        mut validator: Validator,
        shares: &DecCoins,
    ) -> Result<(Validator, Coins)> {
        self.delete_validator_by_power_index(&validator);
        let removed = validator.remove_del_shares(shares)?;
        let validator = self.store_reweighted_validator(validator)?;
        Ok((validator, removed))
    }

    pub(crate) fn remove_validator_tokens(
        &mut self,
        mut validator: Validator,
        tokens: &Coins,
    ) -> Result<Validator> {
        self.delete_validator_by_power_index(&validator);
        validator.remove_tokens(tokens)?;
        self.store_reweighted_validator(validator)
    }

    /// Deletes a validator and all its indexes. Only allowed once it is
    /// unbonded and holds no tokens.
    pub(crate) fn remove_validator(&mut self, addr: &Address) -> Result<()> {
        let validator = match self.get_validator(addr)? {
            Some(v) => v,
            None => return Ok(()),
        };

        if !validator.is_unbonded() {
            return Err(StakingError::invariant(format!(
                "cannot remove validator {} with status {:?}",
                addr, validator.status
            )));
        }
        if !validator.tokens.is_zero() {
            return Err(StakingError::invariant(format!(
                "attempting to remove validator {} that still has tokens {}",
                addr, validator.tokens
            )));
        }

        let cons = validator.cons_address();
        self.store.delete(&keys::validator_key(addr));
        self.store.delete(&keys::validator_by_cons_addr_key(&cons));
        self.delete_validator_by_power_index(&validator);
        self.store.delete(&keys::whitelist_key(addr));

        debug!(validator = %addr, "validator removed");
        self.hooks().after_validator_removed(&cons, addr)?;
        Ok(())
    }

    pub fn all_validators(&self) -> Result<Vec<Validator>> {
        self.store.prefix_values(&[keys::VALIDATORS_KEY])
    }

    /// Operators in the power index, highest power first, ties by ascending
    /// address
    pub fn validators_by_power(&self) -> Vec<Address> {
        let prefix = [keys::VALIDATORS_BY_POWER_INDEX_KEY];
        self.store
            .prefix_iter_rev(&prefix)
            .filter_map(|(k, _)| keys::parse_validator_power_index_key(k))
            .map(|(_, addr)| addr)
            .collect()
    }

    /// Bonded validators in power order, at most `max_validators`
    pub fn bonded_validators_by_power(&self) -> Result<Vec<Validator>> {
        let max = self.params()?.max_validators as usize;
        let mut bonded = Vec::new();
        for addr in self.validators_by_power() {
            if bonded.len() >= max {
                break;
            }
            let validator = self.validator(&addr)?;
            if validator.is_bonded() {
                bonded.push(validator);
            }
        }
        Ok(bonded)
    }

    pub fn last_validator_power(&self, addr: &Address) -> Result<i64> {
        Ok(self
            .store
            .get(&keys::last_validator_power_key(addr))?
            .unwrap_or(0))
    }

    pub(crate) fn set_last_validator_power(&mut self, addr: &Address, power: i64) -> Result<()> {
        self.store.set(keys::last_validator_power_key(addr), &power)
    }

    pub(crate) fn delete_last_validator_power(&mut self, addr: &Address) {
        self.store.delete(&keys::last_validator_power_key(addr));
    }

    /// Last broadcast validator set, ordered by address
    pub fn last_validator_powers(&self) -> Result<Vec<LastValidatorPower>> {
        let prefix = [keys::LAST_VALIDATOR_POWER_KEY];
        self.store
            .prefix_iter(&prefix)
            .map(|(k, v)| {
                let address = keys::parse_single_address_key(keys::LAST_VALIDATOR_POWER_KEY, k)
                    .ok_or_else(|| StakingError::invariant("malformed last power key"))?;
                let power = crate::store::decode(v)?;
                Ok(LastValidatorPower { address, power })
            })
            .collect()
    }

    pub(crate) fn last_validators_by_addr(&self) -> Result<BTreeMap<Address, i64>> {
        Ok(self
            .last_validator_powers()?
            .into_iter()
            .map(|lv| (lv.address, lv.power))
            .collect())
    }

    pub fn last_total_power(&self) -> Result<i64> {
        Ok(self.store.get(&keys::last_total_power_key())?.unwrap_or(0))
    }

    pub(crate) fn set_last_total_power(&mut self, power: i64) -> Result<()> {
        self.store.set(keys::last_total_power_key(), &power)
    }

    // validator unbonding queue

    pub(crate) fn validator_queue(&self, time: Timestamp, height: Height) -> Result<Vec<Address>> {
        Ok(self
            .store
            .get(&keys::validator_queue_key(time, height))?
            .unwrap_or_default())
    }

    fn set_validator_queue(&mut self, time: Timestamp, height: Height, addrs: &[Address]) -> Result<()> {
        let key = keys::validator_queue_key(time, height);
        if addrs.is_empty() {
            self.store.delete(&key);
            Ok(())
        } else {
            self.store.set(key, &addrs)
        }
    }

    pub(crate) fn insert_unbonding_validator_queue(&mut self, validator: &Validator) -> Result<()> {
        let mut addrs = self.validator_queue(validator.unbonding_time, validator.unbonding_height)?;
        if !addrs.contains(&validator.operator) {
            addrs.push(validator.operator);
        }
        self.set_validator_queue(validator.unbonding_time, validator.unbonding_height, &addrs)
    }

    pub(crate) fn delete_validator_queue(&mut self, validator: &Validator) -> Result<()> {
        let mut addrs = self.validator_queue(validator.unbonding_time, validator.unbonding_height)?;
        addrs.retain(|a| *a != validator.operator);
        self.set_validator_queue(validator.unbonding_time, validator.unbonding_height, &addrs)
    }

    // creation and editing

    /// Registers a new validator and self-delegates `value` from the
    /// operator's balance
    pub fn create_validator(
        &mut self,
        operator: Address,
        pubkey: PubKey,
        description: Description,
        rates: CommissionRates,
        value: Coins,
    ) -> Result<Validator> {
        let params = self.params()?;
        if rates.rate < params.min_commission_rate {
            return Err(StakingError::CommissionLtMinRate {
                rate: rates.rate.to_string(),
                min: params.min_commission_rate.to_string(),
            });
        }
        if self.get_validator(&operator)?.is_some() {
            return Err(StakingError::ValidatorOwnerExists);
        }
        if self.get_validator_by_cons_addr(&pubkey.address())?.is_some() {
            return Err(StakingError::ValidatorPubKeyExists);
        }
        self.ensure_bond_denoms(&value)?;
        description.ensure_length()?;
        rates.validate()?;

        let commission = Commission::new(rates, self.block_time());
        let validator = Validator::new(operator, pubkey, description, commission);
        self.set_validator(&validator)?;
        self.set_validator_by_cons_addr(&validator)?;
        self.set_validator_by_power_index(&validator);
        self.hooks().after_validator_created(&operator)?;

        self.delegate(&operator, &value, BondStatus::Unbonded, validator, true)?;
        debug!(validator = %operator, value = %value, "validator created");
        self.validator(&operator)
    }

    /// Updates description fields and optionally the commission rate
    pub fn edit_validator(
        &mut self,
        operator: &Address,
        description: &Description,
        new_rate: Option<Dec>,
    ) -> Result<Validator> {
        let mut validator = self.validator(operator)?;
        validator.description = validator.description.update(description)?;

        if let Some(rate) = new_rate {
            let commission = self.update_validator_commission(&validator, rate)?;
            self.hooks().before_validator_modified(operator)?;
            validator.commission = commission;
        }

        self.set_validator(&validator)?;
        Ok(validator)
    }

    pub(crate) fn update_validator_commission(
        &self,
        validator: &Validator,
        new_rate: Dec,
    ) -> Result<Commission> {
        let block_time = self.block_time();
        validator.commission.validate_new_rate(&new_rate, block_time)?;

        let min = self.params()?.min_commission_rate;
        if new_rate < min {
            return Err(StakingError::CommissionLtMinRate {
                rate: new_rate.to_string(),
                min: min.to_string(),
            });
        }

        let mut commission = validator.commission.clone();
        commission.rates.rate = new_rate;
        commission.update_time = block_time;
        Ok(commission)
    }

    /// Every denomination of `amount` must be an accepted bond denomination
    pub(crate) fn ensure_bond_denoms(&self, amount: &Coins) -> Result<()> {
        let params = self.params()?;
        for denom in amount.denoms() {
            if !params.is_bond_denom(denom) {
                return Err(StakingError::BondDenomNotAllowed {
                    got: denom.to_string(),
                    expected: params.bond_denoms.clone(),
                });
            }
        }
        Ok(())
    }
}
