//! Delegation lifecycle
//!
//! ```text
//!  delegate ──▶ Delegation ──undelegate──▶ UnbondingDelegation ──mature──▶ account
//!                   │                            │
//!                   │                            └── cancel ──▶ Delegation
//!                   └── begin_redelegation ──▶ Delegation (dst) + Redelegation
//! ```
//!
//! Token movement between the pools follows the validator's bonding status:
//! tokens of bonded validators live in the bonded pool, everything else in
//! the not-bonded pool.

use super::pool::{bonded_pool_address, not_bonded_pool_address};
use super::Keeper;
use crate::error::{Result, StakingError};
use crate::expected::BankKeeper;
use crate::hooks::StakingHooks;
use crate::math::{Coins, Dec, DecCoin, DecCoins};
use crate::types::{Address, BondStatus, Delegation, Height, Timestamp, Validator, POWER_REDUCTION};
use tracing::{debug, error};

impl<B: BankKeeper + Clone> Keeper<B> {
    /// Adds `amount` to the delegator's stake in `validator` and returns the
    /// shares issued.
    ///
    /// With `subtract_account` the tokens come out of the delegator's
    /// balance; `token_src` must then not be `Bonded`. Otherwise the tokens
    /// are already held by a pool matching `token_src` and are moved only if
    /// that pool differs from the validator's.
    pub fn delegate(
        &mut self,
        delegator: &Address,
        amount: &Coins,
        token_src: BondStatus,
        validator: Validator,
        subtract_account: bool,
    ) -> Result<DecCoins> {
        if validator.invalid_ex_rate() {
            return Err(StakingError::DelegatorShareExRateInvalid);
        }

        let mut delegation = match self.get_delegation(delegator, &validator.operator)? {
            Some(delegation) => {
                self.hooks()
                    .before_delegation_shares_modified(delegator, &validator.operator)?;
                delegation
            }
            None => {
                self.hooks()
                    .before_delegation_created(delegator, &validator.operator)?;
                Delegation::new(*delegator, validator.operator, DecCoins::empty())
            }
        };

        if subtract_account {
            if token_src == BondStatus::Bonded {
                return Err(StakingError::invariant(
                    "delegation token source cannot be bonded",
                ));
            }
            let pool = if validator.is_bonded() {
                bonded_pool_address()
            } else {
                not_bonded_pool_address()
            };
            self.bank.send_coins(delegator, &pool, amount)?;
        } else {
            let src_bonded = token_src == BondStatus::Bonded;
            match (src_bonded, validator.is_bonded()) {
                (true, true) | (false, false) => {}
                (false, true) => self.not_bonded_tokens_to_bonded(amount)?,
                (true, false) => self.bonded_tokens_to_not_bonded(amount)?,
            }
        }

        let (validator, issued) = self.add_validator_tokens_and_shares(validator, amount)?;
        delegation.shares = delegation.shares.add(&issued);
        self.set_delegation(&delegation)?;
        self.hooks()
            .after_delegation_modified(delegator, &validator.operator)?;
        Ok(issued)
    }

    /// Removes `shares` from the delegation and returns the tokens they were
    /// worth. Tokens stay in whichever pool held them.
    pub fn unbond(&mut self, delegator: &Address, val_addr: &Address, shares: &DecCoins) -> Result<Coins> {
        let mut delegation = self.delegation(delegator, val_addr)?;
        self.hooks()
            .before_delegation_shares_modified(delegator, val_addr)?;

        let remaining = delegation
            .shares
            .checked_sub(shares)
            .ok_or(StakingError::NotEnoughDelegationShares)?;

        let mut validator = self.validator(val_addr)?;
        delegation.shares = remaining;

        // an operator whose remaining self-stake is worth less than one unit
        // of consensus power gets jailed
        if *delegator == validator.operator && !validator.jailed {
            let (self_tokens, _) = validator.tokens_from_shares(&delegation.shares).truncate_decimal();
            let (power, _) = self.voting_power(&self_tokens)?;
            if power < POWER_REDUCTION {
                self.jail_validator(&mut validator)?;
            }
        }

        if delegation.shares.is_zero() {
            self.remove_delegation(&delegation)?;
        } else {
            self.set_delegation(&delegation)?;
            self.hooks()
                .after_delegation_modified(delegator, &validator.operator)?;
        }

        let (validator, amount) = self.remove_validator_tokens_and_shares(validator, shares)?;
        if validator.delegator_shares.is_zero() && validator.is_unbonded() {
            self.remove_validator(&validator.operator)?;
        }
        Ok(amount)
    }

    /// Unbonds `shares` and queues the tokens for release after the
    /// unbonding period. Returns the completion time and the amount.
    pub fn undelegate(
        &mut self,
        delegator: &Address,
        val_addr: &Address,
        shares: &DecCoins,
    ) -> Result<(Timestamp, Coins)> {
        let validator = self.validator(val_addr)?;
        if self.has_max_unbonding_delegation_entries(delegator, val_addr)? {
            return Err(StakingError::MaxUnbondingDelegationEntries);
        }

        let amount = self.unbond(delegator, val_addr, shares)?;
        if validator.is_bonded() {
            self.bonded_tokens_to_not_bonded(&amount)?;
        }

        let completion_time = self.unbonding_completion_time()?;
        let ubd = self.set_unbonding_delegation_entry(
            delegator,
            val_addr,
            self.block_height(),
            completion_time,
            amount.clone(),
        )?;
        self.insert_ubd_queue(&ubd, completion_time)?;
        debug!(delegator = %delegator, validator = %val_addr, amount = %amount, "undelegated");
        Ok((completion_time, amount))
    }

    /// Releases every mature, non-held entry of the unbonding delegation to
    /// the delegator and returns the total paid out
    pub fn complete_unbonding(&mut self, delegator: &Address, val_addr: &Address) -> Result<Coins> {
        let mut ubd = self.unbonding_delegation(delegator, val_addr)?;
        let now = self.block_time();
        let mut balances = Coins::empty();

        let mut i = 0;
        while i < ubd.entries.len() {
            let entry = &ubd.entries[i];
            if !(entry.is_mature(now) && !entry.on_hold()) {
                i += 1;
                continue;
            }
            let entry = ubd.entries.remove(i);
            self.delete_unbonding_index(entry.unbonding_id);

            if !entry.balance.is_zero() {
                self.bank
                    .send_coins(&not_bonded_pool_address(), delegator, &entry.balance)?;
                balances = balances.add(&entry.balance);
            }
        }

        self.store_or_remove_unbonding_delegation(&ubd)?;
        Ok(balances)
    }

    /// Moves `shares` from `src` to `dst` without passing through the
    /// delegator's balance. Returns the completion time after which the
    /// moved stake stops being slashable at `src`.
    pub fn begin_redelegation(
        &mut self,
        delegator: &Address,
        src: &Address,
        dst: &Address,
        shares: &DecCoins,
    ) -> Result<Timestamp> {
        if src == dst {
            return Err(StakingError::SelfRedelegation);
        }
        let dst_validator = self.validator(dst)?;
        let src_validator = self.validator(src)?;

        // stake that arrived by redelegation cannot move on until it matures
        if self.has_receiving_redelegation(delegator, src) {
            return Err(StakingError::TransitiveRedelegation);
        }
        if self.has_max_redelegation_entries(delegator, src, dst)? {
            return Err(StakingError::MaxRedelegationEntries);
        }

        let amount = self.unbond(delegator, src, shares)?;
        if amount.is_zero() {
            return Err(StakingError::TinyRedelegationAmount);
        }

        let shares_created = self.delegate(delegator, &amount, src_validator.status, dst_validator, false)?;

        let (completion_time, height, complete_now) = self.begin_info(src)?;
        if complete_now {
            return Ok(completion_time);
        }

        let red = self.set_redelegation_entry(
            delegator,
            src,
            dst,
            height,
            completion_time,
            amount,
            shares_created,
        )?;
        self.insert_redelegation_queue(&red, completion_time)?;
        Ok(completion_time)
    }

    /// Completion time and height for stake leaving `src`, and whether it is
    /// free immediately
    fn begin_info(&self, src: &Address) -> Result<(Timestamp, Height, bool)> {
        Ok(match self.get_validator(src)? {
            Some(v) if v.is_unbonding() => (v.unbonding_time, v.unbonding_height, false),
            Some(v) if v.is_unbonded() => (self.block_time(), self.block_height(), true),
            _ => (self.unbonding_completion_time()?, self.block_height(), false),
        })
    }

    /// Drops every mature, non-held redelegation entry. No tokens move: they
    /// already live at the destination. Returns the released initial
    /// balances.
    pub fn complete_redelegation(&mut self, delegator: &Address, src: &Address, dst: &Address) -> Result<Coins> {
        let mut red = self.redelegation(delegator, src, dst)?;
        let now = self.block_time();
        let mut balances = Coins::empty();

        let mut i = 0;
        while i < red.entries.len() {
            let entry = &red.entries[i];
            if !(entry.is_mature(now) && !entry.on_hold()) {
                i += 1;
                continue;
            }
            let entry = red.entries.remove(i);
            self.delete_unbonding_index(entry.unbonding_id);
            balances = balances.add(&entry.initial_balance);
        }

        self.store_or_remove_redelegation(&red)?;
        Ok(balances)
    }

    /// Puts `amount` of the not-yet-mature unbonding entry created at
    /// `creation_height` back into the validator
    pub fn cancel_unbonding_delegation(
        &mut self,
        delegator: &Address,
        val_addr: &Address,
        amount: &Coins,
        creation_height: Height,
    ) -> Result<DecCoins> {
        let validator = self.validator(val_addr)?;
        if validator.invalid_ex_rate() {
            return Err(StakingError::DelegatorShareExRateInvalid);
        }
        if validator.jailed {
            return Err(StakingError::ValidatorJailed);
        }

        let mut ubd = self.unbonding_delegation(delegator, val_addr)?;
        let now = self.block_time();
        let index = ubd
            .entries
            .iter()
            .position(|e| e.creation_height == creation_height && e.completion_time > now)
            .ok_or_else(|| {
                StakingError::InvalidRequest(format!(
                    "unbonding delegation entry is not found at block height {}",
                    creation_height
                ))
            })?;

        let remaining = ubd.entries[index]
            .balance
            .checked_sub(amount)
            .ok_or_else(|| {
                StakingError::InvalidRequest(
                    "amount is greater than the unbonding delegation entry balance".into(),
                )
            })?;

        let shares = self.delegate(delegator, amount, BondStatus::Unbonding, validator, false)?;

        if remaining.is_zero() {
            let entry = ubd.entries.remove(index);
            self.delete_unbonding_index(entry.unbonding_id);
        } else {
            let entry = &mut ubd.entries[index];
            entry.balance = remaining;
            entry.initial_balance = entry.initial_balance.saturating_sub(amount);
        }

        self.store_or_remove_unbonding_delegation(&ubd)?;
        Ok(shares)
    }

    /// Converts a token amount into the shares to unbond, capped at what the
    /// delegation holds
    pub fn validate_unbond_amount(
        &self,
        delegator: &Address,
        val_addr: &Address,
        amount: &Coins,
    ) -> Result<DecCoins> {
        let validator = self.validator(val_addr)?;
        let delegation = self.delegation(delegator, val_addr)?;

        let mut out = Vec::with_capacity(amount.len());
        for coin in amount {
            let tokens = validator.tokens.amount_of(&coin.denom);
            if tokens == 0 {
                return Err(StakingError::InsufficientShares);
            }
            let total = validator.delegator_shares.amount_of(&coin.denom);
            let held = delegation.shares.amount_of(&coin.denom);

            let shares = total.mul_int(coin.amount).quo(&Dec::from_int(tokens));
            let truncated = total.mul_int(coin.amount).quo_int(tokens);
            if truncated > held {
                return Err(StakingError::BadSharesAmount);
            }
            // rounding may push the shares past the holding; cap so a full
            // withdrawal stays possible
            out.push(DecCoin::new(coin.denom.clone(), shares.min(held)));
        }
        Ok(DecCoins::new(out))
    }

    /// Drains both maturity queues for the current block time. A failing
    /// completion is logged and skipped; invariant violations abort.
    /// Records already gone (fully cancelled, or released early) are
    /// skipped quietly.
    pub(crate) fn complete_mature_queues(&mut self) -> Result<()> {
        let now = self.block_time();

        for pair in self.dequeue_all_mature_ubd_queue(now)? {
            let result = self.transact(|k| k.complete_unbonding(&pair.delegator, &pair.validator));
            match result {
                Ok(balances) if !balances.is_zero() => {
                    debug!(delegator = %pair.delegator, validator = %pair.validator, amount = %balances, "unbonding completed");
                }
                Ok(_) => {}
                Err(StakingError::NoUnbondingDelegation) => {
                    debug!(delegator = %pair.delegator, validator = %pair.validator, "unbonding delegation already removed");
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(delegator = %pair.delegator, validator = %pair.validator, error = %e, "failed to complete unbonding");
                }
            }
        }

        // no ledger movement here, so there is nothing to roll back on a
        // non-fatal failure
        for triplet in self.dequeue_all_mature_redelegation_queue(now)? {
            let result =
                self.complete_redelegation(&triplet.delegator, &triplet.validator_src, &triplet.validator_dst);
            match result {
                Ok(_) => {}
                Err(StakingError::NoRedelegation) => {
                    debug!(
                        delegator = %triplet.delegator,
                        src = %triplet.validator_src,
                        dst = %triplet.validator_dst,
                        "redelegation already removed"
                    );
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(
                        delegator = %triplet.delegator,
                        src = %triplet.validator_src,
                        dst = %triplet.validator_dst,
                        error = %e,
                        "failed to complete redelegation"
                    );
                }
            }
        }
        Ok(())
    }
}
