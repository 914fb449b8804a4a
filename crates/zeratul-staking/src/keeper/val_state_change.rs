//! Per-block validator-set reconciliation
//!
//! ```text
//!            bond                       begin unbonding
//! Unbonded ───────▶ Bonded ◀──────────────────────────▶ Unbonding
//!    ▲                          rebond                      │
//!    └──────────────────────────────────────────────────────┘
//!                       unbonding period elapsed, no holds
//! ```
//!
//! At the end of every block:
//!
//! 1. whitelisted validators get their voting power recomputed
//! 2. the top `max_validators` by power are bonded; changed powers and
//!    departures (power 0) are reported to consensus
//! 3. validators whose unbonding matured become unbonded
//! 4. mature unbonding delegations and redelegations complete

use super::Keeper;
use crate::error::{Result, StakingError};
use crate::expected::BankKeeper;
use crate::hooks::StakingHooks;
use crate::math::Coins;
use crate::store::keys;
use crate::types::{BondStatus, ConsAddress, UnbondingType, Validator, ValidatorUpdate};
use tracing::{debug, info};

impl<B: BankKeeper + Clone> Keeper<B> {
    /// Per-block entry point for the consensus driver. Returns the validator
    /// updates to apply.
    pub fn end_block(&mut self) -> Result<Vec<ValidatorUpdate>> {
        self.update_voting_powers()?;
        let updates = self.apply_and_return_validator_set_updates()?;
        self.unbond_all_mature_validators()?;
        self.complete_mature_queues()?;
        Ok(updates)
    }

    /// Recomputes voting power of every whitelisted validator. Those that
    /// fall below the minimum leave the whitelist.
    pub(crate) fn update_voting_powers(&mut self) -> Result<()> {
        for addr in self.whitelisted_validators() {
            let mut validator = self.validator(&addr)?;
            self.delete_validator_by_power_index(&validator);
            self.refresh_voting_power(&mut validator)?;
            self.set_validator(&validator)?;
            self.set_validator_by_power_index(&validator);
            self.update_whitelist(&validator)?;
        }
        Ok(())
    }

    /// Walks validators by descending power, bonds the top
    /// `max_validators` and begins unbonding every previously bonded
    /// validator that no longer makes the cut.
    pub fn apply_and_return_validator_set_updates(&mut self) -> Result<Vec<ValidatorUpdate>> {
        let max_validators = self.params()?.max_validators as usize;
        let mut last = self.last_validators_by_addr()?;
        let mut updates = Vec::new();
        let mut total_power: i64 = 0;
        let mut to_bonded = Coins::empty();
        let mut to_not_bonded = Coins::empty();

        let mut count = 0;
        for addr in self.validators_by_power() {
            if count >= max_validators {
                break;
            }
            let mut validator = self.validator(&addr)?;
            if validator.jailed {
                return Err(StakingError::invariant(format!(
                    "jailed validator {} found in the power index",
                    addr
                )));
            }

            // nothing below a zero-power validator can be bonded
            if validator.potential_consensus_power() == 0 {
                break;
            }

            match validator.status {
                BondStatus::Unbonded | BondStatus::Unbonding => {
                    validator = self.bond_validator(validator)?;
                    to_bonded = to_bonded.add(&validator.tokens);
                }
                BondStatus::Bonded => {}
            }

            let new_power = validator.consensus_power();
            if last.get(&addr) != Some(&new_power) {
                updates.push(validator.abci_validator_update());
                self.set_last_validator_power(&addr, new_power)?;
            }

            last.remove(&addr);
            count += 1;
            total_power = total_power.saturating_add(new_power);
        }

        // remaining entries were bonded but fell out, ordered by address
        for addr in last.into_keys() {
            let validator = self.validator(&addr)?;
            let validator = self.begin_unbonding_validator(validator)?;
            to_not_bonded = to_not_bonded.add(&validator.tokens);
            self.delete_last_validator_power(&addr);
            updates.push(validator.abci_validator_update_zero());
        }

        // one net transfer per direction
        let into_bonded = to_bonded.saturating_sub(&to_not_bonded);
        let into_not_bonded = to_not_bonded.saturating_sub(&to_bonded);
        if !into_bonded.is_zero() {
            self.not_bonded_tokens_to_bonded(&into_bonded)?;
        }
        if !into_not_bonded.is_zero() {
            self.bonded_tokens_to_not_bonded(&into_not_bonded)?;
        }

        if !updates.is_empty() {
            self.set_last_total_power(total_power)?;
        }
        Ok(updates)
    }

    fn bond_validator(&mut self, mut validator: Validator) -> Result<Validator> {
        if validator.is_bonded() {
            return Err(StakingError::invariant(format!(
                "validator {} is already bonded",
                validator.operator
            )));
        }
        self.delete_validator_by_power_index(&validator);
        validator.status = BondStatus::Bonded;
        self.set_validator(&validator)?;
        self.set_validator_by_power_index(&validator);
        self.delete_validator_queue(&validator)?;

        debug!(validator = %validator.operator, power = validator.consensus_power(), "validator bonded");
        self.hooks()
            .after_validator_bonded(&validator.cons_address(), &validator.operator)?;
        Ok(validator)
    }

    fn begin_unbonding_validator(&mut self, mut validator: Validator) -> Result<Validator> {
        if !validator.is_bonded() {
            return Err(StakingError::invariant(format!(
                "bad state transition bonded to unbonding, validator {} is {:?}",
                validator.operator, validator.status
            )));
        }
        let unbonding_time = self.unbonding_completion_time()?;
        self.delete_validator_by_power_index(&validator);

        let id = self.increment_unbonding_id()?;
        validator.status = BondStatus::Unbonding;
        validator.unbonding_time = unbonding_time;
        validator.unbonding_height = self.block_height();
        validator.unbonding_ids.push(id);

        self.set_validator(&validator)?;
        self.set_validator_by_power_index(&validator);
        self.insert_unbonding_validator_queue(&validator)?;

        debug!(validator = %validator.operator, completion = validator.unbonding_time, "validator begins unbonding");
        self.hooks()
            .after_validator_begin_unbonding(&validator.cons_address(), &validator.operator)?;
        self.set_unbonding_index(
            id,
            keys::validator_key(&validator.operator),
            UnbondingType::ValidatorUnbonding,
        )?;
        self.hooks().after_unbonding_initiated(id)?;
        Ok(validator)
    }

    /// Finishes an unbonding whose period elapsed and holds are released:
    /// the validator becomes unbonded (or is removed if nothing is delegated
    /// to it) and leaves the queue
    pub(crate) fn complete_validator_unbonding(&mut self, mut validator: Validator) -> Result<()> {
        if !validator.is_unbonding() {
            return Err(StakingError::invariant(format!(
                "unexpected validator {} in unbonding queue; status was {:?}",
                validator.operator, validator.status
            )));
        }
        for id in std::mem::take(&mut validator.unbonding_ids) {
            self.delete_unbonding_index(id);
        }
        self.delete_validator_queue(&validator)?;

        validator.status = BondStatus::Unbonded;
        self.set_validator(&validator)?;
        debug!(validator = %validator.operator, "validator unbonded");

        if validator.delegator_shares.is_zero() {
            self.remove_validator(&validator.operator)?;
        }
        Ok(())
    }

    /// Completes every queued validator unbonding that has reached both its
    /// time and height and carries no holds
    pub(crate) fn unbond_all_mature_validators(&mut self) -> Result<()> {
        let now = self.block_time();
        let height = self.block_height();
        let prefix = [keys::VALIDATOR_QUEUE_KEY];
        let end = keys::validator_queue_key(now, height);

        let mut due = Vec::new();
        for (key, value) in self.store.range_until(&prefix, &end) {
            let (time, unbonding_height) = keys::parse_validator_queue_key(key)
                .ok_or_else(|| StakingError::invariant("malformed validator queue key"))?;
            if time <= now && unbonding_height <= height {
                due.extend(crate::store::decode::<Vec<crate::types::Address>>(value)?);
            }
        }

        for addr in due {
            let validator = self.get_validator(&addr)?.ok_or_else(|| {
                StakingError::invariant(format!("validator {} in the unbonding queue was not found", addr))
            })?;
            if !validator.is_unbonding() {
                return Err(StakingError::invariant(format!(
                    "unexpected validator {} in unbonding queue; status was {:?}",
                    addr, validator.status
                )));
            }
            if validator.unbonding_on_hold_ref_count == 0 {
                self.complete_validator_unbonding(validator)?;
            }
        }
        Ok(())
    }

    /// Jails the validator with the given consensus address. It leaves the
    /// active set at the next reconciliation.
    pub fn jail(&mut self, cons: &ConsAddress) -> Result<()> {
        let mut validator = self.validator_by_cons_addr(cons)?;
        self.jail_validator(&mut validator)?;
        info!(validator = %validator.operator, cons = %cons, "validator jailed");
        Ok(())
    }

    pub fn unjail(&mut self, cons: &ConsAddress) -> Result<()> {
        let mut validator = self.validator_by_cons_addr(cons)?;
        self.unjail_validator(&mut validator)?;
        info!(validator = %validator.operator, cons = %cons, "validator unjailed");
        Ok(())
    }

    pub(crate) fn jail_validator(&mut self, validator: &mut Validator) -> Result<()> {
        if validator.jailed {
            return Err(StakingError::invariant(format!(
                "cannot jail already jailed validator {}",
                validator.operator
            )));
        }
        self.delete_validator_by_power_index(validator);
        validator.jailed = true;
        self.set_validator(validator)?;
        self.update_whitelist(validator)
    }

    pub(crate) fn unjail_validator(&mut self, validator: &mut Validator) -> Result<()> {
        if !validator.jailed {
            return Err(StakingError::invariant(format!(
                "cannot unjail already unjailed validator {}",
                validator.operator
            )));
        }
        validator.jailed = false;
        self.refresh_voting_power(validator)?;
        self.set_validator(validator)?;
        self.set_validator_by_power_index(validator);
        self.update_whitelist(validator)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use crate::expected::BankKeeper;
    use crate::math::{Dec, DecCoins};
    use crate::types::BlockInfo;

    fn next_block(keeper: &mut crate::keeper::Keeper<crate::memory::MemoryBank>, dt: u64) {
        let block = keeper.block();
        keeper.set_block(BlockInfo { height: block.height + 1, time: block.time + dt });
    }

    #[test]
    fn test_bonds_top_validators_and_moves_pool() {
        let mut keeper = keeper();
        let a = create_validator(&mut keeper, "a", 1, 3_000_000);
        let b = create_validator(&mut keeper, "b", 2, 2_000_000);
        let c = create_validator(&mut keeper, "c", 3, 1_000_000);

        let updates = keeper.end_block().unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].pub_key, a.consensus_pubkey);
        assert_eq!(updates[0].power, 3);
        assert_eq!(updates[1].pub_key, b.consensus_pubkey);
        assert_eq!(updates[1].power, 2);

        assert!(keeper.validator(&a.operator).unwrap().is_bonded());
        assert!(keeper.validator(&c.operator).unwrap().is_unbonded());
        assert_eq!(keeper.bonded_pool_balance(), stake(5_000_000));
        assert_eq!(keeper.not_bonded_pool_balance(), stake(1_000_000));
        assert_eq!(keeper.last_total_power().unwrap(), 5);

        // nothing changed: no updates
        next_block(&mut keeper, 1);
        assert!(keeper.end_block().unwrap().is_empty());
    }

    #[test]
    fn test_displaced_validator_gets_zero_power_update() {
        let mut keeper = keeper();
        let a = create_validator(&mut keeper, "a", 1, 3_000_000);
        let b = create_validator(&mut keeper, "b", 2, 2_000_000);
        keeper.end_block().unwrap();

        next_block(&mut keeper, 1);
        let c = create_validator(&mut keeper, "c", 3, 4_000_000);
        let updates = keeper.end_block().unwrap();

        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].pub_key, c.consensus_pubkey);
        assert_eq!(updates[0].power, 4);
        assert_eq!(updates[1].pub_key, b.consensus_pubkey);
        assert_eq!(updates[1].power, 0);

        let b = keeper.validator(&b.operator).unwrap();
        assert!(b.is_unbonding());
        assert_eq!(b.unbonding_time, keeper.block_time() + 100_000);
        assert!(keeper.validator(&a.operator).unwrap().is_bonded());

        // c entered with 4M, b left with 2M: one net transfer of 2M
        assert_eq!(keeper.bonded_pool_balance(), stake(7_000_000));
        assert_eq!(keeper.not_bonded_pool_balance(), stake(2_000_000));

        // after the unbonding period b becomes unbonded
        let block = keeper.block();
        keeper.set_block(BlockInfo { height: block.height + 1, time: b.unbonding_time });
        keeper.end_block().unwrap();
        assert!(keeper.validator(&b.operator).unwrap().is_unbonded());
    }

    #[test]
    fn test_jail_removes_from_active_set() {
        let mut keeper = keeper();
        let a = create_validator(&mut keeper, "a", 1, 3_000_000);
        keeper.end_block().unwrap();

        keeper.jail(&a.cons_address()).unwrap();
        assert!(keeper.jail(&a.cons_address()).unwrap_err().is_fatal());

        next_block(&mut keeper, 1);
        let updates = keeper.end_block().unwrap();
        assert_eq!(updates, vec![a.abci_validator_update_zero()]);

        keeper.unjail(&a.cons_address()).unwrap();
        next_block(&mut keeper, 1);
        let updates = keeper.end_block().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].power, 3);
    }

    #[test]
    fn test_held_validator_unbonding_waits_for_release() {
        let mut keeper = keeper();
        let a = create_validator(&mut keeper, "a", 1, 3_000_000);
        keeper.end_block().unwrap();

        keeper.jail(&a.cons_address()).unwrap();
        next_block(&mut keeper, 1);
        keeper.end_block().unwrap();

        let val = keeper.validator(&a.operator).unwrap();
        let id = val.unbonding_ids[0];
        keeper.put_unbonding_on_hold(id).unwrap();

        let block = keeper.block();
        keeper.set_block(BlockInfo { height: block.height + 1, time: val.unbonding_time });
        keeper.end_block().unwrap();
        assert!(keeper.validator(&a.operator).unwrap().is_unbonding());

        keeper.unbonding_can_complete(id).unwrap();
        let val = keeper.validator(&a.operator).unwrap();
        assert!(val.is_unbonded());
        assert!(val.unbonding_ids.is_empty());
    }

    #[test]
    fn test_weight_change_reorders_whitelisted_validators() {
        let mut keeper = keeper();
        let a = create_validator(&mut keeper, "a", 1, 3_000_000);
        let lp_op = addr("lp");
        keeper.bank_mut().mint(&lp_op, &Coins::single(LP_DENOM, 4_000_000));
        keeper
            .create_validator(
                lp_op,
                pubkey(9),
                crate::types::Description::new("lp"),
                commission().rates,
                Coins::single(LP_DENOM, 4_000_000),
            )
            .unwrap();

        // lp weight 0.5: 2M power against a's 3M
        let updates = keeper.end_block().unwrap();
        assert_eq!(updates[0].pub_key, a.consensus_pubkey);

        keeper.set_weights(Box::new(crate::memory::StaticWeights::new(DecCoins::new([
            crate::math::DecCoin::new(DENOM, Dec::one()),
            crate::math::DecCoin::new(LP_DENOM, Dec::one()),
        ]))));
        next_block(&mut keeper, 1);
        let updates = keeper.end_block().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].power, 4);
        assert_eq!(keeper.validators_by_power()[0], lp_op);
        assert_eq!(keeper.bank().balance(&lp_op, LP_DENOM), 0);
    }
}
