//! Slashing
//!
//! A slash burns `floor(fraction * tokens)` of every denomination the
//! validator holds. When the infraction lies in the past, stake that left the
//! validator after the infraction is still at risk and is slashed first:
//!
//! - unbonding delegation entries created at or after the infraction height
//! - redelegation entries created at or after the infraction height; those
//!   are recovered at the destination, from a pending unbonding there first
//!   and then from the live delegation
//!
//! Entries that already matured are no longer at risk unless something holds
//! them.

use super::Keeper;
use crate::error::{Result, StakingError};
use crate::expected::BankKeeper;
use crate::hooks::StakingHooks;
use crate::math::{Coins, Dec, DecCoin, DecCoins};
use crate::types::{ConsAddress, Height, Redelegation, UnbondingDelegation};
use tracing::{error, info, warn};

impl<B: BankKeeper + Clone> Keeper<B> {
    /// Slashes the validator behind `cons` for an infraction committed at
    /// `infraction_height`. Returns the tokens burned from the validator
    /// itself.
    pub fn slash(&mut self, cons: &ConsAddress, infraction_height: Height, fraction: &Dec) -> Result<Coins> {
        if fraction.is_negative() || *fraction > Dec::one() {
            return Err(StakingError::InvalidRequest(format!(
                "slash fraction must be within [0, 1], got {}",
                fraction
            )));
        }

        // a validator removed after being slashed to zero cannot be slashed again
        let validator = match self.get_validator_by_cons_addr(cons)? {
            Some(v) => v,
            None => {
                warn!(cons = %cons, "ignored attempt to slash a nonexistent validator");
                return Ok(Coins::empty());
            }
        };

        if validator.is_unbonded() {
            return Err(StakingError::invariant(format!(
                "should not be slashing unbonded validator {}",
                validator.operator
            )));
        }
        let height = self.block_height();
        if infraction_height > height {
            return Err(StakingError::invariant(format!(
                "impossible attempt to slash future infraction at height {} but we are at height {}",
                infraction_height, height
            )));
        }

        let operator = validator.operator;
        if let Err(e) = self.hooks().before_validator_modified(&operator) {
            error!(validator = %operator, error = %e, "before_validator_modified hook failed during slash");
        }

        if infraction_height < height {
            for ubd in self.unbonding_delegations_from_validator(&operator)? {
                self.slash_unbonding_delegation(ubd, infraction_height, fraction)?;
            }
            for red in self.redelegations_from_src_validator(&operator)? {
                self.slash_redelegation(red, infraction_height, fraction)?;
            }
        }

        // redelegation slashing may have touched the validator through unbond
        let validator = self.validator(&operator)?;
        let burn = validator.tokens.mul_dec_truncate(fraction);

        let effective = DecCoins::new(validator.tokens.iter().map(|c| {
            let applied = Dec::from_int(burn.amount_of(&c.denom)).quo_round_up(&Dec::from_int(c.amount));
            DecCoin::new(c.denom.clone(), applied.min(Dec::one()))
        }));
        if let Err(e) = self.hooks().before_validator_slashed(&operator, &effective) {
            error!(validator = %operator, error = %e, "before_validator_slashed hook failed");
        }

        let validator = self.remove_validator_tokens(validator, &burn)?;
        if !burn.is_zero() {
            if validator.is_bonded() {
                self.burn_bonded_tokens(&burn)?;
            } else {
                self.burn_not_bonded_tokens(&burn)?;
            }
        }

        info!(
            validator = %operator,
            fraction = %fraction,
            burned = %burn,
            "validator slashed"
        );
        Ok(burn)
    }

    /// Burns `fraction` of the initial balance of each at-risk entry, never
    /// more than what is left in it. Returns the amount burned.
    pub(crate) fn slash_unbonding_delegation(
        &mut self,
        mut ubd: UnbondingDelegation,
        infraction_height: Height,
        fraction: &Dec,
    ) -> Result<Coins> {
        let now = self.block_time();
        let mut burned = Coins::empty();

        for entry in ubd.entries.iter_mut() {
            if entry.creation_height < infraction_height {
                continue;
            }
            if entry.is_mature(now) && !entry.on_hold() {
                // awaiting completion in the queue, no longer at risk
                continue;
            }

            let slash = entry.initial_balance.mul_dec_truncate(fraction).min(&entry.balance);
            if slash.is_zero() {
                continue;
            }
            entry.balance = entry.balance.saturating_sub(&slash);
            burned = burned.add(&slash);
        }

        if !burned.is_zero() {
            self.set_unbonding_delegation(&ubd)?;
            self.burn_not_bonded_tokens(&burned)?;
        }
        Ok(burned)
    }

    /// Recovers `fraction` of each at-risk redelegation entry at the
    /// destination validator. A pending unbonding of the same delegator at
    /// the destination is drained first, left to right; whatever remains is
    /// taken from the live delegation by unbonding `fraction` of the shares
    /// the entry created. Returns the nominal amount slashed.
    pub(crate) fn slash_redelegation(
        &mut self,
        red: Redelegation,
        infraction_height: Height,
        fraction: &Dec,
    ) -> Result<Coins> {
        let now = self.block_time();
        let delegator = red.delegator;
        let dst = red.validator_dst;

        let mut total_slashed = Coins::empty();
        let mut bonded_burn = Coins::empty();
        let mut not_bonded_burn = Coins::empty();

        for entry in &red.entries {
            if entry.creation_height < infraction_height {
                continue;
            }
            if entry.is_mature(now) && !entry.on_hold() {
                continue;
            }

            let mut slash_amount = entry.initial_balance.mul_dec_truncate(fraction);
            total_slashed = total_slashed.add(&slash_amount);

            if let Some(mut ubd) = self.get_unbonding_delegation(&delegator, &dst)? {
                let mut touched = false;
                for ubd_entry in ubd.entries.iter_mut() {
                    if slash_amount.is_zero() {
                        break;
                    }
                    if ubd_entry.creation_height < infraction_height {
                        continue;
                    }
                    if ubd_entry.is_mature(now) && !ubd_entry.on_hold() {
                        continue;
                    }
                    let taken = slash_amount.min(&ubd_entry.balance);
                    if taken.is_zero() {
                        continue;
                    }
                    ubd_entry.balance = ubd_entry.balance.saturating_sub(&taken);
                    slash_amount = slash_amount.saturating_sub(&taken);
                    not_bonded_burn = not_bonded_burn.add(&taken);
                    touched = true;
                }
                if touched {
                    self.set_unbonding_delegation(&ubd)?;
                }
            }

            if slash_amount.is_zero() {
                continue;
            }

            let delegation = match self.get_delegation(&delegator, &dst)? {
                Some(d) => d,
                // the delegator already moved everything out of dst
                None => continue,
            };
            let shares_to_unbond = entry.shares_dst.mul_dec(fraction).min(&delegation.shares);
            if shares_to_unbond.is_zero() {
                continue;
            }

            let dst_bonded = self.validator(&dst)?.is_bonded();
            let tokens = self.unbond(&delegator, &dst, &shares_to_unbond)?;
            if dst_bonded {
                bonded_burn = bonded_burn.add(&tokens);
            } else {
                not_bonded_burn = not_bonded_burn.add(&tokens);
            }
        }

        if !bonded_burn.is_zero() {
            self.burn_bonded_tokens(&bonded_burn)?;
        }
        if !not_bonded_burn.is_zero() {
            self.burn_not_bonded_tokens(&not_bonded_burn)?;
        }
        Ok(total_slashed)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use crate::types::{BlockInfo, BondStatus};

    #[test]
    fn test_slash_current_height_halves_power() {
        let mut keeper = keeper();
        let a = create_validator(&mut keeper, "a", 1, 10_000_000);
        let updates = keeper.end_block().unwrap();
        assert_eq!(updates[0].power, 10);

        let burned = keeper
            .slash(&a.cons_address(), keeper.block_height(), &Dec::percent(50))
            .unwrap();
        assert_eq!(burned, stake(5_000_000));
        assert_eq!(keeper.bonded_pool_balance(), stake(5_000_000));
        assert_eq!(keeper.bank().burned(), &stake(5_000_000));

        keeper.set_block(BlockInfo { height: 11, time: 1_000_001 });
        let updates = keeper.end_block().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].power, 5);
    }

    #[test]
    fn test_slash_preconditions() {
        let mut keeper = keeper();
        let a = create_validator(&mut keeper, "a", 1, 10_000_000);

        // never bonded
        let err = keeper.slash(&a.cons_address(), 10, &Dec::percent(10)).unwrap_err();
        assert!(err.is_fatal());

        keeper.end_block().unwrap();
        let err = keeper.slash(&a.cons_address(), 11, &Dec::percent(10)).unwrap_err();
        assert!(err.is_fatal());

        let err = keeper.slash(&a.cons_address(), 10, &Dec::percent(110)).unwrap_err();
        assert!(!err.is_fatal());

        // unknown validator: nothing happens
        let burned = keeper.slash(&pubkey(99).address(), 10, &Dec::percent(10)).unwrap();
        assert!(burned.is_zero());
    }

    #[test]
    fn test_slash_reaches_unbonding_delegations() {
        let mut keeper = keeper();
        let a = create_validator(&mut keeper, "a", 1, 10_000_000);
        keeper.end_block().unwrap();

        let del = addr("del");
        keeper.bank_mut().mint(&del, &stake(4_000_000));
        let val = keeper.validator(&a.operator).unwrap();
        keeper
            .delegate(&del, &stake(4_000_000), BondStatus::Unbonded, val, true)
            .unwrap();
        keeper
            .undelegate(&del, &a.operator, &DecCoins::single(DENOM, Dec::from_int(2_000_000)))
            .unwrap();

        keeper.set_block(BlockInfo { height: 12, time: 1_000_002 });
        let burned = keeper.slash(&a.cons_address(), 10, &Dec::percent(10)).unwrap();
        assert_eq!(burned, stake(1_200_000));

        let ubd = keeper.unbonding_delegation(&del, &a.operator).unwrap();
        assert_eq!(ubd.entries[0].balance, stake(1_800_000));
        assert_eq!(ubd.entries[0].initial_balance, stake(2_000_000));
        assert_eq!(keeper.not_bonded_pool_balance(), stake(1_800_000));
        assert_eq!(keeper.bonded_pool_balance(), stake(10_800_000));
        assert_eq!(keeper.bank().burned(), &stake(1_400_000));
    }

    #[test]
    fn test_slash_entries_before_infraction_are_safe() {
        let mut keeper = keeper();
        let a = create_validator(&mut keeper, "a", 1, 10_000_000);
        keeper.end_block().unwrap();

        let del = addr("del");
        keeper.bank_mut().mint(&del, &stake(4_000_000));
        let val = keeper.validator(&a.operator).unwrap();
        keeper
            .delegate(&del, &stake(4_000_000), BondStatus::Unbonded, val, true)
            .unwrap();
        keeper
            .undelegate(&del, &a.operator, &DecCoins::single(DENOM, Dec::from_int(2_000_000)))
            .unwrap();

        keeper.set_block(BlockInfo { height: 12, time: 1_000_002 });
        keeper.slash(&a.cons_address(), 11, &Dec::percent(10)).unwrap();
        let ubd = keeper.unbonding_delegation(&del, &a.operator).unwrap();
        assert_eq!(ubd.entries[0].balance, stake(2_000_000));
    }

    #[test]
    fn test_slash_follows_redelegation_to_destination() {
        let mut keeper = keeper();
        let a = create_validator(&mut keeper, "a", 1, 10_000_000);
        let b = create_validator(&mut keeper, "b", 2, 5_000_000);
        keeper.end_block().unwrap();

        let del = addr("del");
        keeper.bank_mut().mint(&del, &stake(4_000_000));
        let val = keeper.validator(&a.operator).unwrap();
        keeper
            .delegate(&del, &stake(4_000_000), BondStatus::Unbonded, val, true)
            .unwrap();
        keeper
            .begin_redelegation(
                &del,
                &a.operator,
                &b.operator,
                &DecCoins::single(DENOM, Dec::from_int(2_000_000)),
            )
            .unwrap();

        keeper.set_block(BlockInfo { height: 12, time: 1_000_002 });
        let burned = keeper.slash(&a.cons_address(), 10, &Dec::percent(50)).unwrap();
        assert_eq!(burned, stake(6_000_000));

        let delegation = keeper.delegation(&del, &b.operator).unwrap();
        assert_eq!(delegation.shares, DecCoins::single(DENOM, Dec::from_int(1_000_000)));
        assert_eq!(keeper.validator(&b.operator).unwrap().tokens, stake(6_000_000));
        assert_eq!(keeper.bonded_pool_balance(), stake(12_000_000));
    }

    #[test]
    fn test_redelegation_slash_drains_destination_unbonding_first() {
        let mut keeper = keeper();
        let a = create_validator(&mut keeper, "a", 1, 10_000_000);
        let b = create_validator(&mut keeper, "b", 2, 5_000_000);
        keeper.end_block().unwrap();

        let del = addr("del");
        keeper.bank_mut().mint(&del, &stake(4_000_000));
        let val = keeper.validator(&a.operator).unwrap();
        keeper
            .delegate(&del, &stake(4_000_000), BondStatus::Unbonded, val, true)
            .unwrap();
        keeper
            .begin_redelegation(
                &del,
                &a.operator,
                &b.operator,
                &DecCoins::single(DENOM, Dec::from_int(2_000_000)),
            )
            .unwrap();
        // 1.5M of the redelegated stake is already unbonding at b
        keeper
            .undelegate(&del, &b.operator, &DecCoins::single(DENOM, Dec::from_int(1_500_000)))
            .unwrap();

        keeper.set_block(BlockInfo { height: 12, time: 1_000_002 });
        keeper.slash(&a.cons_address(), 10, &Dec::percent(50)).unwrap();

        // 1M owed: all of it comes out of the pending unbonding at b
        let ubd = keeper.unbonding_delegation(&del, &b.operator).unwrap();
        assert_eq!(ubd.entries[0].balance, stake(500_000));
        let delegation = keeper.delegation(&del, &b.operator).unwrap();
        assert_eq!(delegation.shares, DecCoins::single(DENOM, Dec::from_int(500_000)));
    }

    #[test]
    fn test_repeated_past_slash_is_capped_per_entry() {
        let mut keeper = keeper();
        let a = create_validator(&mut keeper, "a", 1, 10_000_000);
        let b = create_validator(&mut keeper, "b", 2, 5_000_000);
        keeper.end_block().unwrap();

        let del = addr("del");
        let shares = |amount| DecCoins::single(DENOM, Dec::from_int(amount));
        keeper.bank_mut().mint(&del, &stake(10_000_000));
        let val = keeper.validator(&a.operator).unwrap();
        keeper
            .delegate(&del, &stake(10_000_000), BondStatus::Unbonded, val, true)
            .unwrap();

        // before the infraction at 11
        keeper.undelegate(&del, &a.operator, &shares(1_000_000)).unwrap();
        keeper
            .begin_redelegation(&del, &a.operator, &b.operator, &shares(1_000_000))
            .unwrap();

        // after it
        keeper.set_block(BlockInfo { height: 12, time: 1_000_002 });
        keeper.undelegate(&del, &a.operator, &shares(2_000_000)).unwrap();
        keeper
            .begin_redelegation(&del, &a.operator, &b.operator, &shares(4_000_000))
            .unwrap();
        assert_eq!(keeper.bonded_pool_balance(), stake(22_000_000));
        assert_eq!(keeper.not_bonded_pool_balance(), stake(3_000_000));

        keeper.set_block(BlockInfo { height: 13, time: 1_000_003 });
        let burned = keeper.slash(&a.cons_address(), 11, &Dec::percent(50)).unwrap();
        assert_eq!(burned, stake(6_000_000));

        let ubd = keeper.unbonding_delegation(&del, &a.operator).unwrap();
        assert_eq!(ubd.entries[0].balance, stake(1_000_000));
        assert_eq!(ubd.entries[1].balance, stake(1_000_000));
        assert_eq!(keeper.delegation(&del, &b.operator).unwrap().shares, shares(3_000_000));
        assert_eq!(keeper.validator(&b.operator).unwrap().tokens, stake(8_000_000));
        assert_eq!(keeper.bonded_pool_balance(), stake(14_000_000));
        assert_eq!(keeper.not_bonded_pool_balance(), stake(2_000_000));
        assert_eq!(keeper.bank().burned(), &stake(9_000_000));

        // 80% of the initial balances is more than what is left in either
        // late entry, so both stop at their remainder
        let burned = keeper.slash(&a.cons_address(), 11, &Dec::percent(80)).unwrap();
        assert_eq!(burned, stake(4_800_000));

        let ubd = keeper.unbonding_delegation(&del, &a.operator).unwrap();
        assert_eq!(ubd.entries[0].balance, stake(1_000_000));
        assert_eq!(ubd.entries[1].balance, Coins::empty());
        assert_eq!(ubd.entries[1].initial_balance, stake(2_000_000));
        assert!(keeper.get_delegation(&del, &b.operator).unwrap().is_none());
        assert_eq!(keeper.validator(&b.operator).unwrap().tokens, stake(5_000_000));
        assert_eq!(keeper.validator(&a.operator).unwrap().tokens, stake(1_200_000));

        let red = keeper.redelegation(&del, &a.operator, &b.operator).unwrap();
        assert_eq!(red.entries.len(), 2);
        assert_eq!(red.entries[1].shares_dst, shares(4_000_000));

        assert_eq!(keeper.bonded_pool_balance(), stake(6_200_000));
        assert_eq!(keeper.not_bonded_pool_balance(), stake(1_000_000));
        assert_eq!(keeper.bank().burned(), &stake(17_800_000));
        assert!(!keeper.all_invariants().unwrap().1);
    }
}
