//! Read accessors for handlers, the driver and external consumers

use super::Keeper;
use crate::error::{Result, StakingError};
use crate::expected::BankKeeper;
use crate::math::Coins;
use crate::types::{
    Address, BondStatus, RedelegationEntry, UnbondingDelegationEntry, UnbondingId, UnbondingType,
    Validator,
};
use serde::{Deserialize, Serialize};

/// Balances of the two module accounts
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub bonded_tokens: Coins,
    pub not_bonded_tokens: Coins,
}

/// The operation an unbonding id is bound to
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnbondingEntry {
    Delegation {
        delegator: Address,
        validator: Address,
        entry: UnbondingDelegationEntry,
    },
    Redelegation {
        delegator: Address,
        validator_src: Address,
        validator_dst: Address,
        entry: RedelegationEntry,
    },
    Validator(Validator),
}

impl<B: BankKeeper + Clone> Keeper<B> {
    pub fn pool(&self) -> Pool {
        Pool {
            bonded_tokens: self.bonded_pool_balance(),
            not_bonded_tokens: self.not_bonded_pool_balance(),
        }
    }

    pub fn validators_by_status(&self, status: BondStatus) -> Result<Vec<Validator>> {
        Ok(self
            .all_validators()?
            .into_iter()
            .filter(|v| v.status == status)
            .collect())
    }

    /// Validators the delegator has stake with, by operator address
    pub fn delegator_validators(&self, delegator: &Address) -> Result<Vec<Validator>> {
        self.delegator_delegations(delegator)?
            .iter()
            .map(|d| self.validator(&d.validator))
            .collect()
    }

    /// Resolves an unbonding id to the entry it tracks
    pub fn unbonding_entry(&self, id: UnbondingId) -> Result<UnbondingEntry> {
        match self.unbonding_type(id)? {
            UnbondingType::UnbondingDelegation => {
                let ubd = self.unbonding_delegation_by_unbonding_id(id)?;
                let entry = ubd
                    .entries
                    .into_iter()
                    .find(|e| e.unbonding_id == id)
                    .ok_or(StakingError::NoUnbondingDelegation)?;
                Ok(UnbondingEntry::Delegation {
                    delegator: ubd.delegator,
                    validator: ubd.validator,
                    entry,
                })
            }
            UnbondingType::Redelegation => {
                let red = self.redelegation_by_unbonding_id(id)?;
                let entry = red
                    .entries
                    .into_iter()
                    .find(|e| e.unbonding_id == id)
                    .ok_or(StakingError::NoRedelegation)?;
                Ok(UnbondingEntry::Redelegation {
                    delegator: red.delegator,
                    validator_src: red.validator_src,
                    validator_dst: red.validator_dst,
                    entry,
                })
            }
            UnbondingType::ValidatorUnbonding => {
                Ok(UnbondingEntry::Validator(self.validator_by_unbonding_id(id)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use crate::math::{Dec, DecCoins};

    #[test]
    fn test_unbonding_entry_by_id() {
        let mut keeper = keeper();
        let a = create_validator(&mut keeper, "a", 1, 3_000_000);
        let b = create_validator(&mut keeper, "b", 2, 2_000_000);
        keeper.end_block().unwrap();

        let shares = DecCoins::single(DENOM, Dec::from_int(500_000));
        keeper.undelegate(&a.operator, &a.operator, &shares).unwrap();
        keeper
            .begin_redelegation(&a.operator, &a.operator, &b.operator, &shares)
            .unwrap();

        match keeper.unbonding_entry(1).unwrap() {
            UnbondingEntry::Delegation { delegator, entry, .. } => {
                assert_eq!(delegator, a.operator);
                assert_eq!(entry.balance, stake(500_000));
            }
            other => panic!("unexpected entry {:?}", other),
        }
        assert!(matches!(
            keeper.unbonding_entry(2).unwrap(),
            UnbondingEntry::Redelegation { validator_dst, .. } if validator_dst == b.operator
        ));
        assert_eq!(
            keeper.unbonding_entry(3).unwrap_err(),
            StakingError::UnbondingNotFound(3)
        );
    }

    #[test]
    fn test_pool_and_status_queries() {
        let mut keeper = keeper();
        let a = create_validator(&mut keeper, "a", 1, 3_000_000);
        create_validator(&mut keeper, "b", 2, 2_000_000);
        create_validator(&mut keeper, "c", 3, 1_000_000);
        keeper.end_block().unwrap();

        assert_eq!(
            keeper.pool(),
            Pool {
                bonded_tokens: stake(5_000_000),
                not_bonded_tokens: stake(1_000_000),
            }
        );
        assert_eq!(keeper.validators_by_status(BondStatus::Bonded).unwrap().len(), 2);
        assert_eq!(keeper.validators_by_status(BondStatus::Unbonded).unwrap().len(), 1);
        assert_eq!(
            keeper.delegator_validators(&a.operator).unwrap(),
            vec![keeper.validator(&a.operator).unwrap()]
        );
    }
}
