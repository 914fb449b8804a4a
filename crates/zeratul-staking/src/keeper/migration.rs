//! Moving stake between LP denominations
//!
//! A registered migration says how to turn one LP token into another via an
//! external swap. Migrating a delegation unbonds its slice in the source LP
//! denomination, hands the tokens to the new delegator, swaps them and
//! delegates the output to the same validator. Run it inside
//! [`Keeper::transact`]: any failing step leaves no trace.

use super::pool::{bonded_pool_address, not_bonded_pool_address};
use super::Keeper;
use crate::error::{Result, StakingError};
use crate::expected::BankKeeper;
use crate::math::{Coin, Coins, DecCoins};
use crate::store::keys;
use crate::types::{Address, BondStatus, DelegationMigration};
use tracing::info;

impl<B: BankKeeper + Clone> Keeper<B> {
    fn migration_key(&self, lp_denom_in: &str, lp_denom_out: &str) -> Result<Vec<u8>> {
        let pool_in = self
            .pools
            .pool_id(lp_denom_in)
            .ok_or_else(|| StakingError::PoolNotFound(lp_denom_in.to_string()))?;
        let pool_out = self
            .pools
            .pool_id(lp_denom_out)
            .ok_or_else(|| StakingError::PoolNotFound(lp_denom_out.to_string()))?;
        Ok(keys::delegation_migration_key(pool_in.as_bytes(), pool_out.as_bytes()))
    }

    /// Stores how to convert `lp_denom_in` into `lp_denom_out`. Both must
    /// resolve to a known pool; an existing entry is overwritten.
    pub fn register_migration(&mut self, migration: DelegationMigration) -> Result<()> {
        let key = self.migration_key(&migration.lp_denom_in, &migration.lp_denom_out)?;
        self.store.set(key, &migration)?;
        info!(
            lp_denom_in = %migration.lp_denom_in,
            lp_denom_out = %migration.lp_denom_out,
            "delegation migration registered"
        );
        Ok(())
    }

    pub fn get_migration(&self, lp_denom_in: &str, lp_denom_out: &str) -> Result<Option<DelegationMigration>> {
        let key = match self.migration_key(lp_denom_in, lp_denom_out) {
            Ok(key) => key,
            Err(StakingError::PoolNotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        self.store.get(&key)
    }

    pub fn migration(&self, lp_denom_in: &str, lp_denom_out: &str) -> Result<DelegationMigration> {
        self.get_migration(lp_denom_in, lp_denom_out)?
            .ok_or(StakingError::NoMigration)
    }

    pub fn all_migrations(&self) -> Result<Vec<DelegationMigration>> {
        self.store.prefix_values(&[keys::DELEGATION_MIGRATION_KEY])
    }

    /// Moves the delegator's `lp_denom_in` stake at `val_addr` into
    /// `lp_denom_out`, delegated by `new_delegator`. Returns the amount
    /// delegated after the swap.
    pub fn migrate_delegation(
        &mut self,
        delegator: &Address,
        val_addr: &Address,
        lp_denom_in: &str,
        lp_denom_out: &str,
        new_delegator: &Address,
    ) -> Result<Coin> {
        let delegation = self.delegation(delegator, val_addr)?;
        let validator = self.validator(val_addr)?;
        let migration = self.migration(lp_denom_in, lp_denom_out)?;

        if !self.params()?.is_bond_denom(lp_denom_out) {
            return Err(StakingError::InvalidRequest(format!(
                "{} is not a bond denomination",
                lp_denom_out
            )));
        }

        let shares = delegation.shares.amount_of(lp_denom_in);
        if shares.is_zero() {
            return Err(StakingError::NoSharesToMigrate(lp_denom_in.to_string()));
        }

        let unbonded = self.unbond(delegator, val_addr, &DecCoins::single(lp_denom_in, shares))?;
        let pool = if validator.is_bonded() {
            bonded_pool_address()
        } else {
            not_bonded_pool_address()
        };
        self.bank.send_coins(&pool, new_delegator, &unbonded)?;

        let offer = Coin::new(lp_denom_in, unbonded.amount_of(lp_denom_in));
        let out = self
            .pools
            .convert(&mut self.bank, &migration, new_delegator, &offer)?;

        let validator = self.validator(val_addr)?;
        self.delegate(
            new_delegator,
            &Coins::from(out.clone()),
            BondStatus::Unbonded,
            validator,
            true,
        )?;

        info!(
            delegator = %delegator,
            new_delegator = %new_delegator,
            validator = %val_addr,
            offer = %offer,
            delegated = %out,
            "delegation migrated"
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use crate::math::Dec;
    use crate::memory::MemoryPools;
    use crate::types::Params;

    const LP_V2: &str = "ulpv2";

    fn migration() -> DelegationMigration {
        DelegationMigration {
            lp_denom_in: LP_DENOM.into(),
            lp_denom_out: LP_V2.into(),
            denom_in: "uusdc".into(),
            denom_out: "uusdc".into(),
            swap_contract_address: addr("router"),
            swap_contract_module: "dex".into(),
        }
    }

    fn setup() -> (crate::keeper::Keeper<crate::memory::MemoryBank>, Address) {
        let mut pools = MemoryPools::new();
        pools.add_pool(LP_DENOM, "1");
        let reserve = pools.add_pool(LP_V2, "2");
        pools.set_rate(LP_DENOM, LP_V2, Dec::from_int(2));

        let mut keeper = keeper_with(pools, Vec::new());
        let params = Params {
            bond_denoms: vec![DENOM.into(), LP_DENOM.into(), LP_V2.into()],
            ..keeper.params().unwrap()
        };
        keeper.set_params(&params).unwrap();
        keeper.bank_mut().mint(&reserve, &Coins::single(LP_V2, 1_000_000_000));

        let val = create_validator(&mut keeper, "val", 1, 5_000_000);
        (keeper, val.operator)
    }

    #[test]
    fn test_register_requires_known_pools() {
        let (mut keeper, _) = setup();
        let mut unknown = migration();
        unknown.lp_denom_out = "ughost".into();

        let err = keeper.register_migration(unknown).unwrap_err();
        assert_eq!(err, StakingError::PoolNotFound("ughost".into()));
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidRequest);

        keeper.register_migration(migration()).unwrap();
        assert_eq!(keeper.migration(LP_DENOM, LP_V2).unwrap(), migration());
        assert_eq!(
            keeper.migration(LP_V2, LP_DENOM).unwrap_err(),
            StakingError::NoMigration
        );
    }

    #[test]
    fn test_migrate_delegation_moves_stake() {
        let (mut keeper, val) = setup();
        keeper.register_migration(migration()).unwrap();

        let del = addr("del");
        let new_del = addr("new-del");
        keeper.bank_mut().mint(&del, &Coins::single(LP_DENOM, 3_000_000));
        let validator = keeper.validator(&val).unwrap();
        keeper
            .delegate(&del, &Coins::single(LP_DENOM, 3_000_000), BondStatus::Unbonded, validator, true)
            .unwrap();

        let out = keeper
            .migrate_delegation(&del, &val, LP_DENOM, LP_V2, &new_del)
            .unwrap();
        assert_eq!(out, Coin::new(LP_V2, 6_000_000));

        assert!(keeper.get_delegation(&del, &val).unwrap().is_none());
        let moved = keeper.delegation(&new_del, &val).unwrap();
        assert_eq!(moved.shares.amount_of(LP_V2), Dec::from_int(6_000_000));

        let validator = keeper.validator(&val).unwrap();
        assert_eq!(validator.tokens.amount_of(LP_DENOM), 0);
        assert_eq!(validator.tokens.amount_of(LP_V2), 6_000_000);
    }

    #[test]
    fn test_migrate_without_shares_fails_cleanly() {
        let (mut keeper, val) = setup();
        keeper.register_migration(migration()).unwrap();
        let before = keeper.store().clone();

        let err = keeper
            .transact(|k| k.migrate_delegation(&val, &val, LP_DENOM, LP_V2, &val))
            .unwrap_err();
        assert_eq!(err, StakingError::NoSharesToMigrate(LP_DENOM.into()));
        assert_eq!(keeper.store(), &before);
    }

    #[test]
    fn test_failed_swap_rolls_back_unbond() {
        let mut pools = MemoryPools::new();
        pools.add_pool(LP_DENOM, "1");
        pools.add_pool(LP_V2, "2");
        // no rate: the swap fails after the unbond already happened
        let mut keeper = keeper_with(pools, Vec::new());
        let params = Params {
            bond_denoms: vec![DENOM.into(), LP_DENOM.into(), LP_V2.into()],
            ..keeper.params().unwrap()
        };
        keeper.set_params(&params).unwrap();
        let val = create_validator(&mut keeper, "val", 1, 5_000_000).operator;
        keeper.register_migration(migration()).unwrap();

        let del = addr("del");
        keeper.bank_mut().mint(&del, &Coins::single(LP_DENOM, 3_000_000));
        let validator = keeper.validator(&val).unwrap();
        keeper
            .delegate(&del, &Coins::single(LP_DENOM, 3_000_000), BondStatus::Unbonded, validator, true)
            .unwrap();
        let before = keeper.store().clone();

        let err = keeper
            .transact(|k| k.migrate_delegation(&del, &val, LP_DENOM, LP_V2, &del))
            .unwrap_err();
        assert!(matches!(err, StakingError::Swap(_)));
        assert_eq!(keeper.store(), &before);
        assert!(keeper.delegation(&del, &val).is_ok());
    }
}
