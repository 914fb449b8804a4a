//! Genesis import and export
//!
//! Import writes every entity and rebuilds the secondary state derived from
//! it: cons-address and power indexes, whitelist, maturity queues and the
//! unbonding id registry. The ledger must already hold the pool balances the
//! imported tokens claim.

use super::Keeper;
use crate::error::{Result, StakingError};
use crate::expected::BankKeeper;
use crate::hooks::StakingHooks;
use crate::math::Coins;
use crate::store::keys;
use crate::types::{GenesisState, UnbondingType, ValidatorUpdate};
use std::collections::BTreeSet;
use tracing::info;

/// Structural checks on a genesis state before anything is written
pub fn validate_genesis(genesis: &GenesisState) -> Result<()> {
    genesis.params.validate()?;

    let mut operators = BTreeSet::new();
    let mut cons_addrs = BTreeSet::new();
    for validator in &genesis.validators {
        if !operators.insert(validator.operator) {
            return Err(StakingError::InvalidRequest(format!(
                "duplicate validator in genesis state: {}",
                validator.operator
            )));
        }
        if !cons_addrs.insert(validator.cons_address()) {
            return Err(StakingError::InvalidRequest(format!(
                "duplicate consensus pubkey in genesis state: {}",
                validator.cons_address()
            )));
        }
        if validator.jailed && validator.is_bonded() {
            return Err(StakingError::InvalidRequest(format!(
                "validator {} is bonded and jailed in genesis state",
                validator.operator
            )));
        }
        if validator.delegator_shares.is_zero() && !validator.is_unbonding() {
            return Err(StakingError::InvalidRequest(format!(
                "bonded or unbonded validator {} cannot have zero delegator shares",
                validator.operator
            )));
        }
        validator.description.ensure_length()?;
        validator.commission.rates.validate()?;
    }

    for delegation in &genesis.delegations {
        if delegation.shares.is_zero() {
            return Err(StakingError::InvalidRequest(format!(
                "delegation of {} to {} has no shares",
                delegation.delegator, delegation.validator
            )));
        }
    }
    Ok(())
}

impl<B: BankKeeper + Clone> Keeper<B> {
    /// Loads `genesis` into an empty keeper and returns the initial
    /// validator set
    pub fn init_genesis(&mut self, genesis: &GenesisState) -> Result<Vec<ValidatorUpdate>> {
        validate_genesis(genesis)?;
        self.set_params(&genesis.params)?;
        self.set_last_total_power(genesis.last_total_power)?;

        let mut bonded_tokens = Coins::empty();
        let mut not_bonded_tokens = Coins::empty();
        let mut max_id = 0;

        for validator in &genesis.validators {
            let mut validator = validator.clone();
            self.refresh_voting_power(&mut validator)?;
            self.set_validator(&validator)?;
            self.set_validator_by_cons_addr(&validator)?;
            self.set_validator_by_power_index(&validator);
            self.update_whitelist(&validator)?;

            if !genesis.exported {
                self.hooks().after_validator_created(&validator.operator)?;
            }
            if validator.is_unbonding() {
                self.insert_unbonding_validator_queue(&validator)?;
            }
            for &id in &validator.unbonding_ids {
                self.set_unbonding_index(
                    id,
                    keys::validator_key(&validator.operator),
                    UnbondingType::ValidatorUnbonding,
                )?;
                max_id = max_id.max(id);
            }

            if validator.is_bonded() {
                bonded_tokens = bonded_tokens.add(&validator.tokens);
            } else {
                not_bonded_tokens = not_bonded_tokens.add(&validator.tokens);
            }
        }

        for delegation in &genesis.delegations {
            if !genesis.exported {
                self.hooks()
                    .before_delegation_created(&delegation.delegator, &delegation.validator)?;
            }
            self.set_delegation(delegation)?;
            if !genesis.exported {
                self.hooks()
                    .after_delegation_modified(&delegation.delegator, &delegation.validator)?;
            }
        }

        for ubd in &genesis.unbonding_delegations {
            self.set_unbonding_delegation(ubd)?;
            for entry in &ubd.entries {
                self.insert_ubd_queue(ubd, entry.completion_time)?;
                self.set_unbonding_index(
                    entry.unbonding_id,
                    keys::unbonding_delegation_key(&ubd.delegator, &ubd.validator),
                    UnbondingType::UnbondingDelegation,
                )?;
                max_id = max_id.max(entry.unbonding_id);
                not_bonded_tokens = not_bonded_tokens.add(&entry.balance);
            }
        }

        for red in &genesis.redelegations {
            self.set_redelegation(red)?;
            for entry in &red.entries {
                self.insert_redelegation_queue(red, entry.completion_time)?;
                self.set_unbonding_index(
                    entry.unbonding_id,
                    keys::redelegation_key(&red.delegator, &red.validator_src, &red.validator_dst),
                    UnbondingType::Redelegation,
                )?;
                max_id = max_id.max(entry.unbonding_id);
            }
        }

        for migration in &genesis.migrations {
            self.register_migration(migration.clone())?;
        }

        self.set_last_unbonding_id(max_id)?;

        if self.bonded_pool_balance() != bonded_tokens {
            return Err(StakingError::invariant(format!(
                "bonded pool balance {} is different from bonded coins {}",
                self.bonded_pool_balance(),
                bonded_tokens
            )));
        }
        if self.not_bonded_pool_balance() != not_bonded_tokens {
            return Err(StakingError::invariant(format!(
                "not bonded pool balance {} is different from not bonded coins {}",
                self.not_bonded_pool_balance(),
                not_bonded_tokens
            )));
        }

        let updates = if genesis.exported {
            let mut updates = Vec::with_capacity(genesis.last_validator_powers.len());
            for last in &genesis.last_validator_powers {
                let validator = self.validator(&last.address)?;
                self.set_last_validator_power(&last.address, last.power)?;
                updates.push(validator.abci_validator_update());
            }
            updates
        } else {
            self.apply_and_return_validator_set_updates()?
        };

        info!(
            validators = genesis.validators.len(),
            delegations = genesis.delegations.len(),
            initial_set = updates.len(),
            "staking genesis initialized"
        );
        Ok(updates)
    }

    /// Snapshot of the full entity set, ready to be imported again
    pub fn export_genesis(&self) -> Result<GenesisState> {
        Ok(GenesisState {
            params: self.params()?,
            last_total_power: self.last_total_power()?,
            last_validator_powers: self.last_validator_powers()?,
            validators: self.all_validators()?,
            delegations: self.all_delegations()?,
            unbonding_delegations: self.all_unbonding_delegations()?,
            redelegations: self.all_redelegations()?,
            migrations: self.all_migrations()?,
            exported: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use crate::math::{Dec, DecCoins};
    use crate::memory::MemoryPools;

    #[test]
    fn test_export_import_round_trip() {
        let mut keeper = keeper();
        let a = create_validator(&mut keeper, "a", 1, 3_000_000);
        create_validator(&mut keeper, "b", 2, 2_000_000);
        create_validator(&mut keeper, "c", 3, 1_000_000);
        keeper.end_block().unwrap();
        keeper
            .undelegate(&a.operator, &a.operator, &DecCoins::single(DENOM, Dec::from_int(500_000)))
            .unwrap();

        let exported = keeper.export_genesis().unwrap();
        assert!(exported.exported);
        assert_eq!(exported.validators.len(), 3);
        assert_eq!(exported.unbonding_delegations.len(), 1);

        let mut imported = keeper_with(MemoryPools::new(), Vec::new());
        *imported.bank_mut() = keeper.bank().clone();
        let updates = imported.init_genesis(&exported).unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(imported.export_genesis().unwrap(), exported);

        // the id registry survives the round trip
        let id = exported.unbonding_delegations[0].entries[0].unbonding_id;
        assert_eq!(imported.last_unbonding_id().unwrap(), id);
        imported.put_unbonding_on_hold(id).unwrap();
    }

    #[test]
    fn test_pool_mismatch_is_fatal() {
        let mut keeper = keeper();
        create_validator(&mut keeper, "a", 1, 3_000_000);
        let mut exported = keeper.export_genesis().unwrap();
        exported.exported = false;

        // fresh ledger: the not-bonded pool does not hold the tokens
        let mut imported = keeper_with(MemoryPools::new(), Vec::new());
        let err = imported.init_genesis(&exported).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_fresh_genesis_runs_reconciliation() {
        let mut keeper = keeper();
        let a = create_validator(&mut keeper, "a", 1, 3_000_000);
        let mut genesis = keeper.export_genesis().unwrap();
        genesis.exported = false;

        let mut imported = keeper_with(MemoryPools::new(), Vec::new());
        *imported.bank_mut() = keeper.bank().clone();
        let updates = imported.init_genesis(&genesis).unwrap();
        let bonded = imported.validator(&a.operator).unwrap();
        assert!(bonded.is_bonded());
        assert_eq!(updates, vec![bonded.abci_validator_update()]);
        assert_eq!(updates[0].power, 3);
        assert_eq!(imported.bonded_pool_balance(), stake(3_000_000));
    }

    #[test]
    fn test_duplicate_validators_rejected() {
        let mut keeper = keeper();
        create_validator(&mut keeper, "a", 1, 3_000_000);
        let mut genesis = keeper.export_genesis().unwrap();
        genesis.validators.push(genesis.validators[0].clone());
        assert!(matches!(
            validate_genesis(&genesis),
            Err(StakingError::InvalidRequest(_))
        ));
    }
}
