//! Unbonding id registry and the hold/release protocol
//!
//! Every unbonding delegation entry, redelegation entry and validator
//! unbonding gets a fresh id when created. Two tables map the id to the key
//! of the owning record and to its kind, so a consumer holding only the id
//! can pause completion (`put_unbonding_on_hold`) and later allow it
//! (`unbonding_can_complete`).
//!
//! ```text
//! 0x39 | id -> key of UnbondingDelegation / Redelegation / Validator
//! 0x3a | id -> UnbondingType
//! ```
//!
//! Holds and releases must be balanced by the caller. Releasing an entry
//! that is not on hold is an error.

use super::pool::not_bonded_pool_address;
use super::Keeper;
use crate::error::{Result, StakingError};
use crate::expected::BankKeeper;
use crate::store::keys;
use crate::types::{Redelegation, UnbondingDelegation, UnbondingId, UnbondingType, Validator};
use tracing::debug;

impl<B: BankKeeper + Clone> Keeper<B> {
    pub(crate) fn increment_unbonding_id(&mut self) -> Result<UnbondingId> {
        let id = self.last_unbonding_id()? + 1;
        self.store.set(keys::unbonding_id_key(), &id)?;
        Ok(id)
    }

    pub fn last_unbonding_id(&self) -> Result<UnbondingId> {
        Ok(self.store.get(&keys::unbonding_id_key())?.unwrap_or(0))
    }

    pub(crate) fn set_last_unbonding_id(&mut self, id: UnbondingId) -> Result<()> {
        self.store.set(keys::unbonding_id_key(), &id)
    }

    pub(crate) fn set_unbonding_index(
        &mut self,
        id: UnbondingId,
        owner_key: Vec<u8>,
        kind: UnbondingType,
    ) -> Result<()> {
        self.store.set_raw(keys::unbonding_index_key(id), owner_key);
        self.store.set(keys::unbonding_type_key(id), &kind)
    }

    pub(crate) fn delete_unbonding_index(&mut self, id: UnbondingId) {
        self.store.delete(&keys::unbonding_index_key(id));
        self.store.delete(&keys::unbonding_type_key(id));
    }

    pub fn unbonding_type(&self, id: UnbondingId) -> Result<UnbondingType> {
        self.store
            .get(&keys::unbonding_type_key(id))?
            .ok_or(StakingError::UnbondingNotFound(id))
    }

    fn owner_of<T: serde::de::DeserializeOwned>(&self, id: UnbondingId) -> Result<Option<T>> {
        match self.store.get_raw(&keys::unbonding_index_key(id)) {
            Some(owner_key) => self.store.get(owner_key),
            None => Ok(None),
        }
    }

    pub fn unbonding_delegation_by_unbonding_id(&self, id: UnbondingId) -> Result<UnbondingDelegation> {
        self.owner_of(id)?.ok_or(StakingError::NoUnbondingDelegation)
    }

    pub fn redelegation_by_unbonding_id(&self, id: UnbondingId) -> Result<Redelegation> {
        self.owner_of(id)?.ok_or(StakingError::NoRedelegation)
    }

    pub fn validator_by_unbonding_id(&self, id: UnbondingId) -> Result<Validator> {
        self.owner_of(id)?
            .ok_or_else(|| StakingError::NoValidatorFound(format!("unbonding id {}", id)))
    }

    /// Increments the hold count of the operation bound to `id`
    pub fn put_unbonding_on_hold(&mut self, id: UnbondingId) -> Result<()> {
        match self.unbonding_type(id)? {
            UnbondingType::UnbondingDelegation => {
                let mut ubd = self.unbonding_delegation_by_unbonding_id(id)?;
                let entry = ubd
                    .entries
                    .iter_mut()
                    .find(|e| e.unbonding_id == id)
                    .ok_or(StakingError::NoUnbondingDelegation)?;
                entry.unbonding_on_hold_ref_count += 1;
                self.set_unbonding_delegation(&ubd)?;
            }
            UnbondingType::Redelegation => {
                let mut red = self.redelegation_by_unbonding_id(id)?;
                let entry = red
                    .entries
                    .iter_mut()
                    .find(|e| e.unbonding_id == id)
                    .ok_or(StakingError::NoRedelegation)?;
                entry.unbonding_on_hold_ref_count += 1;
                self.set_redelegation(&red)?;
            }
            UnbondingType::ValidatorUnbonding => {
                let mut validator = self.validator_by_unbonding_id(id)?;
                validator.unbonding_on_hold_ref_count += 1;
                self.set_validator(&validator)?;
            }
        }
        debug!(id, "unbonding put on hold");
        Ok(())
    }

    /// Releases one hold on `id`. If no holds remain and the operation is
    /// already mature it completes immediately.
    pub fn unbonding_can_complete(&mut self, id: UnbondingId) -> Result<()> {
        match self.unbonding_type(id)? {
            UnbondingType::UnbondingDelegation => self.unbonding_delegation_entry_can_complete(id),
            UnbondingType::Redelegation => self.redelegation_entry_can_complete(id),
            UnbondingType::ValidatorUnbonding => self.validator_unbonding_can_complete(id),
        }
    }

    fn unbonding_delegation_entry_can_complete(&mut self, id: UnbondingId) -> Result<()> {
        let mut ubd = self.unbonding_delegation_by_unbonding_id(id)?;
        let index = ubd
            .entries
            .iter()
            .position(|e| e.unbonding_id == id)
            .ok_or(StakingError::NoUnbondingDelegation)?;

        let entry = &mut ubd.entries[index];
        if !entry.on_hold() {
            return Err(StakingError::UnbondingOnHoldRefCountNegative(id));
        }
        entry.unbonding_on_hold_ref_count -= 1;

        if !entry.on_hold() && entry.is_mature(self.block_time()) {
            if !entry.balance.is_zero() {
                let balance = entry.balance.clone();
                self.bank
                    .send_coins(&not_bonded_pool_address(), &ubd.delegator, &balance)?;
            }
            ubd.remove_entry(index);
            self.delete_unbonding_index(id);
            debug!(id, delegator = %ubd.delegator, "unbonding delegation released");
        }
        self.store_or_remove_unbonding_delegation(&ubd)
    }

    fn redelegation_entry_can_complete(&mut self, id: UnbondingId) -> Result<()> {
        let mut red = self.redelegation_by_unbonding_id(id)?;
        let index = red
            .entries
            .iter()
            .position(|e| e.unbonding_id == id)
            .ok_or(StakingError::NoRedelegation)?;

        let entry = &mut red.entries[index];
        if !entry.on_hold() {
            return Err(StakingError::UnbondingOnHoldRefCountNegative(id));
        }
        entry.unbonding_on_hold_ref_count -= 1;

        if !entry.on_hold() && entry.is_mature(self.block_time()) {
            red.remove_entry(index);
            self.delete_unbonding_index(id);
            debug!(id, delegator = %red.delegator, "redelegation released");
        }
        self.store_or_remove_redelegation(&red)
    }

    fn validator_unbonding_can_complete(&mut self, id: UnbondingId) -> Result<()> {
        let mut validator = self.validator_by_unbonding_id(id)?;
        if validator.unbonding_on_hold_ref_count == 0 {
            return Err(StakingError::UnbondingOnHoldRefCountNegative(id));
        }
        validator.unbonding_on_hold_ref_count -= 1;
        self.set_validator(&validator)?;

        if validator.unbonding_on_hold_ref_count == 0
            && validator.is_unbonding()
            && validator.unbonding_time <= self.block_time()
            && validator.unbonding_height <= self.block_height()
        {
            self.complete_validator_unbonding(validator)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use crate::expected::BankKeeper;
    use crate::math::DecCoins;
    use crate::types::BlockInfo;

    #[test]
    fn test_ids_increment() {
        let mut keeper = keeper();
        assert_eq!(keeper.increment_unbonding_id().unwrap(), 1);
        assert_eq!(keeper.increment_unbonding_id().unwrap(), 2);
        assert_eq!(keeper.last_unbonding_id().unwrap(), 2);
    }

    #[test]
    fn test_unknown_id() {
        let mut keeper = keeper();
        assert_eq!(
            keeper.put_unbonding_on_hold(42).unwrap_err(),
            StakingError::UnbondingNotFound(42)
        );
    }

    #[test]
    fn test_hold_delays_unbonding_delegation_release() {
        let mut keeper = keeper();
        let val = create_validator(&mut keeper, "val", 1, 2_000_000);
        let op = val.operator;

        let shares = DecCoins::single(DENOM, crate::math::Dec::from_int(1_000_000));
        let (completion, _) = keeper.undelegate(&op, &op, &shares).unwrap();
        let id = keeper.unbonding_delegation(&op, &op).unwrap().entries[0].unbonding_id;

        keeper.put_unbonding_on_hold(id).unwrap();
        keeper.set_block(BlockInfo { height: 20, time: completion });
        keeper.end_block().unwrap();

        // mature but held: still there, tokens still in the pool
        assert_eq!(keeper.unbonding_delegation(&op, &op).unwrap().entries.len(), 1);
        assert_eq!(keeper.bank().balance(&op, DENOM), 0);

        keeper.unbonding_can_complete(id).unwrap();
        assert!(keeper.get_unbonding_delegation(&op, &op).unwrap().is_none());
        assert_eq!(keeper.bank().balance(&op, DENOM), 1_000_000);

        // unmatched release
        assert_eq!(
            keeper.unbonding_can_complete(id).unwrap_err(),
            StakingError::UnbondingNotFound(id)
        );
    }

    #[test]
    fn test_release_without_hold_is_error() {
        let mut keeper = keeper();
        let val = create_validator(&mut keeper, "val", 1, 2_000_000);
        let op = val.operator;

        let shares = DecCoins::single(DENOM, crate::math::Dec::from_int(1_000_000));
        keeper.undelegate(&op, &op, &shares).unwrap();
        let id = keeper.unbonding_delegation(&op, &op).unwrap().entries[0].unbonding_id;

        assert_eq!(
            keeper.unbonding_can_complete(id).unwrap_err(),
            StakingError::UnbondingOnHoldRefCountNegative(id)
        );
        assert_eq!(keeper.unbonding_type(id).unwrap(), UnbondingType::UnbondingDelegation);
    }
}
