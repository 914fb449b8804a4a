//! Delegation, unbonding-delegation and redelegation records
//!
//! Also the two time-keyed maturity queues. Queue buckets hold every
//! (delegator, validator[, validator]) reference whose entries complete at
//! that timestamp; draining removes whole buckets up to the current time.

use super::Keeper;
use crate::error::{Result, StakingError};
use crate::expected::BankKeeper;
use crate::hooks::StakingHooks;
use crate::math::{Coins, DecCoins};
use crate::store::keys;
use crate::types::{
    Address, Delegation, DvPair, DvvTriplet, Height, Redelegation, Timestamp,
    UnbondingDelegation, UnbondingType,
};

impl<B: BankKeeper + Clone> Keeper<B> {
    pub fn get_delegation(&self, delegator: &Address, validator: &Address) -> Result<Option<Delegation>> {
        self.store.get(&keys::delegation_key(delegator, validator))
    }

    pub fn delegation(&self, delegator: &Address, validator: &Address) -> Result<Delegation> {
        self.get_delegation(delegator, validator)?
            .ok_or(StakingError::NoDelegation)
    }

    pub(crate) fn set_delegation(&mut self, delegation: &Delegation) -> Result<()> {
        self.store.set(
            keys::delegation_key(&delegation.delegator, &delegation.validator),
            delegation,
        )?;
        self.store.set_raw(
            keys::delegation_by_val_index_key(&delegation.validator, &delegation.delegator),
            Vec::new(),
        );
        Ok(())
    }

    pub(crate) fn remove_delegation(&mut self, delegation: &Delegation) -> Result<()> {
        self.hooks()
            .before_delegation_removed(&delegation.delegator, &delegation.validator)?;
        self.store
            .delete(&keys::delegation_key(&delegation.delegator, &delegation.validator));
        self.store.delete(&keys::delegation_by_val_index_key(
            &delegation.validator,
            &delegation.delegator,
        ));
        Ok(())
    }

    pub fn delegator_delegations(&self, delegator: &Address) -> Result<Vec<Delegation>> {
        self.store.prefix_values(&keys::delegations_key(delegator))
    }

    pub fn validator_delegations(&self, validator: &Address) -> Result<Vec<Delegation>> {
        let prefix = keys::delegations_by_val_prefix(validator);
        let mut out = Vec::new();
        for key in self.store.prefix_keys(&prefix) {
            let (val, del) = keys::parse_address_pair_key(keys::DELEGATION_BY_VAL_INDEX_KEY, &key)
                .ok_or_else(|| StakingError::invariant("malformed delegation index key"))?;
            out.push(self.delegation(&del, &val).map_err(|_| {
                StakingError::invariant(format!("dangling delegation index {} -> {}", del, val))
            })?);
        }
        Ok(out)
    }

    pub fn all_delegations(&self) -> Result<Vec<Delegation>> {
        self.store.prefix_values(&[keys::DELEGATION_KEY])
    }

    /// Tokens the delegator's shares at `validator` are currently worth
    pub fn delegation_balance(&self, delegator: &Address, validator: &Address) -> Result<DecCoins> {
        let delegation = self.delegation(delegator, validator)?;
        let validator = self.validator(validator)?;
        Ok(validator.tokens_from_shares(&delegation.shares))
    }

    // unbonding delegations

    pub fn get_unbonding_delegation(
        &self,
        delegator: &Address,
        validator: &Address,
    ) -> Result<Option<UnbondingDelegation>> {
        self.store
            .get(&keys::unbonding_delegation_key(delegator, validator))
    }

    pub fn unbonding_delegation(&self, delegator: &Address, validator: &Address) -> Result<UnbondingDelegation> {
        self.get_unbonding_delegation(delegator, validator)?
            .ok_or(StakingError::NoUnbondingDelegation)
    }

    pub(crate) fn set_unbonding_delegation(&mut self, ubd: &UnbondingDelegation) -> Result<()> {
        self.store.set(
            keys::unbonding_delegation_key(&ubd.delegator, &ubd.validator),
            ubd,
        )?;
        self.store.set_raw(
            keys::unbonding_delegation_by_val_index_key(&ubd.validator, &ubd.delegator),
            Vec::new(),
        );
        Ok(())
    }

    pub(crate) fn remove_unbonding_delegation(&mut self, ubd: &UnbondingDelegation) {
        self.store
            .delete(&keys::unbonding_delegation_key(&ubd.delegator, &ubd.validator));
        self.store.delete(&keys::unbonding_delegation_by_val_index_key(
            &ubd.validator,
            &ubd.delegator,
        ));
    }

    /// Writes the record back, or deletes it once it has no entries
    pub(crate) fn store_or_remove_unbonding_delegation(&mut self, ubd: &UnbondingDelegation) -> Result<()> {
        if ubd.entries.is_empty() {
            self.remove_unbonding_delegation(ubd);
            Ok(())
        } else {
            self.set_unbonding_delegation(ubd)
        }
    }

    pub fn delegator_unbonding_delegations(&self, delegator: &Address) -> Result<Vec<UnbondingDelegation>> {
        self.store
            .prefix_values(&keys::unbonding_delegations_key(delegator))
    }

    pub fn unbonding_delegations_from_validator(&self, validator: &Address) -> Result<Vec<UnbondingDelegation>> {
        let prefix = keys::unbonding_delegations_by_val_prefix(validator);
        let mut out = Vec::new();
        for key in self.store.prefix_keys(&prefix) {
            let (val, del) =
                keys::parse_address_pair_key(keys::UNBONDING_DELEGATION_BY_VAL_INDEX_KEY, &key)
                    .ok_or_else(|| StakingError::invariant("malformed unbonding index key"))?;
            out.push(self.unbonding_delegation(&del, &val).map_err(|_| {
                StakingError::invariant(format!("dangling unbonding index {} -> {}", del, val))
            })?);
        }
        Ok(out)
    }

    pub fn all_unbonding_delegations(&self) -> Result<Vec<UnbondingDelegation>> {
        self.store.prefix_values(&[keys::UNBONDING_DELEGATION_KEY])
    }

    pub(crate) fn has_max_unbonding_delegation_entries(
        &self,
        delegator: &Address,
        validator: &Address,
    ) -> Result<bool> {
        let max = self.params()?.max_entries as usize;
        Ok(self
            .get_unbonding_delegation(delegator, validator)?
            .map_or(false, |ubd| ubd.entries.len() >= max))
    }

    /// Adds an entry (or extends one created at the same height and time)
    /// and registers a fresh unbonding id for new entries
    pub(crate) fn set_unbonding_delegation_entry(
        &mut self,
        delegator: &Address,
        validator: &Address,
        creation_height: Height,
        completion_time: Timestamp,
        balance: Coins,
    ) -> Result<UnbondingDelegation> {
        let id = self.increment_unbonding_id()?;
        let mut ubd = self
            .get_unbonding_delegation(delegator, validator)?
            .unwrap_or_else(|| UnbondingDelegation::new(*delegator, *validator));
        let is_new_entry = ubd.add_entry(creation_height, completion_time, balance, id);
        self.set_unbonding_delegation(&ubd)?;

        // only new entries get an id binding; the hook is not idempotent
        if is_new_entry {
            self.set_unbonding_index(
                id,
                keys::unbonding_delegation_key(delegator, validator),
                UnbondingType::UnbondingDelegation,
            )?;
            self.hooks().after_unbonding_initiated(id)?;
        }
        Ok(ubd)
    }

    // redelegations

    pub fn get_redelegation(
        &self,
        delegator: &Address,
        src: &Address,
        dst: &Address,
    ) -> Result<Option<Redelegation>> {
        self.store.get(&keys::redelegation_key(delegator, src, dst))
    }

    pub fn redelegation(&self, delegator: &Address, src: &Address, dst: &Address) -> Result<Redelegation> {
        self.get_redelegation(delegator, src, dst)?
            .ok_or(StakingError::NoRedelegation)
    }

    pub(crate) fn set_redelegation(&mut self, red: &Redelegation) -> Result<()> {
        self.store.set(
            keys::redelegation_key(&red.delegator, &red.validator_src, &red.validator_dst),
            red,
        )?;
        self.store.set_raw(
            keys::redelegation_by_val_src_index_key(&red.delegator, &red.validator_src, &red.validator_dst),
            Vec::new(),
        );
        self.store.set_raw(
            keys::redelegation_by_val_dst_index_key(&red.delegator, &red.validator_src, &red.validator_dst),
            Vec::new(),
        );
        Ok(())
    }

    pub(crate) fn remove_redelegation(&mut self, red: &Redelegation) {
        self.store.delete(&keys::redelegation_key(
            &red.delegator,
            &red.validator_src,
            &red.validator_dst,
        ));
        self.store.delete(&keys::redelegation_by_val_src_index_key(
            &red.delegator,
            &red.validator_src,
            &red.validator_dst,
        ));
        self.store.delete(&keys::redelegation_by_val_dst_index_key(
            &red.delegator,
            &red.validator_src,
            &red.validator_dst,
        ));
    }

    pub(crate) fn store_or_remove_redelegation(&mut self, red: &Redelegation) -> Result<()> {
        if red.entries.is_empty() {
            self.remove_redelegation(red);
            Ok(())
        } else {
            self.set_redelegation(red)
        }
    }

    pub fn delegator_redelegations(&self, delegator: &Address) -> Result<Vec<Redelegation>> {
        self.store.prefix_values(&keys::redelegations_key(delegator))
    }

    /// Outgoing redelegations of `src`, ordered by (delegator, dst)
    pub fn redelegations_from_src_validator(&self, src: &Address) -> Result<Vec<Redelegation>> {
        let prefix = keys::redelegations_by_val_src_prefix(src);
        let mut out = Vec::new();
        for key in self.store.prefix_keys(&prefix) {
            let (src, del, dst) =
                keys::parse_address_triplet_key(keys::REDELEGATION_BY_VAL_SRC_INDEX_KEY, &key)
                    .ok_or_else(|| StakingError::invariant("malformed redelegation index key"))?;
            out.push(self.redelegation(&del, &src, &dst)?);
        }
        Ok(out)
    }

    /// Incoming redelegations of `dst`, ordered by (delegator, src)
    pub fn redelegations_to_dst_validator(&self, dst: &Address) -> Result<Vec<Redelegation>> {
        let prefix = keys::redelegations_by_val_dst_prefix(dst);
        let mut out = Vec::new();
        for key in self.store.prefix_keys(&prefix) {
            let (dst, del, src) =
                keys::parse_address_triplet_key(keys::REDELEGATION_BY_VAL_DST_INDEX_KEY, &key)
                    .ok_or_else(|| StakingError::invariant("malformed redelegation index key"))?;
            out.push(self.redelegation(&del, &src, &dst)?);
        }
        Ok(out)
    }

    pub fn all_redelegations(&self) -> Result<Vec<Redelegation>> {
        self.store.prefix_values(&[keys::REDELEGATION_KEY])
    }

    /// True if `delegator` has a redelegation into `validator` still in
    /// progress
    pub(crate) fn has_receiving_redelegation(&self, delegator: &Address, validator: &Address) -> bool {
        let prefix = keys::redelegations_by_del_val_dst_prefix(delegator, validator);
        let found = self.store.prefix_iter(&prefix).next().is_some();
        found
    }

    pub(crate) fn has_max_redelegation_entries(
        &self,
        delegator: &Address,
        src: &Address,
        dst: &Address,
    ) -> Result<bool> {
        let max = self.params()?.max_entries as usize;
        Ok(self
            .get_redelegation(delegator, src, dst)?
            .map_or(false, |red| red.entries.len() >= max))
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn set_redelegation_entry(
        &mut self,
        delegator: &Address,
        src: &Address,
        dst: &Address,
        creation_height: Height,
        completion_time: Timestamp,
        balance: Coins,
        shares_dst: DecCoins,
    ) -> Result<Redelegation> {
        let mut red = self
            .get_redelegation(delegator, src, dst)?
            .unwrap_or_else(|| Redelegation::new(*delegator, *src, *dst));
        let id = self.increment_unbonding_id()?;
        red.add_entry(creation_height, completion_time, balance, shares_dst, id);
        self.set_redelegation(&red)?;

        self.set_unbonding_index(
            id,
            keys::redelegation_key(delegator, src, dst),
            UnbondingType::Redelegation,
        )?;
        self.hooks().after_unbonding_initiated(id)?;
        Ok(red)
    }

    // maturity queues

    fn ubd_queue_slice(&self, time: Timestamp) -> Result<Vec<DvPair>> {
        Ok(self
            .store
            .get(&keys::unbonding_queue_time_key(time))?
            .unwrap_or_default())
    }

    pub(crate) fn insert_ubd_queue(&mut self, ubd: &UnbondingDelegation, completion_time: Timestamp) -> Result<()> {
        let pair = DvPair {
            delegator: ubd.delegator,
            validator: ubd.validator,
        };
        let mut slice = self.ubd_queue_slice(completion_time)?;
        if !slice.contains(&pair) {
            slice.push(pair);
        }
        self.store
            .set(keys::unbonding_queue_time_key(completion_time), &slice)
    }

    /// Removes and returns every pair queued at or before `now`, ascending by
    /// time then insertion order
    pub(crate) fn dequeue_all_mature_ubd_queue(&mut self, now: Timestamp) -> Result<Vec<DvPair>> {
        let prefix = [keys::UNBONDING_QUEUE_KEY];
        let end = keys::unbonding_queue_time_key(now);
        self.drain_queue(&prefix, &end)
    }

    fn redelegation_queue_slice(&self, time: Timestamp) -> Result<Vec<DvvTriplet>> {
        Ok(self
            .store
            .get(&keys::redelegation_queue_time_key(time))?
            .unwrap_or_default())
    }

    pub(crate) fn insert_redelegation_queue(&mut self, red: &Redelegation, completion_time: Timestamp) -> Result<()> {
        let triplet = DvvTriplet {
            delegator: red.delegator,
            validator_src: red.validator_src,
            validator_dst: red.validator_dst,
        };
        let mut slice = self.redelegation_queue_slice(completion_time)?;
        if !slice.contains(&triplet) {
            slice.push(triplet);
        }
        self.store
            .set(keys::redelegation_queue_time_key(completion_time), &slice)
    }

    pub(crate) fn dequeue_all_mature_redelegation_queue(&mut self, now: Timestamp) -> Result<Vec<DvvTriplet>> {
        let prefix = [keys::REDELEGATION_QUEUE_KEY];
        let end = keys::redelegation_queue_time_key(now);
        self.drain_queue(&prefix, &end)
    }

    fn drain_queue<T: serde::de::DeserializeOwned>(&mut self, prefix: &[u8], end: &[u8]) -> Result<Vec<T>> {
        let mut keys = Vec::new();
        let mut items = Vec::new();
        for (key, value) in self.store.range_until(prefix, end) {
            keys.push(key.to_vec());
            items.extend(crate::store::decode::<Vec<T>>(value)?);
        }
        for key in keys {
            self.store.delete(&key);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;

    #[test]
    fn test_delegation_indexes() {
        let mut keeper = keeper();
        let val = create_validator(&mut keeper, "val", 1, 1_000_000);
        let op = val.operator;

        let by_val = keeper.validator_delegations(&op).unwrap();
        assert_eq!(by_val.len(), 1);
        assert_eq!(by_val[0].delegator, op);
        assert_eq!(keeper.delegator_delegations(&op).unwrap(), by_val);

        keeper.remove_delegation(&by_val[0]).unwrap();
        assert!(keeper.validator_delegations(&op).unwrap().is_empty());
        assert_eq!(keeper.delegation(&op, &op).unwrap_err(), StakingError::NoDelegation);
    }

    #[test]
    fn test_queue_drain_is_ordered_and_idempotent() {
        let mut keeper = keeper();
        let (d, v1, v2) = (addr("d"), addr("v1"), addr("v2"));

        let late = UnbondingDelegation::new(d, v2);
        let early = UnbondingDelegation::new(d, v1);
        keeper.insert_ubd_queue(&late, 500).unwrap();
        keeper.insert_ubd_queue(&early, 100).unwrap();
        keeper.insert_ubd_queue(&early, 100).unwrap();
        keeper.insert_ubd_queue(&early, 900).unwrap();

        let due = keeper.dequeue_all_mature_ubd_queue(500).unwrap();
        assert_eq!(
            due,
            vec![
                DvPair { delegator: d, validator: v1 },
                DvPair { delegator: d, validator: v2 },
            ]
        );
        assert!(keeper.dequeue_all_mature_ubd_queue(500).unwrap().is_empty());
        assert_eq!(keeper.dequeue_all_mature_ubd_queue(900).unwrap().len(), 1);
    }

    #[test]
    fn test_receiving_redelegation_lookup() {
        let mut keeper = keeper();
        let (d, src, dst) = (addr("d"), addr("src"), addr("dst"));
        let mut red = Redelegation::new(d, src, dst);
        red.add_entry(1, 10, stake(5), DecCoins::empty(), 1);
        keeper.set_redelegation(&red).unwrap();

        assert!(keeper.has_receiving_redelegation(&d, &dst));
        assert!(!keeper.has_receiving_redelegation(&d, &src));
        assert_eq!(keeper.redelegations_from_src_validator(&src).unwrap(), vec![red.clone()]);
        assert_eq!(keeper.redelegations_to_dst_validator(&dst).unwrap(), vec![red.clone()]);

        keeper.remove_redelegation(&red);
        assert!(!keeper.has_receiving_redelegation(&d, &dst));
    }
}
