//! Delegations, unbonding delegations and redelegations

use super::{Address, Height, Timestamp, UnbondingId};
use crate::math::{Coins, DecCoins};
use serde::{Deserialize, Serialize};

/// Shares a delegator holds in one validator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub delegator: Address,
    pub validator: Address,
    pub shares: DecCoins,
}

impl Delegation {
    pub fn new(delegator: Address, validator: Address, shares: DecCoins) -> Self {
        Self {
            delegator,
            validator,
            shares,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnbondingDelegationEntry {
    pub creation_height: Height,
    pub completion_time: Timestamp,
    /// Tokens at creation; slashing is computed against this
    pub initial_balance: Coins,
    /// Tokens still to be returned
    pub balance: Coins,
    pub unbonding_id: UnbondingId,
    pub unbonding_on_hold_ref_count: u64,
}

impl UnbondingDelegationEntry {
    pub fn new(
        creation_height: Height,
        completion_time: Timestamp,
        balance: Coins,
        unbonding_id: UnbondingId,
    ) -> Self {
        Self {
            creation_height,
            completion_time,
            initial_balance: balance.clone(),
            balance,
            unbonding_id,
            unbonding_on_hold_ref_count: 0,
        }
    }

    pub fn is_mature(&self, now: Timestamp) -> bool {
        self.completion_time <= now
    }

    pub fn on_hold(&self) -> bool {
        self.unbonding_on_hold_ref_count > 0
    }
}

/// Tokens on their way out of a validator, one entry per undelegation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnbondingDelegation {
    pub delegator: Address,
    pub validator: Address,
    pub entries: Vec<UnbondingDelegationEntry>,
}

impl UnbondingDelegation {
    pub fn new(delegator: Address, validator: Address) -> Self {
        Self {
            delegator,
            validator,
            entries: Vec::new(),
        }
    }

    /// Appends an entry. Returns whether a new entry was added (`true`) or
    /// an existing one with the same height and completion time was
    /// extended, in which case `unbonding_id` goes unused.
    pub fn add_entry(
        &mut self,
        creation_height: Height,
        completion_time: Timestamp,
        balance: Coins,
        unbonding_id: UnbondingId,
    ) -> bool {
        let existing = self.entries.iter_mut().find(|e| {
            e.creation_height == creation_height && e.completion_time == completion_time
        });

        match existing {
            Some(entry) => {
                entry.balance = entry.balance.add(&balance);
                entry.initial_balance = entry.initial_balance.add(&balance);
                false
            }
            None => {
                self.entries.push(UnbondingDelegationEntry::new(
                    creation_height,
                    completion_time,
                    balance,
                    unbonding_id,
                ));
                true
            }
        }
    }

    pub fn remove_entry(&mut self, index: usize) {
        self.entries.remove(index);
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedelegationEntry {
    pub creation_height: Height,
    pub completion_time: Timestamp,
    pub initial_balance: Coins,
    /// Shares created at the destination validator
    pub shares_dst: DecCoins,
    pub unbonding_id: UnbondingId,
    pub unbonding_on_hold_ref_count: u64,
}

impl RedelegationEntry {
    pub fn is_mature(&self, now: Timestamp) -> bool {
        self.completion_time <= now
    }

    pub fn on_hold(&self) -> bool {
        self.unbonding_on_hold_ref_count > 0
    }
}

/// Stake moved between validators that stays slashable at the source until
/// the entry matures
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redelegation {
    pub delegator: Address,
    pub validator_src: Address,
    pub validator_dst: Address,
    pub entries: Vec<RedelegationEntry>,
}

impl Redelegation {
    pub fn new(delegator: Address, validator_src: Address, validator_dst: Address) -> Self {
        Self {
            delegator,
            validator_src,
            validator_dst,
            entries: Vec::new(),
        }
    }

    pub fn add_entry(
        &mut self,
        creation_height: Height,
        completion_time: Timestamp,
        balance: Coins,
        shares_dst: DecCoins,
        unbonding_id: UnbondingId,
    ) {
        self.entries.push(RedelegationEntry {
            creation_height,
            completion_time,
            initial_balance: balance,
            shares_dst,
            unbonding_id,
            unbonding_on_hold_ref_count: 0,
        });
    }

    pub fn remove_entry(&mut self, index: usize) {
        self.entries.remove(index);
    }
}

/// (delegator, validator) reference stored in the unbonding queue
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DvPair {
    pub delegator: Address,
    pub validator: Address,
}

/// (delegator, src, dst) reference stored in the redelegation queue
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DvvTriplet {
    pub delegator: Address,
    pub validator_src: Address,
    pub validator_dst: Address,
}
