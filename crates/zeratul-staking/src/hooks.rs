//! Lifecycle notifications for other modules
//!
//! Listeners are handed to the keeper at construction as an ordered list and
//! never change afterwards. [`MultiStakingHooks`] fans every call out in
//! registration order:
//!
//! - `before_*` hooks stop at the first failure and return it, aborting the
//!   triggering operation
//! - `after_*`, slash and unbonding-initiated notifications log failures and
//!   keep going, so one listener cannot block the ledger

use crate::error::HookError;
use crate::math::DecCoins;
use crate::types::{Address, ConsAddress, UnbondingId};
use tracing::error;

pub type HookResult = std::result::Result<(), HookError>;

/// Listener for validator and delegation lifecycle events. Every method
/// defaults to a no-op.
#[allow(unused_variables)]
pub trait StakingHooks {
    fn after_validator_created(&self, val: &Address) -> HookResult {
        Ok(())
    }

    fn before_validator_modified(&self, val: &Address) -> HookResult {
        Ok(())
    }

    fn after_validator_removed(&self, cons: &ConsAddress, val: &Address) -> HookResult {
        Ok(())
    }

    fn after_validator_bonded(&self, cons: &ConsAddress, val: &Address) -> HookResult {
        Ok(())
    }

    fn after_validator_begin_unbonding(&self, cons: &ConsAddress, val: &Address) -> HookResult {
        Ok(())
    }

    fn before_delegation_created(&self, del: &Address, val: &Address) -> HookResult {
        Ok(())
    }

    fn before_delegation_shares_modified(&self, del: &Address, val: &Address) -> HookResult {
        Ok(())
    }

    fn before_delegation_removed(&self, del: &Address, val: &Address) -> HookResult {
        Ok(())
    }

    fn after_delegation_modified(&self, del: &Address, val: &Address) -> HookResult {
        Ok(())
    }

    /// Called before tokens are removed, with the fraction actually applied
    /// per denomination
    fn before_validator_slashed(&self, val: &Address, fractions: &DecCoins) -> HookResult {
        Ok(())
    }

    fn after_unbonding_initiated(&self, id: UnbondingId) -> HookResult {
        Ok(())
    }
}

/// Ordered fan-out over a fixed list of listeners
#[derive(Default)]
pub struct MultiStakingHooks {
    hooks: Vec<Box<dyn StakingHooks>>,
}

impl MultiStakingHooks {
    pub fn new(hooks: Vec<Box<dyn StakingHooks>>) -> Self {
        Self { hooks }
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    fn abort_on_error(&self, call: impl Fn(&dyn StakingHooks) -> HookResult) -> HookResult {
        for hook in &self.hooks {
            call(hook.as_ref())?;
        }
        Ok(())
    }

    fn log_on_error(&self, name: &str, call: impl Fn(&dyn StakingHooks) -> HookResult) -> HookResult {
        for (index, hook) in self.hooks.iter().enumerate() {
            if let Err(e) = call(hook.as_ref()) {
                error!(hook = name, listener = index, error = %e, "staking hook failed");
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for MultiStakingHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiStakingHooks")
            .field("listeners", &self.hooks.len())
            .finish()
    }
}

impl StakingHooks for MultiStakingHooks {
    fn after_validator_created(&self, val: &Address) -> HookResult {
        self.log_on_error("after_validator_created", |h| h.after_validator_created(val))
    }

    fn before_validator_modified(&self, val: &Address) -> HookResult {
        self.abort_on_error(|h| h.before_validator_modified(val))
    }

    fn after_validator_removed(&self, cons: &ConsAddress, val: &Address) -> HookResult {
        self.log_on_error("after_validator_removed", |h| h.after_validator_removed(cons, val))
    }

    fn after_validator_bonded(&self, cons: &ConsAddress, val: &Address) -> HookResult {
        self.log_on_error("after_validator_bonded", |h| h.after_validator_bonded(cons, val))
    }

    fn after_validator_begin_unbonding(&self, cons: &ConsAddress, val: &Address) -> HookResult {
        self.log_on_error("after_validator_begin_unbonding", |h| {
            h.after_validator_begin_unbonding(cons, val)
        })
    }

    fn before_delegation_created(&self, del: &Address, val: &Address) -> HookResult {
        self.abort_on_error(|h| h.before_delegation_created(del, val))
    }

    fn before_delegation_shares_modified(&self, del: &Address, val: &Address) -> HookResult {
        self.abort_on_error(|h| h.before_delegation_shares_modified(del, val))
    }

    fn before_delegation_removed(&self, del: &Address, val: &Address) -> HookResult {
        self.abort_on_error(|h| h.before_delegation_removed(del, val))
    }

    fn after_delegation_modified(&self, del: &Address, val: &Address) -> HookResult {
        self.log_on_error("after_delegation_modified", |h| h.after_delegation_modified(del, val))
    }

    fn before_validator_slashed(&self, val: &Address, fractions: &DecCoins) -> HookResult {
        self.log_on_error("before_validator_slashed", |h| {
            h.before_validator_slashed(val, fractions)
        })
    }

    fn after_unbonding_initiated(&self, id: UnbondingId) -> HookResult {
        self.log_on_error("after_unbonding_initiated", |h| h.after_unbonding_initiated(id))
    }
}
