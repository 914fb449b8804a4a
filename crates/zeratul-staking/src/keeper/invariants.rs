//! State consistency checks
//!
//! Each check returns a human readable report and whether it is broken. The
//! driver runs [`Keeper::all_invariants`] after every block.

use super::Keeper;
use crate::error::Result;
use crate::expected::BankKeeper;
use crate::math::{Coins, DecCoins};
use crate::store::keys;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Report and broken flag
pub type InvariantReport = (String, bool);

fn report(name: &str, body: String, broken: bool) -> InvariantReport {
    let status = if broken { "broken" } else { "ok" };
    (format!("staking: {} invariant {}\n{}", name, status, body), broken)
}

impl<B: BankKeeper + Clone> Keeper<B> {
    /// Runs every check in order and returns the first broken one, or the
    /// last report if all hold
    pub fn all_invariants(&self) -> Result<InvariantReport> {
        let checks: [fn(&Self) -> Result<InvariantReport>; 4] = [
            Self::module_accounts_invariant,
            Self::non_negative_power_invariant,
            Self::positive_delegation_invariant,
            Self::delegator_shares_invariant,
        ];
        let mut last = (String::new(), false);
        for check in checks {
            last = check(self)?;
            if last.1 {
                return Ok(last);
            }
        }
        Ok(last)
    }

    /// The pools hold at least what validators and unbonding entries claim
    pub fn module_accounts_invariant(&self) -> Result<InvariantReport> {
        let mut bonded = Coins::empty();
        let mut not_bonded = Coins::empty();

        for validator in self.all_validators()? {
            if validator.is_bonded() {
                bonded = bonded.add(&validator.tokens);
            } else {
                not_bonded = not_bonded.add(&validator.tokens);
            }
        }
        for ubd in self.all_unbonding_delegations()? {
            for entry in &ubd.entries {
                not_bonded = not_bonded.add(&entry.balance);
            }
        }

        let bonded_pool = self.bonded_pool_balance();
        let not_bonded_pool = self.not_bonded_pool_balance();
        let broken = !bonded_pool.is_all_gte(&bonded) || !not_bonded_pool.is_all_gte(&not_bonded);

        Ok(report(
            "module accounts",
            format!(
                "\tPool's bonded tokens: {}\n\tsum of bonded tokens: {}\n\
                 \tPool's not bonded tokens: {}\n\tsum of not bonded tokens: {}\n",
                bonded_pool, bonded, not_bonded_pool, not_bonded
            ),
            broken,
        ))
    }

    /// Every power index entry points at an existing, non-jailed validator
    /// whose stored power matches the key, and no validator has negative
    /// shares
    pub fn non_negative_power_invariant(&self) -> Result<InvariantReport> {
        let mut msg = String::new();
        let mut broken = false;

        let prefix = [keys::VALIDATORS_BY_POWER_INDEX_KEY];
        for (key, _) in self.store.prefix_iter(&prefix) {
            let Some((_, operator)) = keys::parse_validator_power_index_key(key) else {
                broken = true;
                let _ = writeln!(msg, "\tmalformed power index key {}", hex::encode(key));
                continue;
            };
            let Some(validator) = self.get_validator(&operator)? else {
                broken = true;
                let _ = writeln!(msg, "\tpower index entry for missing validator {}", operator);
                continue;
            };

            let expected = keys::validator_by_power_index_key(validator.potential_consensus_power(), &operator);
            if expected.as_slice() != key {
                broken = true;
                let _ = writeln!(
                    msg,
                    "\tpower store invariance: validator {} power {} does not match its index key",
                    operator,
                    validator.potential_consensus_power()
                );
            }
            if validator.jailed {
                broken = true;
                let _ = writeln!(msg, "\tjailed validator {} is in the power index", operator);
            }
            if validator.delegator_shares.iter().any(|c| c.amount.is_negative()) {
                broken = true;
                let _ = writeln!(
                    msg,
                    "\tnegative delegator shares for validator {}: {}",
                    operator, validator.delegator_shares
                );
            }
        }
        Ok(report("nonnegative power", msg, broken))
    }

    /// No delegation record carries zero or negative shares
    pub fn positive_delegation_invariant(&self) -> Result<InvariantReport> {
        let mut msg = String::new();
        let mut count = 0;

        for delegation in self.all_delegations()? {
            if delegation.shares.is_zero() {
                count += 1;
                let _ = writeln!(
                    msg,
                    "\tdelegation with zero shares: {} -> {}",
                    delegation.delegator, delegation.validator
                );
            }
            if delegation.shares.iter().any(|c| c.amount.is_negative()) {
                count += 1;
                let _ = writeln!(
                    msg,
                    "\tdelegation with negative shares: {} -> {} {}",
                    delegation.delegator, delegation.validator, delegation.shares
                );
            }
        }
        let _ = writeln!(msg, "{} invalid delegations found", count);
        Ok(report("positive delegations", msg, count != 0))
    }

    /// A validator's delegator shares equal the sum of its delegations
    pub fn delegator_shares_invariant(&self) -> Result<InvariantReport> {
        let mut msg = String::new();
        let mut broken = false;

        let mut sums: BTreeMap<_, DecCoins> = BTreeMap::new();
        for delegation in self.all_delegations()? {
            let sum = sums.entry(delegation.validator).or_insert_with(DecCoins::empty);
            *sum = sum.add(&delegation.shares);
        }

        for validator in self.all_validators()? {
            let total = sums.remove(&validator.operator).unwrap_or_else(DecCoins::empty);
            if total != validator.delegator_shares {
                broken = true;
                let _ = writeln!(
                    msg,
                    "\tbroken delegator shares invariance:\n\
                     \tvalidator.delegator_shares: {}\n\
                     \tsum of delegator shares: {}",
                    validator.delegator_shares, total
                );
            }
        }
        for (validator, total) in sums {
            broken = true;
            let _ = writeln!(msg, "\tdelegations {} to missing validator {}", total, validator);
        }
        Ok(report("delegator shares", msg, broken))
    }
}
