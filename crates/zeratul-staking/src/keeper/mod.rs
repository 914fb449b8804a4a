//! Staking keeper
//!
//! Owns the module store and the ledger handle, and exposes every state
//! transition of the engine. Operations are split by concern:
//!
//! ```text
//! validator.rs         validator table, cons-addr and power indexes, whitelist
//! delegation.rs        delegation / unbonding / redelegation records, queues
//! delegate.rs          delegate, unbond, undelegate, redelegate, complete, cancel
//! val_state_change.rs  per-block validator-set reconciliation, jail/unjail
//! slash.rs             proportional slashing
//! unbonding.rs         unbonding id registry, hold/release
//! migration.rs         LP denomination migration
//! pool.rs              bonded / not-bonded module accounts
//! genesis.rs           import / export
//! invariants.rs        state consistency checks
//! query.rs             read accessors
//! ```
//!
//! ## Transactions
//!
//! Each message runs inside [`Keeper::transact`], which journals store writes
//! and snapshots the ledger, restoring both if the message fails. There is no
//! partial state after an error.

pub mod delegate;
pub mod delegation;
pub mod genesis;
pub mod invariants;
pub mod migration;
pub mod pool;
pub mod query;
pub mod slash;
pub mod unbonding;
pub mod val_state_change;
pub mod validator;

use crate::error::{Result, StakingError};
use crate::expected::{BankKeeper, PoolProvider, VotingPowerWeights};
use crate::hooks::{MultiStakingHooks, StakingHooks};
use crate::math::{Amount, Coins};
use crate::store::{keys, KvStore};
use crate::types::{Address, BlockInfo, Height, Params, Timestamp};
use crate::voting_power::calculate_voting_power;

pub struct Keeper<B> {
    store: KvStore,
    bank: B,
    weights: Box<dyn VotingPowerWeights>,
    pools: Box<dyn PoolProvider>,
    hooks: MultiStakingHooks,
    /// Account allowed to update params and register migrations
    authority: Address,
    block: BlockInfo,
}

impl<B: BankKeeper + Clone> Keeper<B> {
    /// Builds a keeper. Hooks are fixed for the keeper's lifetime and are
    /// invoked in the given order.
    pub fn new(
        bank: B,
        weights: Box<dyn VotingPowerWeights>,
        pools: Box<dyn PoolProvider>,
        hooks: Vec<Box<dyn StakingHooks>>,
        authority: Address,
    ) -> Result<Self> {
        let mut keeper = Self {
            store: KvStore::new(),
            bank,
            weights,
            pools,
            hooks: MultiStakingHooks::new(hooks),
            authority,
            block: BlockInfo::default(),
        };
        keeper.set_params(&Params::default())?;
        Ok(keeper)
    }

    pub fn authority(&self) -> &Address {
        &self.authority
    }

    pub fn block(&self) -> BlockInfo {
        self.block
    }

    /// Moves the keeper to a new block header
    pub fn set_block(&mut self, block: BlockInfo) {
        self.block = block;
    }

    pub fn block_height(&self) -> Height {
        self.block.height
    }

    pub fn block_time(&self) -> Timestamp {
        self.block.time
    }

    pub fn bank(&self) -> &B {
        &self.bank
    }

    pub fn bank_mut(&mut self) -> &mut B {
        &mut self.bank
    }

    pub fn store(&self) -> &KvStore {
        &self.store
    }

    /// Replaces the voting-power weight source. Takes effect at the next
    /// power recomputation.
    pub fn set_weights(&mut self, weights: Box<dyn VotingPowerWeights>) {
        self.weights = weights;
    }

    pub(crate) fn hooks(&self) -> &MultiStakingHooks {
        &self.hooks
    }

    pub fn params(&self) -> Result<Params> {
        Ok(self.store.get(&keys::params_key())?.unwrap_or_default())
    }

    pub fn set_params(&mut self, params: &Params) -> Result<()> {
        params.validate()?;
        self.store.set(keys::params_key(), params)
    }

    /// Voting power of a token basket under the current weights
    pub fn voting_power(&self, tokens: &Coins) -> Result<(Amount, Coins)> {
        let params = self.params()?;
        let weights = self.weights.weights(&params.bond_denoms)?;
        Ok(calculate_voting_power(tokens, &weights))
    }

    /// Runs `f` atomically: on error the store and ledger are restored to
    /// their state before the call.
    pub fn transact<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.store.checkpoint();
        let bank = self.bank.clone();
        let result = f(self);
        if result.is_err() {
            self.store.rollback();
            self.bank = bank;
        } else {
            self.store.commit();
        }
        result
    }

    /// Block time plus the unbonding period
    pub(crate) fn unbonding_completion_time(&self) -> Result<Timestamp> {
        let period = self.params()?.unbonding_time_ms();
        self.block_time().checked_add(period).ok_or_else(|| {
            StakingError::InvalidParams(format!(
                "unbonding period of {}ms overflows block time {}",
                period,
                self.block_time()
            ))
        })
    }
}

impl<B> std::fmt::Debug for Keeper<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keeper")
            .field("block", &self.block)
            .field("entries", &self.store.len())
            .field("hooks", &self.hooks)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::math::{Dec, DecCoin, DecCoins};
    use crate::memory::{MemoryBank, MemoryPools, StaticWeights};
    use crate::types::{Commission, CommissionRates, Description, PubKey, Validator};

    pub const DENOM: &str = "ustake";
    pub const LP_DENOM: &str = "ulp";

    pub fn keeper() -> Keeper<MemoryBank> {
        keeper_with(MemoryPools::new(), Vec::new())
    }

    /// Test keeper over the given pool registry and hook listeners
    pub fn keeper_with(pools: MemoryPools, hooks: Vec<Box<dyn StakingHooks>>) -> Keeper<MemoryBank> {
        let weights = StaticWeights::new(DecCoins::new([
            DecCoin::new(DENOM, Dec::one()),
            DecCoin::new(LP_DENOM, Dec::with_prec(5, 1)),
        ]));
        let mut keeper = Keeper::new(
            MemoryBank::new(),
            Box::new(weights),
            Box::new(pools),
            hooks,
            Address::from_label("gov"),
        )
        .unwrap();

        let params = Params {
            bond_denoms: vec![DENOM.to_string(), LP_DENOM.to_string()],
            unbonding_time: std::time::Duration::from_secs(100),
            max_validators: 2,
            ..Params::default()
        };
        keeper.set_params(&params).unwrap();
        keeper.set_block(BlockInfo { height: 10, time: 1_000_000 });
        keeper
    }

    pub fn addr(label: &str) -> Address {
        Address::from_label(label)
    }

    pub fn pubkey(seed: u8) -> PubKey {
        PubKey([seed; 32])
    }

    pub fn stake(amount: Amount) -> Coins {
        Coins::single(DENOM, amount)
    }

    pub fn commission() -> Commission {
        Commission::new(
            CommissionRates::new(Dec::percent(10), Dec::percent(20), Dec::percent(1)),
            0,
        )
    }

    /// Creates a validator self-delegating `amount` of the stake denom
    pub fn create_validator(keeper: &mut Keeper<MemoryBank>, label: &str, seed: u8, amount: Amount) -> Validator {
        let operator = addr(label);
        keeper.bank_mut().mint(&operator, &stake(amount));
        keeper
            .create_validator(
                operator,
                pubkey(seed),
                Description::new(label),
                commission().rates,
                stake(amount),
            )
            .unwrap();
        keeper.validator(&operator).unwrap()
    }
}
