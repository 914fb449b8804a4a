//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::time::Duration;
use zeratul_staking::types::{CommissionRates, Description};
use zeratul_staking::{
    Address, BlockInfo, Coins, Dec, DecCoin, DecCoins, Keeper, MemoryBank, MemoryPools, Params,
    PubKey, StakingHooks, StaticWeights, Validator,
};

pub const STAKE: &str = "stake";
pub const LP: &str = "ulp";

/// Unbonding period used by every fixture, in ms
pub const UNBONDING_MS: u64 = 21 * 24 * 3600 * 1000;

pub fn params() -> Params {
    Params {
        bond_denoms: vec![STAKE.to_string(), LP.to_string()],
        unbonding_time: Duration::from_millis(UNBONDING_MS),
        max_validators: 3,
        ..Params::default()
    }
}

pub fn keeper_with_hooks(hooks: Vec<Box<dyn StakingHooks>>) -> anyhow::Result<Keeper<MemoryBank>> {
    let weights = StaticWeights::new(DecCoins::new([
        DecCoin::new(STAKE, Dec::one()),
        DecCoin::new(LP, Dec::with_prec(5, 1)),
    ]));
    let mut keeper = Keeper::new(
        MemoryBank::new(),
        Box::new(weights),
        Box::new(MemoryPools::new()),
        hooks,
        Address::from_label("gov"),
    )?;
    keeper.set_params(&params())?;
    keeper.set_block(BlockInfo { height: 1, time: 1_700_000_000_000 });
    Ok(keeper)
}

pub fn keeper() -> anyhow::Result<Keeper<MemoryBank>> {
    keeper_with_hooks(Vec::new())
}

pub fn stake(amount: u128) -> Coins {
    Coins::single(STAKE, amount)
}

pub fn shares(amount: u128) -> DecCoins {
    DecCoins::single(STAKE, Dec::from_int(amount))
}

/// Funds `label` and registers it as a validator self-delegating `amount`
pub fn validator(keeper: &mut Keeper<MemoryBank>, label: &str, seed: u8, amount: u128) -> anyhow::Result<Validator> {
    let operator = Address::from_label(label);
    keeper.bank_mut().mint(&operator, &stake(amount));
    let rates = CommissionRates::new(Dec::percent(5), Dec::percent(20), Dec::percent(1));
    Ok(keeper.create_validator(operator, PubKey([seed; 32]), Description::new(label), rates, stake(amount))?)
}

/// Moves to the next block, `dt_ms` later
pub fn advance(keeper: &mut Keeper<MemoryBank>, dt_ms: u64) {
    let block = keeper.block();
    keeper.set_block(BlockInfo {
        height: block.height + 1,
        time: block.time + dt_ms,
    });
}
