//! End-to-end delegation lifecycle against the in-memory collaborators
//!
//! Covers:
//! 1. first deposit issues shares 1:1
//! 2. undelegate, wait out the unbonding period, complete
//! 3. redelegate between bonded validators and complete
//! 4. slash at the current height
//! 5. migration registration against unknown pools

mod common;

use anyhow::Result;
use common::*;
use zeratul_staking::types::DelegationMigration;
use zeratul_staking::{Address, BankKeeper, BondStatus, Dec, ErrorKind, StakingError};

#[test]
fn test_first_delegation_issues_shares_one_to_one() -> Result<()> {
    let mut keeper = keeper()?;
    let val = validator(&mut keeper, "val", 1, 1_000_000)?;
    let alice = Address::from_label("alice");
    keeper.bank_mut().mint(&alice, &stake(1_000_000));

    let issued = keeper.delegate(&alice, &stake(1_000_000), BondStatus::Unbonded, val.clone(), true)?;
    assert_eq!(issued, shares(1_000_000));
    assert_eq!(keeper.delegation(&alice, &val.operator)?.shares, shares(1_000_000));
    assert_eq!(keeper.bank().balance(&alice, STAKE), 0);
    Ok(())
}

#[test]
fn test_undelegate_and_complete_after_unbonding_period() -> Result<()> {
    let mut keeper = keeper()?;
    let val = validator(&mut keeper, "val", 1, 2_000_000)?;
    keeper.end_block()?;

    let alice = Address::from_label("alice");
    keeper.bank_mut().mint(&alice, &stake(1_000_000));
    let current = keeper.validator(&val.operator)?;
    keeper.delegate(&alice, &stake(1_000_000), BondStatus::Unbonded, current, true)?;

    let (completion, amount) = keeper.undelegate(&alice, &val.operator, &shares(500_000))?;
    assert_eq!(amount, stake(500_000));
    assert_eq!(completion, keeper.block_time() + UNBONDING_MS);
    assert_eq!(keeper.not_bonded_pool_balance(), stake(500_000));

    advance(&mut keeper, UNBONDING_MS);
    let paid = keeper.complete_unbonding(&alice, &val.operator)?;
    assert_eq!(paid, stake(500_000));
    assert!(keeper.get_unbonding_delegation(&alice, &val.operator)?.is_none());
    assert_eq!(keeper.bank().balance(&alice, STAKE), 500_000);

    // the queue still holds the pair; draining it twice changes nothing
    keeper.end_block()?;
    advance(&mut keeper, 1);
    keeper.end_block()?;
    assert_eq!(keeper.bank().balance(&alice, STAKE), 500_000);
    assert_eq!(keeper.delegation(&alice, &val.operator)?.shares, shares(500_000));
    Ok(())
}

#[test]
fn test_unbonding_matures_through_end_block() -> Result<()> {
    let mut keeper = keeper()?;
    let val = validator(&mut keeper, "val", 1, 2_000_000)?;
    keeper.end_block()?;

    keeper.undelegate(&val.operator, &val.operator, &shares(500_000))?;
    advance(&mut keeper, UNBONDING_MS - 1);
    keeper.end_block()?;
    assert!(keeper.get_unbonding_delegation(&val.operator, &val.operator)?.is_some());

    advance(&mut keeper, 1);
    keeper.end_block()?;
    assert!(keeper.get_unbonding_delegation(&val.operator, &val.operator)?.is_none());
    assert_eq!(keeper.bank().balance(&val.operator, STAKE), 500_000);
    Ok(())
}

#[test]
fn test_redelegation_between_bonded_validators() -> Result<()> {
    let mut keeper = keeper()?;
    let src = validator(&mut keeper, "src", 1, 2_000_000)?;
    let dst = validator(&mut keeper, "dst", 2, 2_000_000)?;
    keeper.end_block()?;

    let alice = Address::from_label("alice");
    keeper.bank_mut().mint(&alice, &stake(1_000_000));
    let current = keeper.validator(&src.operator)?;
    keeper.delegate(&alice, &stake(1_000_000), BondStatus::Unbonded, current, true)?;

    let completion = keeper.begin_redelegation(&alice, &src.operator, &dst.operator, &shares(400_000))?;
    assert_eq!(completion, keeper.block_time() + UNBONDING_MS);
    assert_eq!(keeper.delegation(&alice, &dst.operator)?.shares, shares(400_000));

    // stake that just arrived cannot hop again
    let hop = keeper.begin_redelegation(&alice, &dst.operator, &src.operator, &shares(100_000));
    assert_eq!(hop.unwrap_err(), StakingError::TransitiveRedelegation);

    advance(&mut keeper, UNBONDING_MS);
    let pool = keeper.pool();
    let released = keeper.complete_redelegation(&alice, &src.operator, &dst.operator)?;
    assert_eq!(released, stake(400_000));
    assert_eq!(keeper.pool(), pool);
    assert!(keeper.get_redelegation(&alice, &src.operator, &dst.operator)?.is_none());
    Ok(())
}

#[test]
fn test_slash_at_current_height() -> Result<()> {
    let mut keeper = keeper()?;
    let val = validator(&mut keeper, "val", 1, 10_000_000)?;
    let updates = keeper.end_block()?;
    assert_eq!(updates[0].power, 10);

    let tokens = keeper.validator(&val.operator)?.tokens;
    let bonded_before = keeper.bonded_pool_balance();
    keeper.slash(&val.cons_address(), keeper.block_height(), &Dec::percent(50))?;

    let burned = tokens.mul_dec_truncate(&Dec::percent(50));
    assert_eq!(bonded_before.checked_sub(&burned), Some(keeper.bonded_pool_balance()));

    advance(&mut keeper, 1_000);
    let updates = keeper.end_block()?;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].power, 5);
    Ok(())
}

#[test]
fn test_register_migration_with_unknown_pool() -> Result<()> {
    let mut keeper = keeper()?;
    let err = keeper
        .register_migration(DelegationMigration {
            lp_denom_in: LP.into(),
            lp_denom_out: "ulp2".into(),
            denom_in: "uusdc".into(),
            denom_out: "uusdc".into(),
            swap_contract_address: Address::from_label("router"),
            swap_contract_module: "dex".into(),
        })
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert!(err.to_string().contains(LP));
    Ok(())
}

#[test]
fn test_lp_stake_counts_at_its_weight() -> Result<()> {
    let mut keeper = keeper()?;
    let op = Address::from_label("lp-val");
    let lp = zeratul_staking::Coins::single(LP, 8_000_000);
    keeper.bank_mut().mint(&op, &lp);
    let val = keeper.create_validator(
        op,
        zeratul_staking::PubKey([7; 32]),
        zeratul_staking::types::Description::new("lp-val"),
        zeratul_staking::types::CommissionRates::new(Dec::percent(5), Dec::percent(20), Dec::percent(1)),
        lp,
    )?;
    assert_eq!(val.voting_power, 4_000_000);

    let updates = keeper.end_block()?;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].power, 4);
    Ok(())
}
