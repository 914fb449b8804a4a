//! Transaction messages and their handlers
//!
//! Every message is checked statelessly with `validate_basic` and then
//! executed inside [`Keeper::transact`], so a handler either applies fully or
//! not at all.

use crate::error::{Result, StakingError};
use crate::expected::BankKeeper;
use crate::keeper::Keeper;
use crate::math::{Coin, Coins, Dec, DecCoins};
use crate::types::{
    Address, BondStatus, CommissionRates, DelegationMigration, Description, Height, Params, PubKey,
    Timestamp,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

fn validate_amount(amount: &Coins) -> Result<()> {
    if amount.is_empty() {
        return Err(StakingError::InvalidRequest("amount cannot be empty".into()));
    }
    Coins::validate(amount.as_slice())?;
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCreateValidator {
    pub description: Description,
    pub commission: CommissionRates,
    pub validator_address: Address,
    pub pubkey: PubKey,
    pub amount: Coins,
}

impl MsgCreateValidator {
    pub fn validate_basic(&self) -> Result<()> {
        if self.description.moniker.is_empty() {
            return Err(StakingError::InvalidDescription("empty moniker".into()));
        }
        self.description.ensure_length()?;
        self.commission.validate()?;
        validate_amount(&self.amount)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgEditValidator {
    pub description: Description,
    pub validator_address: Address,
    #[serde(default)]
    pub commission_rate: Option<Dec>,
}

impl MsgEditValidator {
    pub fn validate_basic(&self) -> Result<()> {
        if let Some(rate) = &self.commission_rate {
            if rate.is_negative() {
                return Err(StakingError::CommissionNegative);
            }
            if *rate > Dec::one() {
                return Err(StakingError::CommissionHuge);
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgDelegate {
    pub delegator_address: Address,
    pub validator_address: Address,
    pub amount: Coins,
}

impl MsgDelegate {
    pub fn validate_basic(&self) -> Result<()> {
        validate_amount(&self.amount)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgUndelegate {
    pub delegator_address: Address,
    pub validator_address: Address,
    pub amount: Coins,
}

impl MsgUndelegate {
    pub fn validate_basic(&self) -> Result<()> {
        validate_amount(&self.amount)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgUndelegateResponse {
    pub completion_time: Timestamp,
    pub amount: Coins,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgBeginRedelegate {
    pub delegator_address: Address,
    pub validator_src_address: Address,
    pub validator_dst_address: Address,
    pub amount: Coins,
}

impl MsgBeginRedelegate {
    pub fn validate_basic(&self) -> Result<()> {
        if self.validator_src_address == self.validator_dst_address {
            return Err(StakingError::SelfRedelegation);
        }
        validate_amount(&self.amount)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgBeginRedelegateResponse {
    pub completion_time: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCancelUnbondingDelegation {
    pub delegator_address: Address,
    pub validator_address: Address,
    pub amount: Coins,
    pub creation_height: Height,
}

impl MsgCancelUnbondingDelegation {
    pub fn validate_basic(&self) -> Result<()> {
        if self.creation_height == 0 {
            return Err(StakingError::InvalidRequest(
                "invalid height for cancel unbonding delegation".into(),
            ));
        }
        validate_amount(&self.amount)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgRegisterMigration {
    pub authority: Address,
    pub migration: DelegationMigration,
}

impl MsgRegisterMigration {
    pub fn validate_basic(&self) -> Result<()> {
        let m = &self.migration;
        for denom in [&m.lp_denom_in, &m.lp_denom_out, &m.denom_in, &m.denom_out] {
            crate::math::validate_denom(denom)?;
        }
        if m.lp_denom_in == m.lp_denom_out {
            return Err(StakingError::InvalidRequest(
                "migration source and destination are the same".into(),
            ));
        }
        if m.swap_contract_module.is_empty() {
            return Err(StakingError::InvalidRequest("empty swap contract module".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgMigrateDelegation {
    pub delegator_address: Address,
    pub validator_address: Address,
    pub lp_denom_in: String,
    pub lp_denom_out: String,
    pub new_delegator_address: Address,
}

impl MsgMigrateDelegation {
    pub fn validate_basic(&self) -> Result<()> {
        crate::math::validate_denom(&self.lp_denom_in)?;
        crate::math::validate_denom(&self.lp_denom_out)?;
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgMigrateDelegationResponse {
    pub amount: Coin,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgUpdateParams {
    pub authority: Address,
    pub params: Params,
}

impl MsgUpdateParams {
    pub fn validate_basic(&self) -> Result<()> {
        self.params.validate()
    }
}

/// Any transaction message, keyed by kind. Externally tagged: amounts are
/// u128, which self-describing formats cannot buffer for an internal tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Msg {
    CreateValidator(MsgCreateValidator),
    EditValidator(MsgEditValidator),
    Delegate(MsgDelegate),
    Undelegate(MsgUndelegate),
    BeginRedelegate(MsgBeginRedelegate),
    CancelUnbondingDelegation(MsgCancelUnbondingDelegation),
    RegisterMigration(MsgRegisterMigration),
    MigrateDelegation(MsgMigrateDelegation),
    UpdateParams(MsgUpdateParams),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MsgResponse {
    Empty,
    Undelegate(MsgUndelegateResponse),
    BeginRedelegate(MsgBeginRedelegateResponse),
    MigrateDelegation(MsgMigrateDelegationResponse),
}

impl Msg {
    pub fn validate_basic(&self) -> Result<()> {
        match self {
            Msg::CreateValidator(m) => m.validate_basic(),
            Msg::EditValidator(m) => m.validate_basic(),
            Msg::Delegate(m) => m.validate_basic(),
            Msg::Undelegate(m) => m.validate_basic(),
            Msg::BeginRedelegate(m) => m.validate_basic(),
            Msg::CancelUnbondingDelegation(m) => m.validate_basic(),
            Msg::RegisterMigration(m) => m.validate_basic(),
            Msg::MigrateDelegation(m) => m.validate_basic(),
            Msg::UpdateParams(m) => m.validate_basic(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Msg::CreateValidator(_) => "create_validator",
            Msg::EditValidator(_) => "edit_validator",
            Msg::Delegate(_) => "delegate",
            Msg::Undelegate(_) => "undelegate",
            Msg::BeginRedelegate(_) => "begin_redelegate",
            Msg::CancelUnbondingDelegation(_) => "cancel_unbonding_delegation",
            Msg::RegisterMigration(_) => "register_migration",
            Msg::MigrateDelegation(_) => "migrate_delegation",
            Msg::UpdateParams(_) => "update_params",
        }
    }
}

/// Message handlers over a keeper
pub struct MsgServer<'a, B> {
    keeper: &'a mut Keeper<B>,
}

impl<'a, B: BankKeeper + Clone> MsgServer<'a, B> {
    pub fn new(keeper: &'a mut Keeper<B>) -> Self {
        Self { keeper }
    }

    /// Validates and executes `msg` atomically
    pub fn handle(&mut self, msg: Msg) -> Result<MsgResponse> {
        msg.validate_basic()?;
        debug!(msg = msg.name(), "handling message");
        match msg {
            Msg::CreateValidator(m) => self.create_validator(m).map(|_| MsgResponse::Empty),
            Msg::EditValidator(m) => self.edit_validator(m).map(|_| MsgResponse::Empty),
            Msg::Delegate(m) => self.delegate(m).map(|_| MsgResponse::Empty),
            Msg::Undelegate(m) => self.undelegate(m).map(MsgResponse::Undelegate),
            Msg::BeginRedelegate(m) => self.begin_redelegate(m).map(MsgResponse::BeginRedelegate),
            Msg::CancelUnbondingDelegation(m) => {
                self.cancel_unbonding_delegation(m).map(|_| MsgResponse::Empty)
            }
            Msg::RegisterMigration(m) => self.register_migration(m).map(|_| MsgResponse::Empty),
            Msg::MigrateDelegation(m) => self.migrate_delegation(m).map(MsgResponse::MigrateDelegation),
            Msg::UpdateParams(m) => self.update_params(m).map(|_| MsgResponse::Empty),
        }
    }

    fn ensure_authority(&self, signer: &Address) -> Result<()> {
        if signer != self.keeper.authority() {
            return Err(StakingError::Unauthorized(format!(
                "invalid authority; expected {}, got {}",
                self.keeper.authority(),
                signer
            )));
        }
        Ok(())
    }

    pub fn create_validator(&mut self, msg: MsgCreateValidator) -> Result<()> {
        self.keeper.transact(|k| {
            k.create_validator(
                msg.validator_address,
                msg.pubkey,
                msg.description,
                msg.commission,
                msg.amount,
            )
            .map(|_| ())
        })
    }

    pub fn edit_validator(&mut self, msg: MsgEditValidator) -> Result<()> {
        self.keeper.transact(|k| {
            k.edit_validator(&msg.validator_address, &msg.description, msg.commission_rate)
                .map(|_| ())
        })
    }

    pub fn delegate(&mut self, msg: MsgDelegate) -> Result<DecCoins> {
        self.keeper.transact(|k| {
            k.ensure_bond_denoms(&msg.amount)?;
            let validator = k.validator(&msg.validator_address)?;
            k.delegate(
                &msg.delegator_address,
                &msg.amount,
                BondStatus::Unbonded,
                validator,
                true,
            )
        })
    }

    pub fn undelegate(&mut self, msg: MsgUndelegate) -> Result<MsgUndelegateResponse> {
        self.keeper.transact(|k| {
            k.ensure_bond_denoms(&msg.amount)?;
            let shares =
                k.validate_unbond_amount(&msg.delegator_address, &msg.validator_address, &msg.amount)?;
            let (completion_time, amount) =
                k.undelegate(&msg.delegator_address, &msg.validator_address, &shares)?;
            Ok(MsgUndelegateResponse { completion_time, amount })
        })
    }

    pub fn begin_redelegate(&mut self, msg: MsgBeginRedelegate) -> Result<MsgBeginRedelegateResponse> {
        self.keeper.transact(|k| {
            k.ensure_bond_denoms(&msg.amount)?;
            let shares = k.validate_unbond_amount(
                &msg.delegator_address,
                &msg.validator_src_address,
                &msg.amount,
            )?;
            let completion_time = k.begin_redelegation(
                &msg.delegator_address,
                &msg.validator_src_address,
                &msg.validator_dst_address,
                &shares,
            )?;
            Ok(MsgBeginRedelegateResponse { completion_time })
        })
    }

    pub fn cancel_unbonding_delegation(&mut self, msg: MsgCancelUnbondingDelegation) -> Result<DecCoins> {
        self.keeper.transact(|k| {
            k.ensure_bond_denoms(&msg.amount)?;
            k.cancel_unbonding_delegation(
                &msg.delegator_address,
                &msg.validator_address,
                &msg.amount,
                msg.creation_height,
            )
        })
    }

    pub fn register_migration(&mut self, msg: MsgRegisterMigration) -> Result<()> {
        self.ensure_authority(&msg.authority)?;
        self.keeper.transact(|k| k.register_migration(msg.migration))
    }

    pub fn migrate_delegation(&mut self, msg: MsgMigrateDelegation) -> Result<MsgMigrateDelegationResponse> {
        self.keeper.transact(|k| {
            let amount = k.migrate_delegation(
                &msg.delegator_address,
                &msg.validator_address,
                &msg.lp_denom_in,
                &msg.lp_denom_out,
                &msg.new_delegator_address,
            )?;
            Ok(MsgMigrateDelegationResponse { amount })
        })
    }

    pub fn update_params(&mut self, msg: MsgUpdateParams) -> Result<()> {
        self.ensure_authority(&msg.authority)?;
        self.keeper.transact(|k| k.set_params(&msg.params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keeper::testutil::*;

    fn create_msg(label: &str, seed: u8, amount: u128) -> Msg {
        Msg::CreateValidator(MsgCreateValidator {
            description: Description::new(label),
            commission: commission().rates,
            validator_address: addr(label),
            pubkey: pubkey(seed),
            amount: stake(amount),
        })
    }

    #[test]
    fn test_create_and_undelegate_through_server() {
        let mut keeper = keeper();
        keeper.bank_mut().mint(&addr("a"), &stake(3_000_000));

        let mut server = MsgServer::new(&mut keeper);
        assert_eq!(server.handle(create_msg("a", 1, 3_000_000)).unwrap(), MsgResponse::Empty);

        let response = server
            .handle(Msg::Undelegate(MsgUndelegate {
                delegator_address: addr("a"),
                validator_address: addr("a"),
                amount: stake(1_000_000),
            }))
            .unwrap();
        match response {
            MsgResponse::Undelegate(r) => {
                assert_eq!(r.amount, stake(1_000_000));
                assert_eq!(r.completion_time, 1_000_000 + 100_000);
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_failed_message_persists_nothing() {
        let mut keeper = keeper();
        // only enough for half the self-delegation
        keeper.bank_mut().mint(&addr("a"), &stake(1_000_000));
        let before = keeper.store().clone();

        let err = MsgServer::new(&mut keeper)
            .handle(create_msg("a", 1, 2_000_000))
            .unwrap_err();
        assert!(matches!(err, StakingError::Bank(_)));
        assert_eq!(keeper.store(), &before);
        assert!(keeper.get_validator(&addr("a")).unwrap().is_none());
    }

    #[test]
    fn test_authority_checked() {
        let mut keeper = keeper();
        let params = keeper.params().unwrap();
        let mut server = MsgServer::new(&mut keeper);

        let err = server
            .handle(Msg::UpdateParams(MsgUpdateParams {
                authority: addr("mallory"),
                params: params.clone(),
            }))
            .unwrap_err();
        assert!(matches!(err, StakingError::Unauthorized(_)));

        let mut updated = params;
        updated.max_validators = 50;
        server
            .handle(Msg::UpdateParams(MsgUpdateParams {
                authority: addr("gov"),
                params: updated,
            }))
            .unwrap();
        assert_eq!(keeper.params().unwrap().max_validators, 50);
    }

    #[test]
    fn test_validate_basic() {
        let empty = Msg::Delegate(MsgDelegate {
            delegator_address: addr("d"),
            validator_address: addr("v"),
            amount: Coins::empty(),
        });
        assert!(empty.validate_basic().is_err());

        let rate = MsgEditValidator {
            description: Description::new("v"),
            validator_address: addr("v"),
            commission_rate: Some(Dec::percent(101)),
        };
        assert_eq!(rate.validate_basic().unwrap_err(), StakingError::CommissionHuge);

        let self_redelegation = MsgBeginRedelegate {
            delegator_address: addr("d"),
            validator_src_address: addr("v"),
            validator_dst_address: addr("v"),
            amount: stake(1),
        };
        assert_eq!(
            self_redelegation.validate_basic().unwrap_err(),
            StakingError::SelfRedelegation
        );
    }
}
