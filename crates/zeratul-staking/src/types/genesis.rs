//! Genesis state: the complete entity set of the module

use super::{
    Address, Delegation, DelegationMigration, Params, Redelegation, UnbondingDelegation,
    Validator,
};
use serde::{Deserialize, Serialize};

/// Power a validator had in the last broadcast validator set
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastValidatorPower {
    pub address: Address,
    pub power: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisState {
    pub params: Params,
    #[serde(default)]
    pub last_total_power: i64,
    #[serde(default)]
    pub last_validator_powers: Vec<LastValidatorPower>,
    #[serde(default)]
    pub validators: Vec<Validator>,
    #[serde(default)]
    pub delegations: Vec<Delegation>,
    #[serde(default)]
    pub unbonding_delegations: Vec<UnbondingDelegation>,
    #[serde(default)]
    pub redelegations: Vec<Redelegation>,
    #[serde(default)]
    pub migrations: Vec<DelegationMigration>,
    /// Set when the state came out of `export_genesis`; the stored last
    /// powers are then authoritative and no reconciliation runs at import
    #[serde(default)]
    pub exported: bool,
}
