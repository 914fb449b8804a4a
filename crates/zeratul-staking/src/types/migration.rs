//! Delegation migration between LP denominations

use super::Address;
use serde::{Deserialize, Serialize};

/// How to convert stake held in one LP denomination into another. Keyed by
/// the pool identifiers of the two LP tokens; re-registering overwrites.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationMigration {
    pub lp_denom_in: String,
    pub lp_denom_out: String,
    /// Underlying asset of the source pool
    pub denom_in: String,
    /// Underlying asset of the destination pool
    pub denom_out: String,
    /// Entry point executing the conversion
    pub swap_contract_address: Address,
    pub swap_contract_module: String,
}
