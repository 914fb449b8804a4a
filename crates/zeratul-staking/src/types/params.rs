//! Module parameters

use crate::error::{Result, StakingError};
use crate::math::{validate_denom, Amount, Dec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// 21 days
const DEFAULT_UNBONDING_TIME: Duration = Duration::from_secs(60 * 60 * 24 * 7 * 3);

/// Roughly a century
pub const MAX_UNBONDING_TIME: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 100);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    /// Delay between starting an unbonding and its completion
    pub unbonding_time: Duration,

    /// Size of the active validator set
    pub max_validators: u32,

    /// Max entries per unbonding delegation / redelegation record
    pub max_entries: u32,

    /// Number of historical headers kept by the host chain
    pub historical_entries: u32,

    /// Denominations accepted as stake
    pub bond_denoms: Vec<String>,

    /// Raw voting power a validator needs to stay whitelisted
    pub min_voting_power: Amount,

    pub min_commission_rate: Dec,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            unbonding_time: DEFAULT_UNBONDING_TIME,
            max_validators: 100,
            max_entries: 7,
            historical_entries: 10_000,
            bond_denoms: vec!["ustake".to_string()],
            min_voting_power: 1_000_000,
            min_commission_rate: Dec::zero(),
        }
    }
}

impl Params {
    /// Unbonding delay in milliseconds
    pub fn unbonding_time_ms(&self) -> u64 {
        u64::try_from(self.unbonding_time.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn is_bond_denom(&self, denom: &str) -> bool {
        self.bond_denoms.iter().any(|d| d == denom)
    }

    pub fn validate(&self) -> Result<()> {
        if self.unbonding_time.is_zero() {
            return Err(StakingError::InvalidParams(
                "unbonding time must be positive".into(),
            ));
        }
        if self.unbonding_time > MAX_UNBONDING_TIME {
            return Err(StakingError::InvalidParams(format!(
                "unbonding time {:?} exceeds the maximum of {:?}",
                self.unbonding_time, MAX_UNBONDING_TIME
            )));
        }
        if self.max_validators == 0 {
            return Err(StakingError::InvalidParams(
                "max validators must be positive".into(),
            ));
        }
        if self.max_entries == 0 {
            return Err(StakingError::InvalidParams(
                "max entries must be positive".into(),
            ));
        }
        if self.bond_denoms.is_empty() {
            return Err(StakingError::InvalidParams(
                "bond denoms cannot be empty".into(),
            ));
        }

        let mut seen = BTreeSet::new();
        for denom in &self.bond_denoms {
            validate_denom(denom)
                .map_err(|e| StakingError::InvalidParams(e.to_string()))?;
            if !seen.insert(denom) {
                return Err(StakingError::InvalidParams(format!(
                    "duplicate bond denom {}",
                    denom
                )));
            }
        }

        if self.min_commission_rate.is_negative() || self.min_commission_rate > Dec::one() {
            return Err(StakingError::InvalidParams(format!(
                "minimum commission rate out of range: {}",
                self.min_commission_rate
            )));
        }
        Ok(())
    }
}
