//! Staking error type
//!
//! Every failure maps onto one of four kinds (see [`ErrorKind`]). Callers
//! decide what to do by kind: not-found and invalid-request errors go back to
//! whoever sent the message, external failures propagate unchanged, and
//! invariant violations mean the state is corrupt and the node must stop.

use crate::math::CoinError;
use crate::types::UnbondingId;

/// Coarse classification of a [`StakingError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Entity absent; recoverable by the caller
    NotFound,
    /// Malformed or disallowed request
    InvalidRequest,
    /// Corrupted state; the process must abort
    Invariant,
    /// Ledger, swap provider or hook listener failed
    External,
}

/// Error raised by a hook listener
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("hook {hook} failed: {reason}")]
pub struct HookError {
    pub hook: &'static str,
    pub reason: String,
}

impl HookError {
    pub fn new(hook: &'static str, reason: impl Into<String>) -> Self {
        Self {
            hook,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StakingError {
    // not found
    #[error("validator does not exist: {0}")]
    NoValidatorFound(String),

    #[error("no delegation for (address, validator) tuple")]
    NoDelegation,

    #[error("no unbonding delegation found")]
    NoUnbondingDelegation,

    #[error("no redelegation found")]
    NoRedelegation,

    #[error("no delegation migration found")]
    NoMigration,

    #[error("unbonding operation not found: id {0}")]
    UnbondingNotFound(UnbondingId),

    // invalid request
    #[error("validator already exist for this operator address")]
    ValidatorOwnerExists,

    #[error("validator already exist for this pubkey")]
    ValidatorPubKeyExists,

    #[error("invalid coin denomination: got {got}, expected one of {expected:?}")]
    BondDenomNotAllowed { got: String, expected: Vec<String> },

    #[error(transparent)]
    InvalidCoins(#[from] CoinError),

    #[error("invalid description: {0}")]
    InvalidDescription(String),

    #[error("commission must be positive")]
    CommissionNegative,

    #[error("commission cannot be more than 100%")]
    CommissionHuge,

    #[error("commission cannot be more than the max rate")]
    CommissionGtMaxRate,

    #[error("commission cannot be changed more than once in 24h")]
    CommissionUpdateTime,

    #[error("commission change rate must be positive")]
    CommissionChangeRateNegative,

    #[error("commission change rate cannot be more than the max rate")]
    CommissionChangeRateGtMaxRate,

    #[error("commission cannot be changed more than max change rate")]
    CommissionGtMaxChangeRate,

    #[error("commission rate {rate} is lower than minimum {min}")]
    CommissionLtMinRate { rate: String, min: String },

    #[error("cannot delegate to validators with invalid (zero) ex-rate")]
    DelegatorShareExRateInvalid,

    #[error("validator for this address is currently jailed")]
    ValidatorJailed,

    #[error("invalid shares amount")]
    BadSharesAmount,

    #[error("not enough delegation shares")]
    NotEnoughDelegationShares,

    #[error("insufficient delegation shares to compute tokens")]
    InsufficientShares,

    #[error("too few tokens to redelegate (truncates to zero tokens)")]
    TinyRedelegationAmount,

    #[error("cannot redelegate to the same validator")]
    SelfRedelegation,

    #[error("redelegation to this validator already in progress; first redelegation to this validator must complete before next redelegation")]
    TransitiveRedelegation,

    #[error("too many unbonding delegation entries for (delegator, validator) tuple")]
    MaxUnbondingDelegationEntries,

    #[error("too many redelegation entries for (delegator, src-validator, dst-validator) tuple")]
    MaxRedelegationEntries,

    #[error("delegator has no shares of {0} to migrate")]
    NoSharesToMigrate(String),

    #[error("pool not found for denom {0}")]
    PoolNotFound(String),

    #[error("unbonding operation {0} is not on hold")]
    UnbondingOnHoldRefCountNegative(UnbondingId),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // invariant violations
    #[error("state invariant violated: {0}")]
    Invariant(String),

    // external collaborators
    #[error("ledger: {0}")]
    Bank(String),

    #[error("swap: {0}")]
    Swap(String),

    #[error(transparent)]
    Hook(#[from] HookError),
}

impl StakingError {
    pub fn kind(&self) -> ErrorKind {
        use StakingError::*;

        match self {
            NoValidatorFound(_)
            | NoDelegation
            | NoUnbondingDelegation
            | NoRedelegation
            | NoMigration
            | UnbondingNotFound(_) => ErrorKind::NotFound,

            Invariant(_) => ErrorKind::Invariant,

            Bank(_) | Swap(_) | Hook(_) => ErrorKind::External,

            _ => ErrorKind::InvalidRequest,
        }
    }

    /// True for errors after which the state machine must halt
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Invariant
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        StakingError::Invariant(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, StakingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(StakingError::NoDelegation.kind(), ErrorKind::NotFound);
        assert_eq!(StakingError::SelfRedelegation.kind(), ErrorKind::InvalidRequest);
        assert_eq!(
            StakingError::PoolNotFound("ulp".into()).kind(),
            ErrorKind::InvalidRequest
        );
        assert_eq!(StakingError::Bank("insufficient funds".into()).kind(), ErrorKind::External);
        assert!(StakingError::invariant("negative tokens").is_fatal());
        assert!(!StakingError::NoRedelegation.is_fatal());
    }

    #[test]
    fn test_hook_error_wraps() {
        let err: StakingError = HookError::new("before_delegation_created", "rejected").into();
        assert_eq!(err.kind(), ErrorKind::External);
        assert!(err.to_string().contains("before_delegation_created"));
    }
}
