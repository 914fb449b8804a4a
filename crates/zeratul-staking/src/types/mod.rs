//! Core staking types
//!
//! Addresses, keys and the persisted entities: validators, delegations,
//! unbonding delegations, redelegations, delegation migrations and the
//! module parameters.

pub mod delegation;
pub mod genesis;
pub mod migration;
pub mod params;
pub mod validator;

pub use delegation::{
    Delegation, DvPair, DvvTriplet, Redelegation, RedelegationEntry, UnbondingDelegation,
    UnbondingDelegationEntry,
};
pub use genesis::{GenesisState, LastValidatorPower};
pub use migration::DelegationMigration;
pub use params::Params;
pub use validator::{
    BondStatus, Commission, CommissionRates, Description, Validator, ValidatorUpdate,
    DO_NOT_MODIFY_DESC,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Block height
pub type Height = u64;

/// Unix timestamp in milliseconds
pub type Timestamp = u64;

/// Identifier bound to exactly one unbonding operation
pub type UnbondingId = u64;

/// Consensus power is voting power divided by this factor
pub const POWER_REDUCTION: u128 = 1_000_000;

/// Account and validator-operator address
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const LEN: usize = 20;

    /// Deterministic address for a named module account
    pub fn module(name: &str) -> Self {
        Self::derive(b"module", name.as_bytes())
    }

    /// Address derived from a human-readable label (used by genesis tooling
    /// and the simulator to name accounts)
    pub fn from_label(label: &str) -> Self {
        Self::derive(b"account", label.as_bytes())
    }

    fn derive(domain: &[u8], data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        hasher.update(data);
        let hash = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash[..20]);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; 20] = bytes.try_into().ok()?;
        Some(Self(array))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(&self.0[..6]))
    }
}

/// Ed25519 consensus public key
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PubKey(pub [u8; 32]);

impl PubKey {
    /// Consensus address: first 20 bytes of SHA-256 over the key
    pub fn address(&self) -> ConsAddress {
        let hash = Sha256::digest(self.0);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash[..20]);
        ConsAddress(bytes)
    }
}

impl fmt::Debug for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PubKey({})", hex::encode(&self.0[..6]))
    }
}

/// Address the consensus engine knows a validator by
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConsAddress(pub [u8; 20]);

impl ConsAddress {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ConsAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ConsAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConsAddress({})", hex::encode(&self.0[..6]))
    }
}

/// Current block header fields the engine reads
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub height: Height,
    pub time: Timestamp,
}

/// Which kind of operation an unbonding id refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnbondingType {
    UnbondingDelegation,
    Redelegation,
    ValidatorUnbonding,
}
