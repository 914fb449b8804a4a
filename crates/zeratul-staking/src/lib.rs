//! Multi-denomination proof-of-stake staking engine
//!
//! Validators accept stake in several bond denominations at once. Each
//! denomination carries a weight, and a validator's voting power is the
//! weighted sum of its tokens. Every block the engine recomputes powers,
//! picks the top `max_validators` and reports the changes to consensus.
//!
//! ## Features
//!
//! - **Per-denomination shares**: delegations hold shares per denomination
//!   with 18-decimal fixed point exchange rates
//! - **Maturity queues**: unbonding delegations, redelegations and validator
//!   unbondings complete once time and height have passed
//! - **Holds**: external consumers pause any unbonding by id and release it
//!   later
//! - **Slashing**: proportional burn including stake that left after the
//!   infraction
//! - **Migration**: move stake from one LP denomination to another through a
//!   swap, keeping it with the same validator
//!
//! ## Architecture
//!
//! ```text
//!   MsgServer ──────────┐
//!   (transact)          │
//!                       ▼
//!   end_block ──────▶ Keeper ──────▶ KvStore (bincode, ordered keys)
//!   slash / jail        │
//!   hold / release      ├──────────▶ BankKeeper         (ledger)
//!                       ├──────────▶ VotingPowerWeights (oracle)
//!                       ├──────────▶ PoolProvider       (LP swaps)
//!                       └──────────▶ MultiStakingHooks  (listeners)
//! ```

pub mod error;
pub mod expected;
pub mod hooks;
pub mod keeper;
pub mod math;
pub mod memory;
pub mod msg_server;
pub mod store;
pub mod types;
pub mod voting_power;

pub use error::{ErrorKind, HookError, Result, StakingError};
pub use expected::{BankKeeper, PoolProvider, VotingPowerWeights};
pub use hooks::{MultiStakingHooks, StakingHooks};
pub use keeper::invariants::InvariantReport;
pub use keeper::query::{Pool, UnbondingEntry};
pub use keeper::Keeper;
pub use math::{Amount, Coin, Coins, Dec, DecCoin, DecCoins};
pub use memory::{MemoryBank, MemoryPools, StaticWeights};
pub use msg_server::{Msg, MsgResponse, MsgServer};
pub use types::{
    Address, BlockInfo, BondStatus, ConsAddress, Delegation, GenesisState, Params, PubKey,
    Redelegation, UnbondingDelegation, Validator, ValidatorUpdate,
};
pub use voting_power::calculate_voting_power;
