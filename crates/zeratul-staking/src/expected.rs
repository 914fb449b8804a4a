//! Collaborators the staking engine consumes
//!
//! The engine never holds balances itself. Token custody lives in an external
//! ledger reached through [`BankKeeper`]; voting-power weights and LP pool
//! conversions come from providers the host chain wires in.
//!
//! ```text
//!   delegator ──send──▶ bonded_tokens_pool ◀──transfer──▶ not_bonded_tokens_pool
//!                              │                                 │
//!                              └────────────── burn ─────────────┘
//! ```

use crate::error::Result;
use crate::math::{Amount, Coin, Coins, DecCoins};
use crate::types::{Address, DelegationMigration};

/// Module account holding tokens of bonded validators
pub const BONDED_POOL_NAME: &str = "bonded_tokens_pool";

/// Module account holding tokens of unbonding/unbonded validators and of
/// unbonding delegations
pub const NOT_BONDED_POOL_NAME: &str = "not_bonded_tokens_pool";

/// Account/bank ledger
///
/// Implementations must be `Clone` so a transactional context can snapshot
/// and restore them together with the store.
pub trait BankKeeper {
    fn balance(&self, addr: &Address, denom: &str) -> Amount;

    fn balances(&self, addr: &Address) -> Coins;

    /// Moves `amount` between two accounts (user or module). Fails without
    /// side effects if `from` cannot cover it.
    fn send_coins(&mut self, from: &Address, to: &Address, amount: &Coins) -> Result<()>;

    /// Destroys `amount` held by `from`
    fn burn_coins(&mut self, from: &Address, amount: &Coins) -> Result<()>;
}

/// Per-denomination voting-power weights
///
/// Weights may change between calls; the engine never caches them.
pub trait VotingPowerWeights {
    fn weights(&self, bond_denoms: &[String]) -> Result<DecCoins>;
}

/// LP pool lookup and conversion, used by delegation migration
pub trait PoolProvider {
    /// Pool metadata identifier backing an LP denomination
    fn pool_id(&self, lp_denom: &str) -> Option<String>;

    /// Converts `offer` (in `migration.lp_denom_in`) held by `trader` into
    /// `migration.lp_denom_out`, crediting the output to `trader`. Returns
    /// the output coin.
    fn convert(
        &self,
        bank: &mut dyn BankKeeper,
        migration: &DelegationMigration,
        trader: &Address,
        offer: &Coin,
    ) -> Result<Coin>;
}
