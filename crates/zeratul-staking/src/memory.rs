//! In-memory collaborators
//!
//! Reference implementations of the ledger, weight provider and pool
//! provider. Tests and the simulator run the engine on these.

use crate::error::{Result, StakingError};
use crate::expected::{BankKeeper, PoolProvider, VotingPowerWeights};
use crate::math::{Amount, Coin, Coins, Dec, DecCoin, DecCoins};
use crate::types::{Address, DelegationMigration};
use std::collections::BTreeMap;

/// Balance table keyed by address
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryBank {
    balances: BTreeMap<Address, Coins>,
    burned: Coins,
}

impl MemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credits `amount` out of thin air (genesis accounts, test setup)
    pub fn mint(&mut self, addr: &Address, amount: &Coins) {
        let entry = self.balances.entry(*addr).or_default();
        *entry = entry.add(amount);
    }

    /// Everything burned so far
    pub fn burned(&self) -> &Coins {
        &self.burned
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&Address, &Coins)> {
        self.balances.iter()
    }

    fn debit(&mut self, addr: &Address, amount: &Coins) -> Result<()> {
        let current = self.balances.get(addr).cloned().unwrap_or_default();
        let remaining = current.checked_sub(amount).ok_or_else(|| {
            StakingError::Bank(format!(
                "insufficient funds: {} has {}, needs {}",
                addr, current, amount
            ))
        })?;
        if remaining.is_empty() {
            self.balances.remove(addr);
        } else {
            self.balances.insert(*addr, remaining);
        }
        Ok(())
    }
}

impl BankKeeper for MemoryBank {
    fn balance(&self, addr: &Address, denom: &str) -> Amount {
        self.balances
            .get(addr)
            .map(|c| c.amount_of(denom))
            .unwrap_or(0)
    }

    fn balances(&self, addr: &Address) -> Coins {
        self.balances.get(addr).cloned().unwrap_or_default()
    }

    fn send_coins(&mut self, from: &Address, to: &Address, amount: &Coins) -> Result<()> {
        if amount.is_empty() {
            return Ok(());
        }
        self.debit(from, amount)?;
        self.mint(to, amount);
        Ok(())
    }

    fn burn_coins(&mut self, from: &Address, amount: &Coins) -> Result<()> {
        if amount.is_empty() {
            return Ok(());
        }
        self.debit(from, amount)?;
        self.burned = self.burned.add(amount);
        Ok(())
    }
}

/// Fixed weight table
#[derive(Clone, Debug, Default)]
pub struct StaticWeights {
    weights: DecCoins,
}

impl StaticWeights {
    pub fn new(weights: DecCoins) -> Self {
        Self { weights }
    }

    /// Weight 1 for each listed denomination
    pub fn uniform<'a>(denoms: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(DecCoins::new(
            denoms.into_iter().map(|d| DecCoin::new(d, Dec::one())),
        ))
    }
}

impl VotingPowerWeights for StaticWeights {
    fn weights(&self, bond_denoms: &[String]) -> Result<DecCoins> {
        Ok(DecCoins::new(
            self.weights
                .iter()
                .filter(|w| bond_denoms.contains(&w.denom))
                .cloned(),
        ))
    }
}

/// A registered LP pool
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryPool {
    pub id: String,
    /// Account holding the pool's reserves
    pub reserve: Address,
}

/// Pool registry with fixed conversion rates between LP denominations
#[derive(Clone, Debug, Default)]
pub struct MemoryPools {
    pools: BTreeMap<String, MemoryPool>,
    rates: BTreeMap<(String, String), Dec>,
}

impl MemoryPools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `lp_denom` under pool `id`. Its reserve account is derived
    /// from the id.
    pub fn add_pool(&mut self, lp_denom: impl Into<String>, id: impl Into<String>) -> Address {
        let id = id.into();
        let reserve = Address::module(&format!("pool/{}", id));
        self.pools.insert(lp_denom.into(), MemoryPool { id, reserve });
        reserve
    }

    /// Output per unit of input when converting `from` into `to`
    pub fn set_rate(&mut self, from: impl Into<String>, to: impl Into<String>, rate: Dec) {
        self.rates.insert((from.into(), to.into()), rate);
    }

    pub fn pool(&self, lp_denom: &str) -> Option<&MemoryPool> {
        self.pools.get(lp_denom)
    }
}

impl PoolProvider for MemoryPools {
    fn pool_id(&self, lp_denom: &str) -> Option<String> {
        self.pools.get(lp_denom).map(|p| p.id.clone())
    }

    fn convert(
        &self,
        bank: &mut dyn BankKeeper,
        migration: &DelegationMigration,
        trader: &Address,
        offer: &Coin,
    ) -> Result<Coin> {
        if offer.denom != migration.lp_denom_in {
            return Err(StakingError::Swap(format!(
                "offer {} does not match migration input {}",
                offer, migration.lp_denom_in
            )));
        }
        let pool_out = self
            .pools
            .get(&migration.lp_denom_out)
            .ok_or_else(|| StakingError::PoolNotFound(migration.lp_denom_out.clone()))?;
        let rate = self
            .rates
            .get(&(migration.lp_denom_in.clone(), migration.lp_denom_out.clone()))
            .ok_or_else(|| {
                StakingError::Swap(format!(
                    "no route from {} to {}",
                    migration.lp_denom_in, migration.lp_denom_out
                ))
            })?;

        let out = Coin::new(
            migration.lp_denom_out.clone(),
            rate.mul_int(offer.amount).truncate_int(),
        );
        if out.is_zero() {
            return Err(StakingError::Swap(format!("{} converts to nothing", offer)));
        }

        bank.send_coins(trader, &pool_out.reserve, &Coins::from(offer.clone()))?;
        bank.send_coins(&pool_out.reserve, trader, &Coins::from(out.clone()))?;
        Ok(out)
    }
}
