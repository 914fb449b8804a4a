//! Block loop over an in-memory keeper
//!
//! The keeper starts from a genesis state: either an exported one read from
//! disk, or one assembled from the scenario's validators and delegations at
//! an exchange rate of one share per token. The module pools are funded to
//! match before import.

use crate::config::{coins, Action, Config};
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use zeratul_staking::keeper::pool::{bonded_pool_address, not_bonded_pool_address};
use zeratul_staking::msg_server::{
    MsgBeginRedelegate, MsgCancelUnbondingDelegation, MsgDelegate, MsgMigrateDelegation,
    MsgRegisterMigration, MsgUndelegate,
};
use zeratul_staking::types::{Commission, CommissionRates, DelegationMigration, Description};
use zeratul_staking::{
    Address, BlockInfo, Coins, Dec, DecCoin, DecCoins, Delegation, GenesisState, Keeper,
    MemoryBank, MemoryPools, MsgServer, PubKey, StakingError, StaticWeights, Validator,
    ValidatorUpdate,
};

pub struct Simulation {
    keeper: Keeper<MemoryBank>,
    actions: BTreeMap<u64, Vec<Action>>,
    block_time_ms: u64,
}

/// Outcome of one simulated block
#[derive(Debug)]
pub struct BlockReport {
    pub height: u64,
    pub updates: Vec<ValidatorUpdate>,
    pub rejected: usize,
}

/// Genesis state for the scenario's validators and delegations. Every
/// validator starts unbonded; the import reconciliation picks the active set.
pub fn genesis_from_config(config: &Config) -> Result<GenesisState> {
    let params = config.params.to_params();
    let mut validators: Vec<Validator> = Vec::with_capacity(config.validators.len());
    for v in &config.validators {
        let rates = CommissionRates::new(v.commission_rate.clone(), Dec::one(), Dec::percent(1));
        if rates.rate < params.min_commission_rate {
            bail!(
                "validator {} commission {} is below the minimum {}",
                v.name,
                rates.rate,
                params.min_commission_rate
            );
        }
        validators.push(Validator::new(
            Address::from_label(&v.name),
            PubKey([v.seed; 32]),
            Description::new(&v.name),
            Commission::new(rates, config.chain.genesis_time_ms),
        ));
    }

    let stakes = config
        .validators
        .iter()
        .map(|v| (&v.name, &v.name, &v.self_delegation))
        .chain(config.delegations.iter().map(|d| (&d.delegator, &d.validator, &d.amount)));

    let mut delegations: BTreeMap<(Address, Address), Delegation> = BTreeMap::new();
    for (delegator, validator, amount) in stakes {
        let amount = coins(amount);
        if let Some(denom) = amount.denoms().find(|d| !params.is_bond_denom(d)) {
            bail!("genesis stake of {} in {} uses non-bond denom {}", delegator, validator, denom);
        }
        let operator = Address::from_label(validator);
        let target = validators
            .iter_mut()
            .find(|v| v.operator == operator)
            .with_context(|| format!("delegation to unknown genesis validator {}", validator))?;

        let shares = amount.to_dec_coins();
        target.tokens = target.tokens.add(&amount);
        target.delegator_shares = target.delegator_shares.add(&shares);

        let delegator = Address::from_label(delegator);
        let delegation = delegations
            .entry((delegator, operator))
            .or_insert_with(|| Delegation::new(delegator, operator, DecCoins::empty()));
        delegation.shares = delegation.shares.add(&shares);
    }

    Ok(GenesisState {
        params,
        validators,
        delegations: delegations.into_values().collect(),
        ..GenesisState::default()
    })
}

/// Credits the module pools with exactly what the genesis state claims
fn fund_module_accounts(bank: &mut MemoryBank, genesis: &GenesisState) {
    let mut bonded = Coins::empty();
    let mut not_bonded = Coins::empty();
    for validator in &genesis.validators {
        if validator.is_bonded() {
            bonded = bonded.add(&validator.tokens);
        } else {
            not_bonded = not_bonded.add(&validator.tokens);
        }
    }
    for ubd in &genesis.unbonding_delegations {
        for entry in &ubd.entries {
            not_bonded = not_bonded.add(&entry.balance);
        }
    }
    bank.mint(&bonded_pool_address(), &bonded);
    bank.mint(&not_bonded_pool_address(), &not_bonded);
}

impl Simulation {
    /// Builds the keeper over the memory collaborators, funds accounts and
    /// pools, and imports the genesis state
    pub fn new(config: &Config) -> Result<Self> {
        let mut pools = MemoryPools::new();
        let mut bank = MemoryBank::new();
        for pool in &config.pools {
            let reserve = pools.add_pool(&pool.lp_denom, &pool.id);
            bank.mint(&reserve, &coins(&pool.reserves));
            for (to, rate) in &pool.rates {
                pools.set_rate(&pool.lp_denom, to, rate.clone());
            }
        }
        for account in &config.accounts {
            bank.mint(&Address::from_label(&account.name), &coins(&account.balances));
        }

        let genesis = match config.load_genesis()? {
            Some(genesis) => genesis,
            None => genesis_from_config(config)?,
        };
        fund_module_accounts(&mut bank, &genesis);

        let weights = StaticWeights::new(DecCoins::new(
            config
                .weights
                .iter()
                .map(|(denom, weight)| DecCoin::new(denom, weight.clone())),
        ));
        let mut keeper = Keeper::new(
            bank,
            Box::new(weights),
            Box::new(pools),
            Vec::new(),
            Address::from_label(&config.chain.authority),
        )?;
        keeper.set_block(BlockInfo {
            height: config.chain.genesis_height,
            time: config.chain.genesis_time_ms,
        });

        let genesis_set = keeper.init_genesis(&genesis)?;
        info!(
            validators = genesis.validators.len(),
            delegations = genesis.delegations.len(),
            exported = genesis.exported,
            active = genesis_set.len(),
            "genesis imported"
        );

        let mut actions: BTreeMap<u64, Vec<Action>> = BTreeMap::new();
        for scheduled in &config.actions {
            actions
                .entry(scheduled.height)
                .or_default()
                .push(scheduled.action.clone());
        }

        Ok(Self {
            keeper,
            actions,
            block_time_ms: config.chain.block_time_ms,
        })
    }

    pub fn keeper(&self) -> &Keeper<MemoryBank> {
        &self.keeper
    }

    /// Advances one block: executes scheduled actions, reconciles the
    /// validator set and checks invariants
    pub fn step(&mut self) -> Result<BlockReport> {
        let prev = self.keeper.block();
        let height = prev.height + 1;
        self.keeper.set_block(BlockInfo {
            height,
            time: prev.time + self.block_time_ms,
        });

        let mut rejected = 0;
        for action in self.actions.remove(&height).unwrap_or_default() {
            match self.execute(&action) {
                Ok(()) => debug!(height, ?action, "action applied"),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    rejected += 1;
                    warn!(height, ?action, error = %e, "action rejected");
                }
            }
        }

        let updates = self.keeper.end_block()?;
        for update in &updates {
            debug!(height, power = update.power, pub_key = ?update.pub_key, "validator update");
        }
        info!(
            height,
            updates = updates.len(),
            total_power = self.keeper.last_total_power()?,
            "block committed"
        );

        let (report, broken) = self.keeper.all_invariants()?;
        if broken {
            return Err(StakingError::invariant(format!("height {}: {}", height, report)).into());
        }

        Ok(BlockReport {
            height,
            updates,
            rejected,
        })
    }

    pub fn run(&mut self, blocks: u64) -> Result<()> {
        for _ in 0..blocks {
            self.step()?;
        }
        let pool = self.keeper.pool();
        info!(
            height = self.keeper.block_height(),
            bonded = %pool.bonded_tokens,
            not_bonded = %pool.not_bonded_tokens,
            burned = %self.keeper.bank().burned(),
            "simulation finished"
        );
        Ok(())
    }

    pub fn export(&self) -> Result<GenesisState> {
        Ok(self.keeper.export_genesis()?)
    }

    fn execute(&mut self, action: &Action) -> zeratul_staking::Result<()> {
        let addr = |label: &str| Address::from_label(label);

        match action {
            Action::Delegate {
                delegator,
                validator,
                amount,
            } => {
                MsgServer::new(&mut self.keeper).delegate(MsgDelegate {
                    delegator_address: addr(delegator),
                    validator_address: addr(validator),
                    amount: coins(amount),
                })?;
            }
            Action::Undelegate {
                delegator,
                validator,
                amount,
            } => {
                let res = MsgServer::new(&mut self.keeper).undelegate(MsgUndelegate {
                    delegator_address: addr(delegator),
                    validator_address: addr(validator),
                    amount: coins(amount),
                })?;
                debug!(completion_time = res.completion_time, amount = %res.amount, "unbonding started");
            }
            Action::Redelegate {
                delegator,
                src,
                dst,
                amount,
            } => {
                MsgServer::new(&mut self.keeper).begin_redelegate(MsgBeginRedelegate {
                    delegator_address: addr(delegator),
                    validator_src_address: addr(src),
                    validator_dst_address: addr(dst),
                    amount: coins(amount),
                })?;
            }
            Action::CancelUnbonding {
                delegator,
                validator,
                amount,
                creation_height,
            } => {
                MsgServer::new(&mut self.keeper).cancel_unbonding_delegation(
                    MsgCancelUnbondingDelegation {
                        delegator_address: addr(delegator),
                        validator_address: addr(validator),
                        amount: coins(amount),
                        creation_height: *creation_height,
                    },
                )?;
            }
            Action::Slash {
                validator,
                fraction,
                infraction_height,
            } => {
                let cons = self.keeper.validator(&addr(validator))?.cons_address();
                let height = infraction_height.unwrap_or_else(|| self.keeper.block_height());
                let burned = self
                    .keeper
                    .transact(|k| k.slash(&cons, height, fraction))?;
                info!(%validator, %fraction, %burned, "validator slashed");
            }
            Action::Jail { validator } => {
                let cons = self.keeper.validator(&addr(validator))?.cons_address();
                self.keeper.transact(|k| k.jail(&cons))?;
            }
            Action::Unjail { validator } => {
                let cons = self.keeper.validator(&addr(validator))?.cons_address();
                self.keeper.transact(|k| k.unjail(&cons))?;
            }
            Action::Hold { id } => {
                self.keeper.transact(|k| k.put_unbonding_on_hold(*id))?;
            }
            Action::Release { id } => {
                self.keeper.transact(|k| k.unbonding_can_complete(*id))?;
            }
            Action::RegisterMigration {
                lp_denom_in,
                lp_denom_out,
                denom_in,
                denom_out,
                swap_module,
            } => {
                let authority = *self.keeper.authority();
                MsgServer::new(&mut self.keeper).register_migration(MsgRegisterMigration {
                    authority,
                    migration: DelegationMigration {
                        lp_denom_in: lp_denom_in.clone(),
                        lp_denom_out: lp_denom_out.clone(),
                        denom_in: denom_in.clone(),
                        denom_out: denom_out.clone(),
                        swap_contract_address: addr(swap_module),
                        swap_contract_module: swap_module.clone(),
                    },
                })?;
            }
            Action::Migrate {
                delegator,
                validator,
                lp_denom_in,
                lp_denom_out,
                new_delegator,
            } => {
                let res = MsgServer::new(&mut self.keeper).migrate_delegation(MsgMigrateDelegation {
                    delegator_address: addr(delegator),
                    validator_address: addr(validator),
                    lp_denom_in: lp_denom_in.clone(),
                    lp_denom_out: lp_denom_out.clone(),
                    new_delegator_address: addr(new_delegator),
                })?;
                info!(amount = %res.amount, "delegation migrated");
            }
        }
        Ok(())
    }
}

/// Whether an error out of the driver came from corrupted engine state
pub fn is_fatal(err: &anyhow::Error) -> bool {
    err.downcast_ref::<StakingError>()
        .map(StakingError::is_fatal)
        .unwrap_or(false)
}
