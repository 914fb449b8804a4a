//! Scenario file format
//!
//! ```yaml
//! chain:
//!   blocks: 20
//!   block_time_ms: 5000
//! params:
//!   unbonding_time_secs: 60
//!   max_validators: 2
//!   bond_denoms: [ustake, ulp]
//! weights:
//!   ustake: "1"
//!   ulp: "0.5"
//! accounts:
//!   - name: alice
//!     balances: [{ denom: ustake, amount: 5000000 }]
//! validators:
//!   - name: val-a
//!     seed: 1
//!     self_delegation: [{ denom: ustake, amount: 3000000 }]
//! delegations:
//!   - delegator: bob
//!     validator: val-a
//!     amount: [{ denom: ulp, amount: 2000000 }]
//! actions:
//!   - height: 3
//!     action:
//!       delegate:
//!         delegator: alice
//!         validator: val-a
//!         amount: [{ denom: ustake, amount: 1000000 }]
//! ```
//!
//! Instead of `validators` and `delegations`, `genesis_file` may point at
//! the output of `staking-sim export`; the path is relative to the scenario.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeratul_staking::{Coin, Coins, Dec, GenesisState, Params};

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub params: ParamsConfig,
    pub weights: BTreeMap<String, Dec>,
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    /// Exported genesis to start from
    #[serde(default)]
    pub genesis_file: Option<PathBuf>,
    #[serde(default)]
    pub validators: Vec<ValidatorConfig>,
    #[serde(default)]
    pub delegations: Vec<DelegationConfig>,
    #[serde(default)]
    pub actions: Vec<ScheduledAction>,
}

#[derive(Debug, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_blocks")]
    pub blocks: u64,
    #[serde(default = "default_block_time_ms")]
    pub block_time_ms: u64,
    #[serde(default)]
    pub genesis_height: u64,
    #[serde(default)]
    pub genesis_time_ms: u64,
    /// Label of the account allowed to update params and register migrations
    #[serde(default = "default_authority")]
    pub authority: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            blocks: default_blocks(),
            block_time_ms: default_block_time_ms(),
            genesis_height: 0,
            genesis_time_ms: 0,
            authority: default_authority(),
        }
    }
}

fn default_blocks() -> u64 {
    10
}

fn default_block_time_ms() -> u64 {
    5_000
}

fn default_authority() -> String {
    "gov".to_string()
}

/// Overrides on top of the default module params
#[derive(Debug, Default, Deserialize)]
pub struct ParamsConfig {
    pub unbonding_time_secs: Option<u64>,
    pub max_validators: Option<u32>,
    pub max_entries: Option<u32>,
    pub bond_denoms: Option<Vec<String>>,
    pub min_voting_power: Option<u128>,
    pub min_commission_rate: Option<Dec>,
}

impl ParamsConfig {
    pub fn to_params(&self) -> Params {
        let mut params = Params::default();
        if let Some(secs) = self.unbonding_time_secs {
            params.unbonding_time = Duration::from_secs(secs);
        }
        if let Some(max) = self.max_validators {
            params.max_validators = max;
        }
        if let Some(max) = self.max_entries {
            params.max_entries = max;
        }
        if let Some(denoms) = &self.bond_denoms {
            params.bond_denoms = denoms.clone();
        }
        if let Some(min) = self.min_voting_power {
            params.min_voting_power = min;
        }
        if let Some(rate) = &self.min_commission_rate {
            params.min_commission_rate = rate.clone();
        }
        params
    }
}

#[derive(Debug, Deserialize)]
pub struct PoolConfig {
    pub lp_denom: String,
    pub id: String,
    /// Initial reserves of the pool account
    #[serde(default)]
    pub reserves: Vec<Coin>,
    /// Conversion rates out of this pool, keyed by destination LP denom
    #[serde(default)]
    pub rates: BTreeMap<String, Dec>,
}

#[derive(Debug, Deserialize)]
pub struct AccountConfig {
    pub name: String,
    pub balances: Vec<Coin>,
}

#[derive(Debug, Deserialize)]
pub struct ValidatorConfig {
    pub name: String,
    /// Seed byte of the consensus key
    pub seed: u8,
    #[serde(default = "default_commission_rate")]
    pub commission_rate: Dec,
    pub self_delegation: Vec<Coin>,
}

fn default_commission_rate() -> Dec {
    Dec::percent(5)
}

/// Stake a non-operator holds at genesis
#[derive(Debug, Deserialize)]
pub struct DelegationConfig {
    pub delegator: String,
    pub validator: String,
    pub amount: Vec<Coin>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduledAction {
    pub height: u64,
    #[serde(with = "serde_yaml::with::singleton_map")]
    pub action: Action,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Delegate {
        delegator: String,
        validator: String,
        amount: Vec<Coin>,
    },
    Undelegate {
        delegator: String,
        validator: String,
        amount: Vec<Coin>,
    },
    Redelegate {
        delegator: String,
        src: String,
        dst: String,
        amount: Vec<Coin>,
    },
    CancelUnbonding {
        delegator: String,
        validator: String,
        amount: Vec<Coin>,
        creation_height: u64,
    },
    Slash {
        validator: String,
        fraction: Dec,
        /// Defaults to the current height
        #[serde(default)]
        infraction_height: Option<u64>,
    },
    Jail {
        validator: String,
    },
    Unjail {
        validator: String,
    },
    Hold {
        id: u64,
    },
    Release {
        id: u64,
    },
    RegisterMigration {
        lp_denom_in: String,
        lp_denom_out: String,
        denom_in: String,
        denom_out: String,
        swap_module: String,
    },
    Migrate {
        delegator: String,
        validator: String,
        lp_denom_in: String,
        lp_denom_out: String,
        new_delegator: String,
    },
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        let mut config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing scenario {}", path.display()))?;

        if let Some(file) = config.genesis_file.take() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.genesis_file = Some(base.join(file));
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.params.to_params().validate()?;
        if self.genesis_file.is_some() && !(self.validators.is_empty() && self.delegations.is_empty()) {
            bail!("genesis_file cannot be combined with validators or delegations");
        }
        if let Some(action) = self.actions.iter().find(|a| a.height <= self.chain.genesis_height) {
            bail!(
                "action at height {} is not after the genesis height {}",
                action.height,
                self.chain.genesis_height
            );
        }
        Ok(())
    }

    /// Reads the exported genesis named by `genesis_file`
    pub fn load_genesis(&self) -> Result<Option<GenesisState>> {
        let Some(path) = &self.genesis_file else {
            return Ok(None);
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading genesis {}", path.display()))?;
        let genesis = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing genesis {}", path.display()))?;
        Ok(Some(genesis))
    }
}

pub fn coins(list: &[Coin]) -> Coins {
    Coins::new(list.iter().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SCENARIO: &str = r#"
chain:
  blocks: 4
params:
  unbonding_time_secs: 60
  max_validators: 2
  bond_denoms: [ustake]
weights:
  ustake: "1"
accounts:
  - name: alice
    balances: [{ denom: ustake, amount: 340282366920938463463374607431768211455 }]
validators:
  - name: val-a
    seed: 1
    self_delegation: [{ denom: ustake, amount: 3000000 }]
actions:
  - height: 2
    action:
      slash:
        validator: val-a
        fraction: "0.1"
  - height: 3
    action:
      delegate:
        delegator: alice
        validator: val-a
        amount: [{ denom: ustake, amount: 1000000 }]
  - height: 3
    action:
      hold:
        id: 1
"#;

    fn write(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_scenario() {
        let file = write(SCENARIO);
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.chain.blocks, 4);
        assert_eq!(config.chain.block_time_ms, 5_000);
        assert_eq!(config.params.to_params().max_validators, 2);
        assert_eq!(config.validators[0].commission_rate, Dec::percent(5));
        assert_eq!(config.accounts[0].balances[0].amount, u128::MAX);
        assert_eq!(config.actions.len(), 3);
        assert!(matches!(
            &config.actions[0].action,
            Action::Slash { infraction_height: None, .. }
        ));
        match &config.actions[1].action {
            Action::Delegate { amount, .. } => assert_eq!(amount[0].amount, 1_000_000),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn test_load_shipped_demo() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios/demo.yaml");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.validators.len(), 3);
        assert!(!config.actions.is_empty());
        assert!(config
            .actions
            .iter()
            .any(|a| matches!(a.action, Action::Migrate { .. })));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let file = write(&SCENARIO.replace("max_validators: 2", "max_validators: 0"));
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_actions_must_follow_genesis() {
        let file = write(&SCENARIO.replace("blocks: 4", "blocks: 4\n  genesis_height: 2"));
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_genesis_file_is_relative_to_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.yaml");
        std::fs::write(
            &path,
            "weights: { ustake: \"1\" }\ngenesis_file: genesis.yaml\n",
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.genesis_file, Some(dir.path().join("genesis.yaml")));

        std::fs::write(
            &path,
            "weights: { ustake: \"1\" }\ngenesis_file: genesis.yaml\nvalidators:\n  - { name: v, seed: 1, self_delegation: [] }\n",
        )
        .unwrap();
        assert!(Config::load(&path).is_err());
    }
}
