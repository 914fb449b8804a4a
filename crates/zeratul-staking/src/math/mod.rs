//! Ledger arithmetic: fixed-point decimals and denomination-keyed multisets

pub mod coins;
pub mod dec;

pub use coins::{validate_denom, Amount, Coin, CoinError, Coins, DecCoin, DecCoins};
pub use dec::{Dec, ParseDecError, PRECISION};
