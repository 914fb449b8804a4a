//! Bonded and not-bonded module accounts

use super::Keeper;
use crate::error::Result;
use crate::expected::{BankKeeper, BONDED_POOL_NAME, NOT_BONDED_POOL_NAME};
use crate::math::Coins;
use crate::types::Address;

pub fn bonded_pool_address() -> Address {
    Address::module(BONDED_POOL_NAME)
}

pub fn not_bonded_pool_address() -> Address {
    Address::module(NOT_BONDED_POOL_NAME)
}

impl<B: BankKeeper + Clone> Keeper<B> {
    pub fn bonded_pool_balance(&self) -> Coins {
        self.bank.balances(&bonded_pool_address())
    }

    pub fn not_bonded_pool_balance(&self) -> Coins {
        self.bank.balances(&not_bonded_pool_address())
    }

    pub(crate) fn bonded_tokens_to_not_bonded(&mut self, tokens: &Coins) -> Result<()> {
        self.bank
            .send_coins(&bonded_pool_address(), &not_bonded_pool_address(), tokens)
    }

    pub(crate) fn not_bonded_tokens_to_bonded(&mut self, tokens: &Coins) -> Result<()> {
        self.bank
            .send_coins(&not_bonded_pool_address(), &bonded_pool_address(), tokens)
    }

    pub(crate) fn burn_bonded_tokens(&mut self, amount: &Coins) -> Result<()> {
        self.bank.burn_coins(&bonded_pool_address(), amount)
    }

    pub(crate) fn burn_not_bonded_tokens(&mut self, amount: &Coins) -> Result<()> {
        self.bank.burn_coins(&not_bonded_pool_address(), amount)
    }
}
