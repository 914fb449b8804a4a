//! Voting power from a multi-denomination token basket
//!
//! `power_d = floor(weight_d * tokens_d)`, summed over all weighted
//! denominations. Always recomputed from raw tokens so weight changes never
//! accumulate drift.

use crate::math::{Amount, Coin, Coins, DecCoins};

/// Returns the scalar voting power and its per-denomination breakdown.
/// Only strictly positive contributions appear in the breakdown.
pub fn calculate_voting_power(tokens: &Coins, weights: &DecCoins) -> (Amount, Coins) {
    let breakdown = Coins::new(weights.iter().filter_map(|weight| {
        let amount = tokens.amount_of(&weight.denom);
        if amount == 0 || !weight.amount.is_positive() {
            return None;
        }
        let power = weight.amount.mul_int(amount).truncate_int();
        (power > 0).then(|| Coin::new(weight.denom.clone(), power))
    }));

    let total = breakdown
        .iter()
        .fold(0u128, |acc, c| acc.saturating_add(c.amount));
    (total, breakdown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{Dec, DecCoin};

    fn weights() -> DecCoins {
        DecCoins::new([
            DecCoin::new("ulp", Dec::with_prec(5, 1)),
            DecCoin::new("ustake", Dec::one()),
            DecCoin::new("uzero", Dec::zero()),
        ])
    }

    #[test]
    fn test_weighted_sum() {
        let tokens = Coins::new([
            Coin::new("ustake", 1_000),
            Coin::new("ulp", 301),
            Coin::new("uother", 5_000),
        ]);
        let (power, breakdown) = calculate_voting_power(&tokens, &weights());

        // 301 * 0.5 floors to 150; unweighted denoms contribute nothing
        assert_eq!(power, 1_150);
        assert_eq!(breakdown.amount_of("ulp"), 150);
        assert_eq!(breakdown.amount_of("uother"), 0);
        assert_eq!(breakdown.len(), 2);
    }

    #[test]
    fn test_zero_contributions_are_dropped() {
        let tokens = Coins::new([Coin::new("ulp", 1), Coin::new("uzero", 100)]);
        let (power, breakdown) = calculate_voting_power(&tokens, &weights());
        assert_eq!(power, 0);
        assert!(breakdown.is_empty());
    }
}
