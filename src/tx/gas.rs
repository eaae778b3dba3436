//! Deterministic gas repricing and estimation margins

use ethers::types::U256;

/// Fixed-point denominator for the configured factors.
const FACTOR_SCALE: u64 = 1_000_000;

/// Repricing policy for stuck transactions.
#[derive(Debug, Clone)]
pub struct GasPolicy {
    /// `retry_gas_price_factor` scaled by [`FACTOR_SCALE`].
    retry_factor_scaled: U256,
    max_gas_price: U256,
    estimate_factor: f64,
    default_gas_limit: u64,
}

impl GasPolicy {
    pub fn new(
        retry_gas_price_factor: f64,
        max_gas_price: U256,
        estimate_gas_factor: f64,
        default_gas_limit: u64,
    ) -> Self {
        Self {
            retry_factor_scaled: U256::from((retry_gas_price_factor * FACTOR_SCALE as f64).round() as u64),
            max_gas_price,
            estimate_factor: estimate_gas_factor,
            default_gas_limit,
        }
    }

    /// Next gas price for a boost: `floor(old * factor)`, capped at the
    /// configured maximum. The flag reports whether the cap clamped the value.
    pub fn next_gas_price(&self, old: U256) -> (U256, bool) {
        let scaled = old * self.retry_factor_scaled / U256::from(FACTOR_SCALE);
        if scaled > self.max_gas_price {
            (self.max_gas_price, true)
        } else {
            (scaled, false)
        }
    }

    /// Estimated gas with the configured safety margin applied.
    pub fn with_estimate_margin(&self, estimated: u64) -> u64 {
        (estimated as f64 * self.estimate_factor).round() as u64
    }

    /// Fallback when estimation fails.
    pub fn default_gas_limit(&self) -> u64 {
        self.default_gas_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(factor: f64, max: u64) -> GasPolicy {
        GasPolicy::new(factor, U256::from(max), 1.1, 500_000)
    }

    #[test]
    fn boost_applies_factor_with_floor() {
        let (new, capped) = policy(1.2, 100).next_gas_price(U256::from(10));
        assert_eq!(new, U256::from(12));
        assert!(!capped);

        // floor(15 * 1.2) = 18
        let (new, _) = policy(1.2, 100).next_gas_price(U256::from(15));
        assert_eq!(new, U256::from(18));
    }

    #[test]
    fn exact_cap_is_not_capped() {
        let (new, capped) = policy(2.0, 100).next_gas_price(U256::from(50));
        assert_eq!(new, U256::from(100));
        assert!(!capped);
    }

    #[test]
    fn overshoot_is_clamped() {
        let (new, capped) = policy(1.5, 100).next_gas_price(U256::from(90));
        assert_eq!(new, U256::from(100));
        assert!(capped);
    }

    #[test]
    fn repricing_is_monotonic() {
        let policy = policy(1.25, 1_000_000);
        for old in [1u64, 7, 100, 99_999] {
            let (new, _) = policy.next_gas_price(U256::from(old));
            assert!(new >= U256::from(old));
            assert!(new <= U256::from(1_000_000u64));
        }
    }

    #[test]
    fn estimate_margin_rounds() {
        let policy = GasPolicy::new(1.2, U256::from(100), 1.1, 500_000);
        assert_eq!(policy.with_estimate_margin(100_000), 110_000);
        assert_eq!(policy.default_gas_limit(), 500_000);
    }
}
