//! Discount-factor math.
//!
//! Present values are continuous-compounding: `e^(-rate * t)` with `t` in
//! 360-day years. The factor for a claim with positive time to maturity must
//! land in (0, 1]; anything above one means a negative effective rate reached
//! this layer and the computation is rejected rather than silently credited.

use crate::types::{Rate, SECONDS_IN_YEAR};
use rust_decimal::{Decimal, MathematicalOps};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MathError {
    #[error("discount factor {factor} exceeds unity for rate {rate}")]
    InvalidDiscountFactor { factor: Decimal, rate: Decimal },

    #[error("time to maturity {0} is negative, asset must be settled first")]
    NegativeTimeToMaturity(i64),
}

/// `e^(-rate * t)` for `time_to_maturity` seconds at an annualized `rate`.
pub fn discount_factor(time_to_maturity: i64, rate: Rate) -> Result<Decimal, MathError> {
    if time_to_maturity < 0 {
        return Err(MathError::NegativeTimeToMaturity(time_to_maturity));
    }

    let t_years = Decimal::from(time_to_maturity) / Decimal::from(SECONDS_IN_YEAR);
    let exponent = -rate.value() * t_years;
    let factor = exponent.exp();

    if factor > Decimal::ONE {
        return Err(MathError::InvalidDiscountFactor {
            factor,
            rate: rate.value(),
        });
    }

    Ok(factor)
}

/// `amount * numerator / denominator` truncated toward zero at internal
/// precision. Pro-rata claim math uses this so rounding residue stays in the
/// pool rather than being minted to the claimant.
pub fn mul_ratio(amount: Decimal, numerator: Decimal, denominator: Decimal) -> Decimal {
    (amount * numerator / denominator).trunc_with_scale(crate::types::INTERNAL_TOKEN_DECIMALS)
}
