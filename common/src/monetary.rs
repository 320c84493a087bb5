//! Decimal scale contract shared by the store, the resolver and conversions.

use rust_decimal::{Decimal, RoundingStrategy};

/// Fractional digits of a rendered or derived exchange rate.
pub const RATE_SCALE: u32 = 6;

/// Fractional digits of a rendered amount.
pub const AMOUNT_SCALE: u32 = 2;

/// Round half-up to `scale` digits and pad with trailing zeros to exactly `scale`.
pub fn round_half_up(value: Decimal, scale: u32) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(scale);
    rounded
}

/// Normalize a rate to [`RATE_SCALE`] digits.
pub fn normalize_rate(rate: Decimal) -> Decimal {
    round_half_up(rate, RATE_SCALE)
}

/// Normalize an amount to [`AMOUNT_SCALE`] digits.
pub fn normalize_amount(amount: Decimal) -> Decimal {
    round_half_up(amount, AMOUNT_SCALE)
}

/// Divide two rates and normalize the quotient, or `None` on a zero divisor.
pub fn divide_rates(numerator: Decimal, denominator: Decimal) -> Option<Decimal> {
    numerator.checked_div(denominator).map(normalize_rate)
}
