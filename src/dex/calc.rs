//! Integer AMM arithmetic and exact conversions.
//!
//! Every amount that can end up in calldata is computed here in `U256`/`U512`.
//! `bigdecimal` is only used to turn integer state into comparable prices.

use bigdecimal::BigDecimal;
use ethers::types::{U256, U512};
use num_bigint::{BigInt, Sign};
use num_traits::{FromPrimitive, ToPrimitive, Zero};

/// 2^96, the fixed-point base of `sqrtPriceX96`.
pub const Q96: U256 = U256([0, 1 << 32, 0, 0]);

/// Basis-point denominator.
pub const BPS: u32 = 10_000;

/// Parts-per-million denominator.
pub const PPM: u64 = 1_000_000;

/// `a * b / denominator` without intermediate overflow. `None` on a zero
/// denominator or a result wider than 256 bits.
pub fn mul_div(a: U256, b: U256, denominator: U256) -> Option<U256> {
    if denominator.is_zero() {
        return None;
    }
    let product: U512 = a.full_mul(b);
    U256::try_from(product / U512::from(denominator)).ok()
}

/// Fee-adjusted constant-product output:
/// `out = in*(1-fee)*reserve_out / (reserve_in + in*(1-fee))`.
pub fn constant_product_out(
    amount_in: U256,
    reserve_in: U256,
    reserve_out: U256,
    fee_bps: u32,
) -> Option<U256> {
    if amount_in.is_zero() || reserve_in.is_zero() || reserve_out.is_zero() || fee_bps >= BPS {
        return None;
    }
    let in_with_fee = U512::from(amount_in).checked_mul(U512::from(BPS - fee_bps))?;
    let numerator = in_with_fee.checked_mul(U512::from(reserve_out))?;
    let denominator = U512::from(reserve_in)
        .checked_mul(U512::from(BPS))?
        .checked_add(in_with_fee)?;
    U256::try_from(numerator / denominator).ok()
}

/// Minimum acceptable output for an expected amount at a slippage tolerance.
pub fn min_out_for(expected: U256, slippage_bps: u32) -> U256 {
    let keep = BPS.saturating_sub(slippage_bps);
    mul_div(expected, U256::from(keep), U256::from(BPS)).unwrap_or_default()
}

/// Relative gap `(expected - min_out) / expected` in parts per million.
/// `None` when `expected` is zero or the bound exceeds the expectation.
pub fn slippage_gap_ppm(expected: U256, min_out: U256) -> Option<u64> {
    if expected.is_zero() || min_out > expected {
        return None;
    }
    let gap = mul_div(expected - min_out, U256::from(PPM), expected)?;
    Some(gap.low_u64())
}

/// Largest input that moves a constant-product pool's price by at most
/// `impact_ppm`: `reserve_in * s / (1 - s)`.
pub fn safe_input_for(reserve_in: U256, impact_ppm: u64) -> U256 {
    if impact_ppm == 0 || impact_ppm >= PPM {
        return U256::zero();
    }
    mul_div(reserve_in, U256::from(impact_ppm), U256::from(PPM - impact_ppm)).unwrap_or_default()
}

pub fn u256_to_bigint(value: U256) -> BigInt {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    BigInt::from_bytes_be(Sign::Plus, &bytes)
}

/// `value / 10^decimals` as an exact decimal.
pub fn to_decimal(value: U256, decimals: u8) -> BigDecimal {
    BigDecimal::new(u256_to_bigint(value), decimals as i64)
}

/// Human-unit amount as `f64`, for valuation and logging only.
pub fn to_f64(value: U256, decimals: u8) -> f64 {
    to_decimal(value, decimals).to_f64().unwrap_or(0.0)
}

/// Convert a human-unit amount into base units, truncating dust.
pub fn from_f64(amount: f64, decimals: u8) -> Option<U256> {
    if !amount.is_finite() || amount <= 0.0 {
        return None;
    }
    let human = BigDecimal::from_f64(amount)?;
    let scaled = human * BigDecimal::new(BigInt::from(1), -(decimals as i64));
    let (digits, _) = scaled.with_scale(0).into_bigint_and_exponent();
    let (sign, bytes) = digits.to_bytes_be();
    if sign == Sign::Minus || bytes.len() > 32 {
        return None;
    }
    Some(U256::from_big_endian(&bytes))
}

/// Decimals-adjusted price of one `token0` in `token1` from raw reserves.
pub fn reserve_price(reserve0: U256, reserve1: U256, decimals0: u8, decimals1: u8) -> Option<f64> {
    let base = to_decimal(reserve0, decimals0);
    if base.is_zero() {
        return None;
    }
    let quote = to_decimal(reserve1, decimals1);
    (quote / base).to_f64().filter(|p| p.is_finite() && *p > 0.0)
}

/// Decimals-adjusted price of one `token0` in `token1` from `sqrtPriceX96`:
/// `(sqrtPriceX96 / 2^96)^2 * 10^(decimals0 - decimals1)`.
pub fn sqrt_price_to_price(sqrt_price_x96: U256, decimals0: u8, decimals1: u8) -> Option<f64> {
    if sqrt_price_x96.is_zero() {
        return None;
    }
    let sqrt = BigDecimal::from(u256_to_bigint(sqrt_price_x96));
    let q192 = BigDecimal::from(BigInt::from(1) << 192usize);
    let raw = (&sqrt * &sqrt) / q192;
    let adjust = decimals0 as i64 - decimals1 as i64;
    let price = raw * BigDecimal::new(BigInt::from(1), -adjust);
    price.to_f64().filter(|p| p.is_finite() && *p > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v2_quote_matches_reference_values() {
        // 100 in, 1000:2000 reserves, 0.3% fee => ~181.32 out
        let out = constant_product_out(
            U256::from(100_000_000u64),
            U256::from(1_000_000_000u64),
            U256::from(2_000_000_000u64),
            30,
        )
        .unwrap();
        assert_eq!(out, U256::from(181_322_178u64));
    }

    #[test]
    fn quote_rejects_degenerate_inputs() {
        let r = U256::from(1_000u64);
        assert_eq!(constant_product_out(U256::zero(), r, r, 30), None);
        assert_eq!(constant_product_out(r, U256::zero(), r, 30), None);
        assert_eq!(constant_product_out(r, r, r, 10_000), None);
    }

    #[test]
    fn min_out_applies_tolerance_in_integers() {
        assert_eq!(min_out_for(U256::from(1000u64), 150), U256::from(985u64));
        assert_eq!(min_out_for(U256::from(999u64), 100), U256::from(989u64));
    }

    #[test]
    fn slippage_gap_in_ppm() {
        assert_eq!(
            slippage_gap_ppm(U256::from(1000u64), U256::from(984u64)),
            Some(16_000)
        );
        assert_eq!(slippage_gap_ppm(U256::from(1000u64), U256::from(1001u64)), None);
        assert_eq!(slippage_gap_ppm(U256::zero(), U256::zero()), None);
    }

    #[test]
    fn safe_input_moves_price_by_target_impact() {
        // 1% impact on a 990_000 reserve => 10_000
        assert_eq!(
            safe_input_for(U256::from(990_000u64), 10_000),
            U256::from(10_000u64)
        );
        assert_eq!(safe_input_for(U256::from(990_000u64), 0), U256::zero());
    }

    #[test]
    fn reserve_price_adjusts_for_decimals() {
        // 1 WETH (18) : 2000 USDC (6)
        let price = reserve_price(
            U256::exp10(18),
            U256::from(2_000_000_000u64),
            18,
            6,
        )
        .unwrap();
        assert!((price - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn sqrt_price_at_q96_is_unit_price() {
        let price = sqrt_price_to_price(Q96, 6, 6).unwrap();
        assert!((price - 1.0).abs() < 1e-12);
        assert_eq!(sqrt_price_to_price(U256::zero(), 6, 6), None);
    }

    #[test]
    fn f64_round_trip_to_base_units() {
        assert_eq!(from_f64(1.5, 6), Some(U256::from(1_500_000u64)));
        assert_eq!(from_f64(-1.0, 6), None);
        assert!((to_f64(U256::from(1_500_000u64), 6) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn mul_div_handles_wide_products() {
        let big = U256::MAX / 2;
        assert_eq!(mul_div(big, U256::from(4u64), U256::from(4u64)), Some(big));
        assert_eq!(mul_div(big, big, U256::zero()), None);
    }
}
