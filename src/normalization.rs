// src/normalization.rs
//
// Exact integer helpers for token accounting, plus decimal rendering of
// base-unit amounts for logs and summaries.

use ethers::types::{U256, U512};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::AllocationError;
use crate::types::conversions::u512_to_u256;

/// Base units per whole GNO (and per whole airdropped token).
pub const WEI_PER_TOKEN: u128 = 1_000_000_000_000_000_000u128;

/// `floor(a * b / denom)` with a 512-bit intermediate product.
#[inline]
pub fn mul_div_floor(a: U256, b: U256, denom: U256) -> Result<U256, AllocationError> {
    if denom.is_zero() {
        return Err(AllocationError::ZeroDenominator);
    }
    let prod: U512 = a.full_mul(b);
    u512_to_u256(prod / U512::from(denom)).map_err(|_| AllocationError::Overflow("mul_div_floor"))
}

/// `ceil(a * b / denom)` with a 512-bit intermediate product.
#[inline]
pub fn mul_div_round_up(a: U256, b: U256, denom: U256) -> Result<U256, AllocationError> {
    if denom.is_zero() {
        return Err(AllocationError::ZeroDenominator);
    }
    let denom_512 = U512::from(denom);
    let prod: U512 = a.full_mul(b);
    let rounded = (prod + denom_512 - U512::one()) / denom_512;
    u512_to_u256(rounded).map_err(|_| AllocationError::Overflow("mul_div_round_up"))
}

/// `amount` whole tokens expressed in base units.
pub fn tokens(amount: u64) -> U256 {
    U256::from(amount) * U256::from(WEI_PER_TOKEN)
}

/// Helper: 10^n as u128, returns None if overflow (n > 38)
#[inline]
pub fn pow10_u128(n: u8) -> Option<u128> {
    10u128.checked_pow(n as u32)
}

/// Normalize a base-unit amount (U256) into human-decimal Decimal using token decimals.
///
/// Amounts beyond `Decimal`'s 96-bit mantissa render as zero; use only for display.
pub fn normalize_amount(amount: U256, decimals: u8) -> Decimal {
    let scale = match pow10_u128(decimals) {
        Some(s) if decimals <= 28 => Decimal::from(s),
        _ => return Decimal::ZERO,
    };
    let amt_dec = Decimal::from_str(&amount.to_string()).unwrap_or(Decimal::ZERO);
    amt_dec / scale
}

/// Whole-token rendering of an 18-decimal amount, for logs.
pub fn display_tokens(amount: U256) -> Decimal {
    normalize_amount(amount, 18)
}

/// Millions of whole tokens rounded to one decimal place, for summaries.
pub fn display_millions(amount: U256) -> Decimal {
    (display_tokens(amount) / Decimal::from(1_000_000u32)).round_dp(1)
}
