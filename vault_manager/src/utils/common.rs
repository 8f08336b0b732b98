//! Common utility and helper functions that are used across the project

use alloy_primitives::U256;
use candid::Nat;
use num_bigint::BigUint;
use num_traits::ToPrimitive;

use crate::constants::scale;

use super::error::*;

/// Rounding direction of a fixed point division.
/// Fee extraction and ticket claims round `Up`, pro-rata splits round `Down`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rounding {
    Down,
    Up,
}

/// Returns `a * b / denominator` rounded in the given direction.
pub fn mul_div(a: U256, b: U256, denominator: U256, rounding: Rounding) -> ManagerResult<U256> {
    if denominator.is_zero() {
        return Err(arithmetic_err("Division by zero in mul_div."));
    }
    let product = a
        .checked_mul(b)
        .ok_or_else(|| arithmetic_err("Multiplication overflowed in mul_div."))?;
    let quotient = product / denominator;
    if rounding == Rounding::Up && !(product % denominator).is_zero() {
        return Ok(quotient + U256::from(1));
    }
    Ok(quotient)
}

/// Checked subtraction that reports which quantity underflowed.
pub fn checked_sub(a: U256, b: U256, what: &str) -> ManagerResult<U256> {
    a.checked_sub(b)
        .ok_or_else(|| arithmetic_err(format!("{} underflowed.", what)))
}

/// Returns the USD value (e18) of the given asset amounts at the given prices (e18 per whole unit).
pub fn assets_value(amounts: &[U256], prices: &[U256]) -> ManagerResult<U256> {
    if amounts.len() != prices.len() {
        return Err(config_err("Amounts and prices have different lengths."));
    }
    amounts
        .iter()
        .zip(prices)
        .try_fold(U256::ZERO, |total, (amount, price)| {
            let value = mul_div(*amount, *price, scale(), Rounding::Down)?;
            total
                .checked_add(value)
                .ok_or_else(|| arithmetic_err("Asset value overflowed."))
        })
}

/// Adds `other` to `target` element-wise.
pub fn add_assign_assets(target: &mut [U256], other: &[U256]) -> ManagerResult<()> {
    if target.len() != other.len() {
        return Err(config_err("Asset vectors have different lengths."));
    }
    for (total, amount) in target.iter_mut().zip(other) {
        *total = total
            .checked_add(*amount)
            .ok_or_else(|| arithmetic_err("Asset amount overflowed."))?;
    }
    Ok(())
}

/// Splits `total` into parts proportional to `weights`.
/// Every part is rounded down and the last non-zero weight receives the remainder,
/// so the parts always sum up to `total`.
pub fn split_pro_rata(total: U256, weights: &[U256]) -> ManagerResult<Vec<U256>> {
    let weight_sum = weights
        .iter()
        .try_fold(U256::ZERO, |sum, weight| sum.checked_add(*weight))
        .ok_or_else(|| arithmetic_err("Weight sum overflowed."))?;
    let mut parts = vec![U256::ZERO; weights.len()];
    let last = match weights.iter().rposition(|weight| !weight.is_zero()) {
        Some(last) => last,
        None => return Ok(parts),
    };

    let mut distributed = U256::ZERO;
    for (index, weight) in weights.iter().enumerate().take(last) {
        parts[index] = mul_div(total, *weight, weight_sum, Rounding::Down)?;
        distributed += parts[index];
    }
    parts[last] = checked_sub(total, distributed, "Pro-rata remainder")?;
    Ok(parts)
}

/// Returns `true` if every amount is zero.
pub fn all_zero(amounts: &[U256]) -> bool {
    amounts.iter().all(|amount| amount.is_zero())
}

/// Converts values of type `Nat` to `U256`
pub fn nat_to_u256(n: &Nat) -> ManagerResult<U256> {
    let be_bytes = n.0.to_bytes_be();
    if be_bytes.len() > 32 {
        return Err(ManagerError::DecodingError("The `Nat` input length exceedes 32 bytes when converted to big-endian bytes representation.".to_string()));
    }
    // Ensure the byte array is exactly 32 bytes long
    let mut padded_bytes = [0u8; 32];
    let start_pos = 32 - be_bytes.len();
    padded_bytes[start_pos..].copy_from_slice(&be_bytes);

    Ok(U256::from_be_bytes(padded_bytes))
}

/// Converts values of type `U256` to `Nat`
pub fn u256_to_nat(value: &U256) -> Nat {
    Nat(BigUint::from_bytes_be(&value.to_be_bytes::<32>()))
}

/// Converts a list of `Nat` values to `U256`
pub fn nats_to_u256s(values: &[Nat]) -> ManagerResult<Vec<U256>> {
    values.iter().map(nat_to_u256).collect()
}

/// Converts a list of `U256` values to `Nat`
pub fn u256s_to_nats(values: &[U256]) -> Vec<Nat> {
    values.iter().map(u256_to_nat).collect()
}

/// Converts values of type `Nat` to `u64`
pub fn nat_to_u64(n: &Nat) -> ManagerResult<u64> {
    n.0.to_u64().ok_or_else(|| {
        ManagerError::DecodingError("The `Nat` input does not fit into 64 bits.".to_string())
    })
}

/// Current time in seconds.
#[cfg(target_arch = "wasm32")]
pub fn current_time() -> u64 {
    ic_exports::ic_cdk::api::time() / 1_000_000_000
}

/// Current time in seconds.
#[cfg(not(target_arch = "wasm32"))]
pub fn current_time() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}
