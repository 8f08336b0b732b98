//! Vault Manager's Constants

use alloy_primitives::U256;

/// Scale used for fixed point arithmetic (USD values, prices and share prices)
pub const SCALE: u128 = 1_000_000_000_000_000_000; // e18
pub fn scale() -> U256 {
    U256::from(SCALE)
}

/// Percentages are expressed in basis points
pub const FULL_PERCENT: u16 = 100_00;
pub fn full_percent() -> U256 {
    U256::from(FULL_PERCENT)
}

/// Seconds in a (non-leap) year, used to pro-rate the management fee
pub const SECONDS_IN_YEAR: u64 = 31_536_000;

/// Maximum dilution caused by the management fee, as a multiple of the prior supply.
/// A holder always keeps at least `balance / (MANAGEMENT_FEE_MAX_DILUTION + 1)`.
pub const MANAGEMENT_FEE_MAX_DILUTION: u64 = 100;

/// Upper bounds for the vault level fees
pub const DEPOSIT_FEE_MAX: u16 = 5_00; // 5%
pub const MANAGEMENT_FEE_MAX: u16 = 5_00; // 5% per annum
pub const PERFORMANCE_FEE_MAX: u16 = 20_00; // 20%

/// Upper bounds for the protocol level (strategy) fees
pub const ECOSYSTEM_FEE_MAX: u16 = 20_00; // 20%
pub const TREASURY_FEE_MAX: u16 = 10_00; // 10%

/// Number of fractions a freshly issued claim ticket holds
pub const FULL_TICKET_FRACTION: u64 = 1_000_000;
pub fn full_ticket_fraction() -> U256 {
    U256::from(FULL_TICKET_FRACTION)
}

/// Strategy id reserved for the ghost sentinel that replaces removed strategies
pub const GHOST_STRATEGY_ID: u32 = 0;

/// Maximum number of strategy slots a single vault can hold
pub const MAX_VAULT_STRATEGIES: usize = 16;

/// Journal retention
pub const MAX_JOURNAL_COLLECTIONS: u64 = 300;
pub const JOURNAL_RETENTION_DAYS: i64 = 30;
