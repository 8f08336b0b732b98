//! End to end settlement cycles driven through `Protocol` with in-canister adapters

mod continuation;

use alloy_primitives::U256;
use candid::Principal;

use crate::{
    access::Role,
    constants::scale,
    protocol::Protocol,
    strategy::reported::ReportedStrategy,
    types::{Holder, StrategyId, StrategyInput, VaultId, VaultInput},
    vault::settings::VaultFees,
};

pub(crate) fn admin() -> Principal {
    Principal::from_slice(&[1])
}

pub(crate) fn keeper() -> Principal {
    Principal::from_slice(&[2])
}

pub(crate) fn executor() -> Principal {
    Principal::from_slice(&[3])
}

pub(crate) fn alice() -> Principal {
    Principal::from_slice(&[20])
}

pub(crate) fn bob() -> Principal {
    Principal::from_slice(&[21])
}

pub(crate) fn asset(index: u8) -> Principal {
    Principal::from_slice(&[100, index])
}

pub(crate) fn e18(value: u64) -> U256 {
    U256::from(value) * scale()
}

/// `value / 1000` with 18 decimals
pub(crate) fn milli_e18(value: u64) -> U256 {
    U256::from(value) * scale() / U256::from(1_000)
}

pub(crate) fn protocol() -> Protocol {
    let mut protocol = Protocol::default();
    protocol
        .roles
        .grant(Role::Admin, admin())
        .grant(Role::DoHardWorker, keeper())
        .grant(Role::EmergencyWithdrawalExecutor, executor());
    protocol
}

/// Registers a `ReportedStrategy`. Zero continuation rounds make it atomic.
pub(crate) fn register(
    protocol: &mut Protocol,
    assets: &[Principal],
    continuation_rounds: u8,
) -> StrategyId {
    protocol
        .register_strategy(
            admin(),
            StrategyInput {
                name: format!("reported-{}", continuation_rounds),
                assets: assets.to_vec(),
                atomic: continuation_rounds == 0,
            },
            Box::new(ReportedStrategy::new(assets.len(), continuation_rounds)),
        )
        .unwrap()
}

pub(crate) fn create_vault(
    protocol: &mut Protocol,
    assets: &[Principal],
    strategies: &[StrategyId],
    allocations: &[u16],
    fees: VaultFees,
) -> VaultId {
    protocol
        .create_vault(
            admin(),
            VaultInput {
                owner: admin(),
                assets: assets.to_vec(),
                strategies: strategies.to_vec(),
                allocations: allocations.to_vec(),
                fees,
                guards: vec![],
            },
            0,
        )
        .unwrap()
}

/// Every asset is worth one USD
pub(crate) fn report_unit_prices(protocol: &mut Protocol, assets: &[Principal], now: u64) {
    let prices: Vec<(Principal, U256)> = assets.iter().map(|asset| (*asset, scale())).collect();
    protocol.report_prices(keeper(), &prices, now).unwrap();
}

/// USD value of the vault's position in the strategy
pub(crate) fn vault_position_value(protocol: &Protocol, vault: VaultId, strategy: StrategyId) -> U256 {
    let data = &protocol.strategy(strategy).unwrap().data;
    let balance = data.balance_of(&Holder::Vault(vault));
    if data.total_shares.is_zero() {
        return U256::ZERO;
    }
    balance * data.total_value / data.total_shares
}

pub(crate) fn assert_close(actual: U256, expected: U256, tolerance: U256) {
    let diff = if actual > expected {
        actual - expected
    } else {
        expected - actual
    };
    assert!(
        diff <= tolerance,
        "{} differs from {} by more than {}",
        actual,
        expected,
        tolerance
    );
}
