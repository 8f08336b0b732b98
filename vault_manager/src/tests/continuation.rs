use super::*;
use crate::{
    constants::FULL_TICKET_FRACTION,
    strategy::ledger::HarvestOutcome,
    utils::error::ManagerError,
    vault::VaultPhase,
};

#[test]
fn test_non_atomic_harvest_gates_dependent_operations() {
    let mut protocol = protocol();
    let assets = [asset(0)];
    let strategy = register(&mut protocol, &assets, 1);
    let vault = create_vault(&mut protocol, &assets, &[strategy], &[10_000], VaultFees::default());
    report_unit_prices(&mut protocol, &assets, 1);

    let ticket = protocol.deposit(vault, &[e18(100)], alice(), true, 1).unwrap();
    assert_eq!(
        protocol.vault(vault).unwrap().phase(&protocol.strategies),
        VaultPhase::Flushed
    );
    let outcomes = protocol.harvest(keeper(), &[strategy], &[], 2).unwrap();
    assert!(matches!(outcomes[0], HarvestOutcome::Pending(0, _)));
    assert!(protocol.strategy_query(strategy).unwrap().awaiting_continuation.is_some());
    assert_eq!(
        protocol.vault(vault).unwrap().phase(&protocol.strategies),
        VaultPhase::Harvesting
    );

    assert_eq!(
        protocol.sync(vault, false, 3),
        Err(ManagerError::StrategyNotReady(strategy))
    );
    assert_eq!(
        protocol.redeem_strategy_shares_async(keeper(), strategy, U256::from(1)),
        Err(ManagerError::ProtocolActionNotFinished(strategy))
    );
    assert_eq!(
        protocol.redeem_fast(vault, alice(), e18(1), &[]),
        Err(ManagerError::VaultNotSynced(vault))
    );
    assert_eq!(
        protocol.harvest(keeper(), &[strategy], &[], 3),
        Err(ManagerError::StrategyNotReady(strategy))
    );

    assert_eq!(
        protocol.harvest_continue(keeper(), &[strategy], &[], 4),
        Ok(vec![HarvestOutcome::Completed(0)])
    );
    assert_eq!(
        protocol.vault(vault).unwrap().phase(&protocol.strategies),
        VaultPhase::Harvested
    );
    assert_eq!(protocol.sync(vault, true, 5), Ok(vec![0]));
    assert_eq!(
        protocol.claim_deposit(vault, alice(), &[ticket], &[FULL_TICKET_FRACTION]),
        Ok(e18(100))
    );
}

#[test]
fn test_fast_redemption_after_sync() {
    let mut protocol = protocol();
    let assets = [asset(0)];
    let strategy = register(&mut protocol, &assets, 0);
    let vault = create_vault(&mut protocol, &assets, &[strategy], &[10_000], VaultFees::default());
    report_unit_prices(&mut protocol, &assets, 1);

    let ticket = protocol.deposit(vault, &[e18(100)], alice(), true, 1).unwrap();
    protocol.harvest(keeper(), &[strategy], &[], 2).unwrap();
    protocol.sync(vault, true, 3).unwrap();
    protocol
        .claim_deposit(vault, alice(), &[ticket], &[FULL_TICKET_FRACTION])
        .unwrap();

    let before = protocol.vault(vault).unwrap().clone();
    assert_eq!(
        protocol.redeem_fast(vault, alice(), e18(25), &[e18(26)]),
        Err(ManagerError::SlippageExceeded(0))
    );
    assert_eq!(protocol.vault(vault).unwrap(), &before);
    assert_eq!(
        protocol.redeem_fast(vault, bob(), e18(1), &[]),
        Err(ManagerError::InsufficientBalance)
    );

    assert_eq!(
        protocol.redeem_fast(vault, alice(), e18(25), &[e18(25)]),
        Ok(vec![e18(25)])
    );
    let shares = &protocol.vault(vault).unwrap().data.shares;
    assert_eq!(shares.balance_of(&alice()), e18(75));
    assert_eq!(shares.total_supply, e18(75));
    assert_eq!(vault_position_value(&protocol, vault, strategy), e18(75));
}
