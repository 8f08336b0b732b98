//! Claim tickets of batched deposit and withdrawal requests.
//!
//! Every request joins the open flush batch of its vault and receives a ticket
//! scoped to that batch. Once the batch is synced the ticket can be claimed, in
//! one go or in fractions of `FULL_TICKET_FRACTION`.

use std::collections::BTreeMap;

use alloy_primitives::U256;
use candid::Principal;

use crate::{
    constants::{full_ticket_fraction, FULL_TICKET_FRACTION},
    guards::{run_guards, GuardRequest, RequestKind},
    types::{TicketId, VaultId},
    utils::{
        common::{all_zero, assets_value, mul_div, Rounding},
        error::{arithmetic_err, config_err, ManagerError, ManagerResult},
    },
    vault::{data::VaultData, Vault},
};

#[derive(Clone, Debug, PartialEq)]
pub struct DepositTicket {
    pub vault: VaultId,
    pub owner: Principal,
    pub flush_index: u64,
    pub amounts: Vec<U256>,
    /// Remaining fraction, out of `FULL_TICKET_FRACTION`
    pub fraction: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WithdrawalTicket {
    pub vault: VaultId,
    pub owner: Principal,
    pub flush_index: u64,
    /// Escrowed pool shares
    pub shares: U256,
    /// Remaining fraction, out of `FULL_TICKET_FRACTION`
    pub fraction: u64,
}

/// Claimable once the batch of the ticket is synced
fn claimable(data: &VaultData, flush_index: u64) -> bool {
    flush_index < data.last_synced
}

impl DepositTicket {
    pub fn is_claimable(&self, data: &VaultData) -> bool {
        claimable(data, self.flush_index)
    }
}

impl WithdrawalTicket {
    pub fn is_claimable(&self, data: &VaultData) -> bool {
        claimable(data, self.flush_index)
    }
}

/// Outstanding tickets of every vault
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TicketRegistry {
    next_id: TicketId,
    pub deposits: BTreeMap<TicketId, DepositTicket>,
    pub withdrawals: BTreeMap<TicketId, WithdrawalTicket>,
}

impl TicketRegistry {
    fn next_id(&mut self) -> TicketId {
        self.next_id += 1;
        self.next_id
    }

    pub fn deposit(&self, id: TicketId) -> Option<&DepositTicket> {
        self.deposits.get(&id)
    }

    pub fn withdrawal(&self, id: TicketId) -> Option<&WithdrawalTicket> {
        self.withdrawals.get(&id)
    }
}

fn check_fractions(ids: &[TicketId], fractions: &[u64]) -> ManagerResult<()> {
    if ids.len() != fractions.len() {
        return Err(config_err("Ticket ids and fractions have different lengths."));
    }
    Ok(())
}

/// Queues a deposit into the open batch of the vault and issues its ticket
pub fn request_deposit(
    vault: &mut Vault,
    tickets: &mut TicketRegistry,
    owner: Principal,
    amounts: &[U256],
) -> ManagerResult<TicketId> {
    vault.ensure_live()?;
    if amounts.len() != vault.settings.assets.len() {
        return Err(config_err("Deposit does not match the vault's asset group."));
    }
    if all_zero(amounts) {
        return Err(config_err("Nothing to deposit."));
    }
    run_guards(
        &vault.settings.guards,
        &GuardRequest {
            kind: RequestKind::Deposit,
            owner,
            amounts,
            shares: U256::ZERO,
        },
    )?;

    vault.data.open_batch.add_deposit(amounts)?;
    let id = tickets.next_id();
    tickets.deposits.insert(
        id,
        DepositTicket {
            vault: vault.id(),
            owner,
            flush_index: vault.data.flush_index,
            amounts: amounts.to_vec(),
            fraction: FULL_TICKET_FRACTION,
        },
    );
    Ok(id)
}

/// Claims the listed synced deposit tickets, escrows `shares` of the owner and
/// issues a withdrawal ticket for the open batch
pub fn request_withdrawal(
    vault: &mut Vault,
    tickets: &mut TicketRegistry,
    owner: Principal,
    shares: U256,
    prior_ticket_ids: &[TicketId],
    prior_fractions: &[u64],
) -> ManagerResult<TicketId> {
    vault.ensure_live()?;
    check_fractions(prior_ticket_ids, prior_fractions)?;
    if shares.is_zero() {
        return Err(config_err("Nothing to redeem."));
    }
    run_guards(
        &vault.settings.guards,
        &GuardRequest {
            kind: RequestKind::Withdrawal,
            owner,
            amounts: &[],
            shares,
        },
    )?;

    let mut data = vault.data.clone();
    let mut registry = tickets.clone();
    claim_deposit_tickets(
        &mut data,
        &mut registry,
        vault.id(),
        owner,
        prior_ticket_ids,
        prior_fractions,
    )?;
    data.shares.escrow(owner, shares)?;
    data.open_batch.add_withdrawal(shares)?;

    let id = registry.next_id();
    registry.withdrawals.insert(
        id,
        WithdrawalTicket {
            vault: vault.id(),
            owner,
            flush_index: data.flush_index,
            shares,
            fraction: FULL_TICKET_FRACTION,
        },
    );
    vault.data = data;
    *tickets = registry;
    Ok(id)
}

/// Claims pool shares of synced deposit tickets. Returns the claimed shares.
pub fn claim_deposit(
    vault: &mut Vault,
    tickets: &mut TicketRegistry,
    owner: Principal,
    ticket_ids: &[TicketId],
    fractions: &[u64],
) -> ManagerResult<U256> {
    check_fractions(ticket_ids, fractions)?;
    let mut data = vault.data.clone();
    let mut registry = tickets.clone();
    let claimed = claim_deposit_tickets(
        &mut data,
        &mut registry,
        vault.id(),
        owner,
        ticket_ids,
        fractions,
    )?;
    vault.data = data;
    *tickets = registry;
    Ok(claimed)
}

fn claim_deposit_tickets(
    data: &mut VaultData,
    tickets: &mut TicketRegistry,
    vault: VaultId,
    owner: Principal,
    ticket_ids: &[TicketId],
    fractions: &[u64],
) -> ManagerResult<U256> {
    let mut claimed = U256::ZERO;
    for (id, fraction) in ticket_ids.iter().zip(fractions) {
        if *fraction == 0 {
            continue;
        }
        let invalid = || ManagerError::InvalidDepositNftId(*id);
        let ticket = tickets
            .deposits
            .get_mut(id)
            .filter(|ticket| ticket.vault == vault && ticket.owner == owner)
            .ok_or_else(invalid)?;
        if *fraction > ticket.fraction || !claimable(data, ticket.flush_index) {
            return Err(invalid());
        }
        let sync = data
            .records
            .get_mut(&ticket.flush_index)
            .and_then(|record| record.synced.as_mut())
            .ok_or_else(invalid)?;

        // Nothing was minted when every strategy of the batch was removed before the sync.
        // The deposits sit in the emergency holding area and the ticket stays as their record.
        if sync.minted_user_shares.is_zero() || sync.deposit_value.is_zero() {
            return Err(ManagerError::GhostVault(vault));
        }
        let ticket_value = assets_value(&ticket.amounts, &sync.prices)?;
        let shares = mul_div(
            sync.minted_user_shares * U256::from(*fraction),
            ticket_value,
            full_ticket_fraction() * sync.deposit_value,
            Rounding::Up,
        )?
        .min(sync.minted_user_shares - sync.claimed_shares);
        sync.claimed_shares += shares;

        ticket.fraction -= fraction;
        if ticket.fraction == 0 {
            tickets.deposits.remove(id);
        }
        data.shares.release_unclaimed(owner, shares)?;
        claimed = claimed
            .checked_add(shares)
            .ok_or_else(|| arithmetic_err("Claimed shares overflowed."))?;
    }
    Ok(claimed)
}

/// Claims assets of synced withdrawal tickets. Returns the claimed asset amounts.
pub fn claim_withdrawal(
    vault: &mut Vault,
    tickets: &mut TicketRegistry,
    owner: Principal,
    ticket_ids: &[TicketId],
    fractions: &[u64],
) -> ManagerResult<Vec<U256>> {
    check_fractions(ticket_ids, fractions)?;
    let vault_id = vault.id();
    let mut data = vault.data.clone();
    let mut registry = tickets.clone();
    let mut claimed = vec![U256::ZERO; vault.settings.assets.len()];

    for (id, fraction) in ticket_ids.iter().zip(fractions) {
        if *fraction == 0 {
            continue;
        }
        let invalid = || ManagerError::InvalidWithdrawalNftId(*id);
        let ticket = registry
            .withdrawals
            .get_mut(id)
            .filter(|ticket| ticket.vault == vault_id && ticket.owner == owner)
            .ok_or_else(invalid)?;
        if *fraction > ticket.fraction || !claimable(&data, ticket.flush_index) {
            return Err(invalid());
        }
        let record = data.records.get_mut(&ticket.flush_index).ok_or_else(invalid)?;
        let batch_shares = record.withdrawn_shares;
        let sync = record.synced.as_mut().ok_or_else(invalid)?;

        for (asset, total) in sync.withdrawn_assets.iter().enumerate() {
            if batch_shares.is_zero() {
                break;
            }
            let amount = mul_div(
                *total * U256::from(*fraction),
                ticket.shares,
                full_ticket_fraction() * batch_shares,
                Rounding::Up,
            )?
            .min(*total - sync.claimed_assets[asset]);
            sync.claimed_assets[asset] += amount;
            claimed[asset] += amount;
        }

        ticket.fraction -= fraction;
        if ticket.fraction == 0 {
            registry.withdrawals.remove(id);
        }
    }

    vault.data = data;
    *tickets = registry;
    Ok(claimed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constants::scale,
        guards::GuardDefinition,
        vault::{
            data::{FlushBatch, FlushRecord, SyncRecord},
            settings::VaultSettings,
        },
    };

    const FULL: u64 = FULL_TICKET_FRACTION;

    fn e18(value: u64) -> U256 {
        U256::from(value) * scale()
    }

    fn vault() -> Vault {
        let mut settings = VaultSettings::default();
        settings
            .id(1)
            .owner(Principal::from_slice(&[1]))
            .assets(vec![Principal::from_slice(&[10])])
            .slots(&[1], &[10_000]);
        Vault::new(settings, 0)
    }

    /// Flushes and syncs the open batch with the given outcome, at a 1 USD price
    fn settle(vault: &mut Vault, minted_user_shares: U256, withdrawn_assets: Vec<U256>) {
        let index = vault.data.flush_index;
        let batch = std::mem::replace(&mut vault.data.open_batch, FlushBatch::new(1));
        vault
            .data
            .shares
            .burn_escrowed(batch.withdrawn_shares)
            .unwrap();
        vault.data.shares.mint_unclaimed(minted_user_shares).unwrap();
        let prices = vec![scale()];
        let deposit_value = assets_value(&batch.deposits, &prices).unwrap();
        vault.data.records.insert(
            index,
            FlushRecord {
                flush_index: index,
                strategies: vec![1],
                harvest_indexes: vec![Some(index)],
                deposits: batch.deposits,
                withdrawn_shares: batch.withdrawn_shares,
                flushed_at: 0,
                synced: Some(SyncRecord {
                    prices,
                    deposit_value,
                    minted_user_shares,
                    claimed_assets: vec![U256::ZERO; withdrawn_assets.len()],
                    withdrawn_assets,
                    ..Default::default()
                }),
            },
        );
        vault.data.flush_index += 1;
        vault.data.last_synced = vault.data.flush_index;
    }

    #[test]
    fn test_deposit_claims_round_up_and_are_capped_by_the_batch() {
        let alice = Principal::from_slice(&[2]);
        let bob = Principal::from_slice(&[3]);
        let mut vault = vault();
        let mut tickets = TicketRegistry::default();

        let alice_ticket =
            request_deposit(&mut vault, &mut tickets, alice, &[U256::from(2)]).unwrap();
        let bob_ticket = request_deposit(&mut vault, &mut tickets, bob, &[U256::from(1)]).unwrap();
        assert_eq!(
            claim_deposit(&mut vault, &mut tickets, alice, &[alice_ticket], &[FULL]),
            Err(ManagerError::InvalidDepositNftId(alice_ticket))
        );
        settle(&mut vault, U256::from(10), vec![U256::ZERO]);

        let alice_shares =
            claim_deposit(&mut vault, &mut tickets, alice, &[alice_ticket], &[FULL]).unwrap();
        let bob_shares =
            claim_deposit(&mut vault, &mut tickets, bob, &[bob_ticket], &[FULL]).unwrap();
        assert_eq!(alice_shares, U256::from(7));
        assert_eq!(bob_shares, U256::from(3));
        assert_eq!(vault.data.shares.unclaimed, U256::ZERO);
        assert!(tickets.deposits.is_empty());
    }

    #[test]
    fn test_fractional_claims() {
        let alice = Principal::from_slice(&[2]);
        let mut vault = vault();
        let mut tickets = TicketRegistry::default();
        let ticket = request_deposit(&mut vault, &mut tickets, alice, &[e18(100)]).unwrap();
        settle(&mut vault, e18(100), vec![U256::ZERO]);

        let half = FULL / 2;
        assert_eq!(
            claim_deposit(&mut vault, &mut tickets, alice, &[ticket], &[half]),
            Ok(e18(50))
        );
        assert_eq!(tickets.deposit(ticket).map(|ticket| ticket.fraction), Some(half));
        assert_eq!(
            claim_deposit(&mut vault, &mut tickets, alice, &[ticket], &[half + 1]),
            Err(ManagerError::InvalidDepositNftId(ticket))
        );
        assert_eq!(
            claim_deposit(&mut vault, &mut tickets, alice, &[ticket], &[half]),
            Ok(e18(50))
        );
        assert!(tickets.deposit(ticket).is_none());
        assert_eq!(
            claim_deposit(&mut vault, &mut tickets, alice, &[ticket], &[half]),
            Err(ManagerError::InvalidDepositNftId(ticket))
        );
        assert_eq!(vault.data.shares.balance_of(&alice), e18(100));
    }

    #[test]
    fn test_zero_fraction_is_a_noop() {
        let alice = Principal::from_slice(&[2]);
        let mut vault = vault();
        let mut tickets = TicketRegistry::default();
        let before = (vault.clone(), tickets.clone());
        assert_eq!(
            claim_deposit(&mut vault, &mut tickets, alice, &[42], &[0]),
            Ok(U256::ZERO)
        );
        assert_eq!(
            claim_withdrawal(&mut vault, &mut tickets, alice, &[42], &[0]),
            Ok(vec![U256::ZERO])
        );
        assert_eq!((vault, tickets), before);
    }

    #[test]
    fn test_batch_without_minted_shares_keeps_its_tickets() {
        let alice = Principal::from_slice(&[2]);
        let mut vault = vault();
        let mut tickets = TicketRegistry::default();
        let ticket = request_deposit(&mut vault, &mut tickets, alice, &[e18(5)]).unwrap();
        settle(&mut vault, U256::ZERO, vec![U256::ZERO]);

        assert_eq!(
            claim_deposit(&mut vault, &mut tickets, alice, &[ticket], &[FULL]),
            Err(ManagerError::GhostVault(1))
        );
        assert_eq!(tickets.deposit(ticket).map(|ticket| ticket.fraction), Some(FULL));
    }

    #[test]
    fn test_foreign_ticket_is_rejected() {
        let alice = Principal::from_slice(&[2]);
        let bob = Principal::from_slice(&[3]);
        let mut vault = vault();
        let mut tickets = TicketRegistry::default();
        let ticket = request_deposit(&mut vault, &mut tickets, alice, &[e18(1)]).unwrap();
        settle(&mut vault, e18(1), vec![U256::ZERO]);
        assert_eq!(
            claim_deposit(&mut vault, &mut tickets, bob, &[ticket], &[FULL]),
            Err(ManagerError::InvalidDepositNftId(ticket))
        );
    }

    #[test]
    fn test_withdrawal_claims_prior_deposit_tickets() {
        let alice = Principal::from_slice(&[2]);
        let mut vault = vault();
        let mut tickets = TicketRegistry::default();
        let deposit = request_deposit(&mut vault, &mut tickets, alice, &[e18(100)]).unwrap();
        settle(&mut vault, e18(100), vec![U256::ZERO]);

        assert_eq!(
            request_withdrawal(&mut vault, &mut tickets, alice, e18(101), &[deposit], &[FULL]),
            Err(ManagerError::InsufficientBalance)
        );
        assert!(tickets.deposit(deposit).is_some());

        let withdrawal =
            request_withdrawal(&mut vault, &mut tickets, alice, e18(30), &[deposit], &[FULL])
                .unwrap();
        assert_eq!(vault.data.shares.balance_of(&alice), e18(70));
        assert_eq!(vault.data.shares.escrowed, e18(30));
        assert_eq!(vault.data.open_batch.withdrawn_shares, e18(30));

        settle(&mut vault, U256::ZERO, vec![e18(33)]);
        assert_eq!(
            claim_withdrawal(&mut vault, &mut tickets, alice, &[withdrawal], &[FULL]),
            Ok(vec![e18(33)])
        );
        assert_eq!(vault.data.shares.total_supply, e18(70));
        assert!(tickets.withdrawals.is_empty());
    }

    #[test]
    fn test_guards_and_ghost_vault() {
        let bob = Principal::from_slice(&[3]);
        let mut vault = vault();
        vault.settings.guards(vec![GuardDefinition::DenyList(vec![bob])]);
        let mut tickets = TicketRegistry::default();

        assert_eq!(
            request_deposit(&mut vault, &mut tickets, bob, &[e18(1)]),
            Err(ManagerError::GuardFailed(0))
        );
        assert!(vault.data.open_batch.is_empty());

        vault.settings.ghost_strategy(1);
        assert_eq!(
            request_deposit(&mut vault, &mut tickets, Principal::from_slice(&[2]), &[e18(1)]),
            Err(ManagerError::GhostVault(1))
        );
    }
}
