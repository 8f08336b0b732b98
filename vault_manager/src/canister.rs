use std::time::Duration;

use candid::{Nat, Principal};
use ic_canister::{generate_idl, init, query, update, Canister, Idl, PreUpdate};
use ic_exports::{ic_cdk::caller, ic_cdk::trap, ic_cdk_timers::set_timer_interval};

use crate::{
    access::Role,
    cleanup::journal_cleanup,
    config::ProtocolConfig,
    journal::{JournalCollection, JournalRecord, JournalScope, LogType},
    protocol::Protocol,
    state::{journal_collections, with_protocol, with_protocol_mut},
    strategy::{adapter::StrategyReport, ledger::HarvestOutcome, reported::ReportedStrategy},
    types::{
        FlushRecordQuery, HarvestParams, HarvestRecordQuery, InitArgs, StrategyId, StrategyInput,
        StrategyQuery, TicketId, TicketQuery, VaultId, VaultInput, VaultQuery,
    },
    utils::{
        common::{current_time, nat_to_u256, nats_to_u256s, u256_to_nat, u256s_to_nats},
        error::ManagerResult,
    },
};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Runs `operation` on the protocol state and journals its outcome
fn journaled<T>(
    scope: Option<JournalScope>,
    log_type: LogType,
    note: &str,
    operation: impl FnOnce(&mut Protocol) -> ManagerResult<T>,
) -> ManagerResult<T> {
    let mut journal = JournalCollection::open(scope);
    let result = with_protocol_mut(operation);
    journal.append_result(&result, log_type, note);
    result
}

#[derive(Canister)]
pub struct VaultManager {
    #[id]
    id: Principal,
}

impl PreUpdate for VaultManager {}

impl VaultManager {
    // INITIALIZATION
    #[init]
    pub fn init(&mut self, args: InitArgs) {
        let config = match ProtocolConfig::try_from(&args) {
            Ok(config) => config,
            Err(err) => trap(&format!("Invalid init arguments: {:?}", err)),
        };
        with_protocol_mut(|protocol| {
            *protocol = Protocol::new(config);
            protocol.roles.grant(Role::Admin, args.admin);
        });

        set_timer_interval(CLEANUP_INTERVAL, || {
            journal_cleanup(current_time());
        });
    }

    // USER FLOWS
    #[update]
    pub fn deposit(
        &mut self,
        vault: VaultId,
        amounts: Vec<Nat>,
        receiver: Principal,
        do_flush: bool,
    ) -> ManagerResult<TicketId> {
        journaled(
            Some(JournalScope::Vault(vault)),
            LogType::Request,
            "Deposit request",
            |protocol| {
                let amounts = nats_to_u256s(&amounts)?;
                protocol.deposit(vault, &amounts, receiver, do_flush, current_time())
            },
        )
    }

    #[update]
    pub fn redeem(
        &mut self,
        vault: VaultId,
        shares: Nat,
        prior_tickets: Vec<TicketId>,
        prior_fractions: Vec<u64>,
    ) -> ManagerResult<TicketId> {
        journaled(
            Some(JournalScope::Vault(vault)),
            LogType::Request,
            "Withdrawal request",
            |protocol| {
                let shares = nat_to_u256(&shares)?;
                protocol.redeem(vault, caller(), shares, &prior_tickets, &prior_fractions)
            },
        )
    }

    #[update]
    pub fn redeem_fast(
        &mut self,
        vault: VaultId,
        shares: Nat,
        min_amounts: Vec<Nat>,
    ) -> ManagerResult<Vec<Nat>> {
        journaled(
            Some(JournalScope::Vault(vault)),
            LogType::Request,
            "Fast redemption",
            |protocol| {
                let shares = nat_to_u256(&shares)?;
                let min_amounts = nats_to_u256s(&min_amounts)?;
                let assets = protocol.redeem_fast(vault, caller(), shares, &min_amounts)?;
                Ok(u256s_to_nats(&assets))
            },
        )
    }

    #[update]
    pub fn claim_deposit(
        &mut self,
        vault: VaultId,
        tickets: Vec<TicketId>,
        fractions: Vec<u64>,
    ) -> ManagerResult<Nat> {
        journaled(
            Some(JournalScope::Vault(vault)),
            LogType::Claim,
            "Deposit claim",
            |protocol| {
                let shares = protocol.claim_deposit(vault, caller(), &tickets, &fractions)?;
                Ok(u256_to_nat(&shares))
            },
        )
    }

    #[update]
    pub fn claim_withdrawal(
        &mut self,
        vault: VaultId,
        tickets: Vec<TicketId>,
        fractions: Vec<u64>,
    ) -> ManagerResult<Vec<Nat>> {
        journaled(
            Some(JournalScope::Vault(vault)),
            LogType::Claim,
            "Withdrawal claim",
            |protocol| {
                let assets = protocol.claim_withdrawal(vault, caller(), &tickets, &fractions)?;
                Ok(u256s_to_nats(&assets))
            },
        )
    }

    // SETTLEMENT
    #[update]
    pub fn flush(&mut self, vault: VaultId) -> ManagerResult<u64> {
        journaled(
            Some(JournalScope::Vault(vault)),
            LogType::Flush,
            "Flush",
            |protocol| protocol.flush(vault, current_time()),
        )
    }

    #[update]
    pub fn harvest(
        &mut self,
        strategies: Vec<StrategyId>,
        params: Vec<HarvestParams>,
    ) -> ManagerResult<Vec<HarvestOutcome>> {
        let mut journal = JournalCollection::open(None);
        let result = with_protocol_mut(|protocol| {
            protocol.harvest(caller(), &strategies, &params, current_time())
        });
        log_harvest_outcomes(&mut journal, &strategies, &result);
        result
    }

    #[update]
    pub fn harvest_continue(
        &mut self,
        strategies: Vec<StrategyId>,
        continuation_data: Vec<Vec<u8>>,
    ) -> ManagerResult<Vec<HarvestOutcome>> {
        let mut journal = JournalCollection::open(None);
        let result = with_protocol_mut(|protocol| {
            protocol.harvest_continue(caller(), &strategies, &continuation_data, current_time())
        });
        log_harvest_outcomes(&mut journal, &strategies, &result);
        result
    }

    #[update]
    pub fn sync(
        &mut self,
        vault: VaultId,
        revert_on_missing_harvest: bool,
    ) -> ManagerResult<Vec<u64>> {
        let mut journal = JournalCollection::open(Some(JournalScope::Vault(vault)));
        let result = with_protocol_mut(|protocol| {
            protocol.sync(vault, revert_on_missing_harvest, current_time())
        });
        journal.append_result(&result, LogType::Sync, "Sync");
        if let Ok(indexes) = &result {
            with_protocol(|protocol| {
                for index in indexes {
                    let Some(synced) = protocol
                        .vault(vault)
                        .ok()
                        .and_then(|vault| vault.data.record(*index))
                        .and_then(|record| record.sync_record())
                    else {
                        continue;
                    };
                    journal.append_note(
                        Ok(()),
                        LogType::Fee,
                        format!(
                            "Flush {} minted fee shares: management {}, performance {}, deposit {}.",
                            index,
                            synced.fees.management,
                            synced.fees.performance,
                            synced.fees.deposit
                        ),
                    );
                }
            });
        }
        result
    }

    // STRATEGY SHARES
    #[update]
    pub fn redeem_strategy_shares_async(
        &mut self,
        strategy: StrategyId,
        shares: Nat,
    ) -> ManagerResult<u64> {
        journaled(
            Some(JournalScope::Strategy(strategy)),
            LogType::Request,
            "Strategy share redemption",
            |protocol| {
                let shares = nat_to_u256(&shares)?;
                protocol.redeem_strategy_shares_async(caller(), strategy, shares)
            },
        )
    }

    #[update]
    pub fn claim_strategy_share_withdrawals(
        &mut self,
        strategies: Vec<StrategyId>,
        harvest_indexes: Vec<u64>,
    ) -> ManagerResult<Vec<Vec<Nat>>> {
        journaled(None, LogType::Claim, "Strategy share claim", |protocol| {
            let claimed =
                protocol.claim_strategy_share_withdrawals(caller(), &strategies, &harvest_indexes)?;
            Ok(claimed.iter().map(|assets| u256s_to_nats(assets)).collect())
        })
    }

    // STRATEGY SET
    #[update]
    pub fn register_strategy(&mut self, input: StrategyInput) -> ManagerResult<StrategyId> {
        journaled(None, LogType::Info, "Strategy registration", |protocol| {
            let rounds = if input.atomic { 0 } else { 1 };
            let adapter = ReportedStrategy::new(input.assets.len(), rounds);
            protocol.register_strategy(caller(), input, Box::new(adapter))
        })
    }

    #[update]
    pub fn create_vault(&mut self, input: VaultInput) -> ManagerResult<VaultId> {
        journaled(None, LogType::Info, "Vault creation", |protocol| {
            protocol.create_vault(caller(), input, current_time())
        })
    }

    #[update]
    pub fn remove_strategy(
        &mut self,
        strategy: StrategyId,
        emergency_withdraw: bool,
    ) -> ManagerResult<Vec<Nat>> {
        journaled(
            Some(JournalScope::Strategy(strategy)),
            LogType::StrategyRemoval,
            "Strategy removal",
            |protocol| {
                let summary = protocol.remove_strategy(caller(), strategy, emergency_withdraw)?;
                Ok(u256s_to_nats(&summary.recovered))
            },
        )
    }

    #[update]
    pub fn remove_strategy_from_vault(
        &mut self,
        vault: VaultId,
        strategy: StrategyId,
    ) -> ManagerResult<Vec<Nat>> {
        journaled(
            Some(JournalScope::Vault(vault)),
            LogType::StrategyRemoval,
            format!("Removal of strategy {}", strategy).as_str(),
            |protocol| {
                let summary = protocol.remove_strategy_from_vault(caller(), vault, strategy)?;
                Ok(u256s_to_nats(&summary.recovered))
            },
        )
    }

    // KEEPER AND ADMIN
    #[update]
    pub fn grant_role(&mut self, role: Role, principal: Principal) -> ManagerResult<()> {
        journaled(None, LogType::Info, "Role grant", |protocol| {
            protocol.grant_role(caller(), role, principal)
        })
    }

    #[update]
    pub fn revoke_role(&mut self, role: Role, principal: Principal) -> ManagerResult<()> {
        journaled(None, LogType::Info, "Role revocation", |protocol| {
            protocol.revoke_role(caller(), role, principal)
        })
    }

    #[update]
    pub fn report_prices(&mut self, prices: Vec<(Principal, Nat)>) -> ManagerResult<()> {
        journaled(None, LogType::Info, "Price report", |protocol| {
            let prices = prices
                .iter()
                .map(|(asset, price)| Ok((*asset, nat_to_u256(price)?)))
                .collect::<ManagerResult<Vec<_>>>()?;
            protocol.report_prices(caller(), &prices, current_time())
        })
    }

    #[update]
    pub fn report_strategy_yield(
        &mut self,
        strategy: StrategyId,
        report: StrategyReport,
    ) -> ManagerResult<()> {
        journaled(
            Some(JournalScope::Strategy(strategy)),
            LogType::Info,
            "Yield report",
            |protocol| protocol.report_strategy_yield(caller(), strategy, &report),
        )
    }

    #[update]
    pub fn cleanup_journal(&mut self) -> ManagerResult<u64> {
        with_protocol(|protocol| protocol.roles.check(Role::Admin, caller()))?;
        Ok(journal_cleanup(current_time()))
    }

    // QUERIES
    #[query]
    pub fn get_vault(&self, vault: VaultId) -> ManagerResult<VaultQuery> {
        with_protocol(|protocol| protocol.vault_query(vault))
    }

    #[query]
    pub fn get_vault_balance(&self, vault: VaultId, owner: Principal) -> ManagerResult<Nat> {
        with_protocol(|protocol| protocol.vault_balance(vault, owner))
    }

    #[query]
    pub fn get_strategy(&self, strategy: StrategyId) -> ManagerResult<StrategyQuery> {
        with_protocol(|protocol| protocol.strategy_query(strategy))
    }

    #[query]
    pub fn get_deposit_ticket(&self, ticket: TicketId) -> ManagerResult<TicketQuery> {
        with_protocol(|protocol| protocol.deposit_ticket_query(ticket))
    }

    #[query]
    pub fn get_withdrawal_ticket(&self, ticket: TicketId) -> ManagerResult<TicketQuery> {
        with_protocol(|protocol| protocol.withdrawal_ticket_query(ticket))
    }

    #[query]
    pub fn get_flush_record(
        &self,
        vault: VaultId,
        flush_index: u64,
    ) -> ManagerResult<FlushRecordQuery> {
        with_protocol(|protocol| protocol.flush_record_query(vault, flush_index))
    }

    #[query]
    pub fn get_harvest_record(
        &self,
        strategy: StrategyId,
        harvest_index: u64,
    ) -> ManagerResult<HarvestRecordQuery> {
        with_protocol(|protocol| protocol.harvest_record_query(strategy, harvest_index))
    }

    #[query]
    pub fn get_emergency_holdings(&self) -> Vec<(StrategyId, Vec<Nat>)> {
        with_protocol(|protocol| protocol.emergency_holdings())
    }

    /// Most recent `depth` journal collections, newest first
    #[query]
    pub fn get_logs(&self, depth: u64) -> Vec<JournalRecord> {
        journal_collections()
            .into_iter()
            .rev()
            .take(depth as usize)
            .map(|(_, record)| record)
            .collect()
    }

    pub fn idl() -> Idl {
        generate_idl!()
    }
}

fn log_harvest_outcomes(
    journal: &mut JournalCollection,
    strategies: &[StrategyId],
    result: &ManagerResult<Vec<HarvestOutcome>>,
) {
    match result {
        Ok(outcomes) => {
            for (strategy, outcome) in strategies.iter().zip(outcomes) {
                let note = match outcome {
                    HarvestOutcome::Completed(index) => {
                        format!("Strategy {} finalized harvest {}.", strategy, index)
                    }
                    HarvestOutcome::Pending(index, token) => format!(
                        "Strategy {} awaits a continuation of harvest {} with token {}.",
                        strategy,
                        index,
                        token.to_hex()
                    ),
                };
                journal.append_note(Ok(()), LogType::Harvest, note);
            }
        }
        Err(err) => {
            journal.append_note(Err(err.clone()), LogType::Harvest, "Harvest failed.");
        }
    }
}
