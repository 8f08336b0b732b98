//! Strategy adapter whose external position is observed by a keeper.
//!
//! The canister cannot call the external protocols directly, so a keeper mirrors the
//! position: it reports passive gains and losses and claimable rewards, and drives the
//! continuation rounds of non-atomic strategies.

use alloy_primitives::U256;

use crate::utils::{
    common::{
        add_assign_assets, all_zero, assets_value, checked_sub, mul_div, nats_to_u256s, Rounding,
    },
    error::{arithmetic_err, config_err, ManagerError, ManagerResult},
};

use super::{
    adapter::{ProtocolAction, StrategyAdapter, StrategyFlows, StrategyReport},
    lock::ContinuationToken,
};

/// Flows accepted by a non-atomic strategy and not settled yet
#[derive(Clone, Debug, PartialEq)]
struct InFlight {
    flows: StrategyFlows,
    rounds_left: u8,
    nonce: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReportedStrategy {
    holdings: Vec<U256>,
    rewards: Vec<U256>,
    /// Number of continuation rounds a flow needs. Zero settles within the harvest call.
    continuation_rounds: u8,
    in_flight: Option<InFlight>,
    nonce: u64,
}

impl ReportedStrategy {
    pub fn new(asset_count: usize, continuation_rounds: u8) -> Self {
        Self {
            holdings: vec![U256::ZERO; asset_count],
            rewards: vec![U256::ZERO; asset_count],
            continuation_rounds,
            in_flight: None,
            nonce: 0,
        }
    }

    pub fn holdings(&self) -> &[U256] {
        &self.holdings
    }

    pub fn rewards(&self) -> &[U256] {
        &self.rewards
    }

    fn token(&self) -> ContinuationToken {
        ContinuationToken(self.nonce.to_be_bytes().to_vec())
    }

    /// Amounts making up `shares / total_shares` of the holdings
    fn fraction_of_holdings(&self, shares: U256, total_shares: U256) -> ManagerResult<Vec<U256>> {
        if shares.is_zero() {
            return Ok(vec![U256::ZERO; self.holdings.len()]);
        }
        if shares > total_shares {
            return Err(ManagerError::InsufficientBalance);
        }
        self.holdings
            .iter()
            .map(|held| mul_div(*held, shares, total_shares, Rounding::Down))
            .collect()
    }

    /// Withdraws `shares / total_shares` of the holdings
    fn withdraw_fraction(&mut self, shares: U256, total_shares: U256) -> ManagerResult<Vec<U256>> {
        let withdrawn = self.fraction_of_holdings(shares, total_shares)?;
        for (held, amount) in self.holdings.iter_mut().zip(&withdrawn) {
            *held -= *amount;
        }
        Ok(withdrawn)
    }

    /// Withdrawals are settled against the position held before the deposits arrive
    fn settle(&mut self, flows: &StrategyFlows) -> ManagerResult<Vec<U256>> {
        let withdrawn = self.withdraw_fraction(flows.withdrawn_shares, flows.total_shares)?;
        if !flows.deposits.is_empty() {
            add_assign_assets(&mut self.holdings, &flows.deposits)?;
        }
        Ok(withdrawn)
    }

    fn checked_amounts(&self, amounts: &[candid::Nat]) -> ManagerResult<Option<Vec<U256>>> {
        if amounts.is_empty() {
            return Ok(None);
        }
        if amounts.len() != self.holdings.len() {
            return Err(config_err("Report does not match the strategy's asset group."));
        }
        Ok(Some(nats_to_u256s(amounts)?))
    }
}

impl StrategyAdapter for ReportedStrategy {
    fn total_value(&self, prices: &[U256]) -> ManagerResult<U256> {
        assets_value(&self.holdings, prices)
    }

    fn compound(&mut self, _swap_info: &[u8], prices: &[U256]) -> ManagerResult<U256> {
        if all_zero(&self.rewards) {
            return Ok(U256::ZERO);
        }
        let value = assets_value(&self.rewards, prices)?;
        let rewards = std::mem::replace(&mut self.rewards, vec![U256::ZERO; self.holdings.len()]);
        add_assign_assets(&mut self.holdings, &rewards)?;
        Ok(value)
    }

    fn preview_flows(&self, flows: &StrategyFlows) -> ManagerResult<Vec<U256>> {
        self.fraction_of_holdings(flows.withdrawn_shares, flows.total_shares)
    }

    fn process_flows(&mut self, flows: &StrategyFlows) -> ManagerResult<ProtocolAction> {
        if self.in_flight.is_some() {
            return Err(ManagerError::Custom(
                "The previous protocol action is still in flight.".to_string(),
            ));
        }
        if self.continuation_rounds == 0 {
            return Ok(ProtocolAction::Done(self.settle(flows)?));
        }
        self.nonce += 1;
        self.in_flight = Some(InFlight {
            flows: flows.clone(),
            rounds_left: self.continuation_rounds,
            nonce: self.nonce,
        });
        Ok(ProtocolAction::Pending(self.token()))
    }

    fn continue_action(
        &mut self,
        token: &ContinuationToken,
        _data: &[u8],
    ) -> ManagerResult<ProtocolAction> {
        let mut in_flight = self.in_flight.take().ok_or(ManagerError::NonExistentValue)?;
        if ContinuationToken(in_flight.nonce.to_be_bytes().to_vec()) != *token {
            self.in_flight = Some(in_flight);
            return Err(ManagerError::DecodingError(format!(
                "Unknown continuation token {}.",
                token.to_hex()
            )));
        }

        in_flight.rounds_left = in_flight.rounds_left.saturating_sub(1);
        if in_flight.rounds_left == 0 {
            return Ok(ProtocolAction::Done(self.settle(&in_flight.flows)?));
        }
        self.nonce += 1;
        in_flight.nonce = self.nonce;
        self.in_flight = Some(in_flight);
        Ok(ProtocolAction::Pending(self.token()))
    }

    fn cancel_action(&mut self) -> ManagerResult<()> {
        self.in_flight = None;
        Ok(())
    }

    fn preview_redeem_fast(&self, shares: U256, total_shares: U256) -> ManagerResult<Vec<U256>> {
        self.fraction_of_holdings(shares, total_shares)
    }

    fn redeem_fast(&mut self, shares: U256, total_shares: U256) -> ManagerResult<Vec<U256>> {
        if self.in_flight.is_some() {
            return Err(ManagerError::Custom(
                "Fast redemption while a protocol action is in flight.".to_string(),
            ));
        }
        self.withdraw_fraction(shares, total_shares)
    }

    fn emergency_withdraw(&mut self) -> ManagerResult<Vec<U256>> {
        let asset_count = self.holdings.len();
        let mut recovered = std::mem::replace(&mut self.holdings, vec![U256::ZERO; asset_count]);
        let rewards = std::mem::replace(&mut self.rewards, vec![U256::ZERO; asset_count]);
        add_assign_assets(&mut recovered, &rewards)?;
        // Deposits of an unsettled action never reached the position.
        if let Some(in_flight) = self.in_flight.take() {
            if !in_flight.flows.deposits.is_empty() {
                add_assign_assets(&mut recovered, &in_flight.flows.deposits)?;
            }
        }
        Ok(recovered)
    }

    fn box_clone(&self) -> Box<dyn StrategyAdapter> {
        Box::new(self.clone())
    }

    fn apply_report(&mut self, report: &StrategyReport) -> ManagerResult<()> {
        let gains = self.checked_amounts(&report.gains)?;
        let losses = self.checked_amounts(&report.losses)?;
        let rewards = self.checked_amounts(&report.rewards)?;

        let mut holdings = self.holdings.clone();
        if let Some(gains) = gains {
            add_assign_assets(&mut holdings, &gains)?;
        }
        if let Some(losses) = losses {
            for (held, lost) in holdings.iter_mut().zip(losses) {
                *held = checked_sub(*held, lost, "Reported holding")?;
            }
        }
        let mut pending_rewards = self.rewards.clone();
        if let Some(rewards) = rewards {
            add_assign_assets(&mut pending_rewards, &rewards)
                .map_err(|_| arithmetic_err("Reward amount overflowed."))?;
        }

        self.holdings = holdings;
        self.rewards = pending_rewards;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::scale;
    use candid::Nat;

    fn e18(value: u64) -> U256 {
        U256::from(value) * scale()
    }

    #[test]
    fn test_atomic_flows_settle_immediately() {
        let mut strategy = ReportedStrategy::new(2, 0);
        let deposit = StrategyFlows {
            deposits: vec![e18(10), e18(20)],
            withdrawn_shares: U256::ZERO,
            total_shares: U256::ZERO,
        };
        assert_eq!(
            strategy.process_flows(&deposit).unwrap(),
            ProtocolAction::Done(vec![U256::ZERO, U256::ZERO])
        );
        assert_eq!(strategy.holdings(), &[e18(10), e18(20)]);

        let withdrawal = StrategyFlows {
            deposits: vec![],
            withdrawn_shares: U256::from(1),
            total_shares: U256::from(4),
        };
        assert_eq!(
            strategy.process_flows(&withdrawal).unwrap(),
            ProtocolAction::Done(vec![e18(10) / U256::from(4), e18(5)])
        );
    }

    #[test]
    fn test_continuation_rounds() {
        let mut strategy = ReportedStrategy::new(1, 2);
        let flows = StrategyFlows {
            deposits: vec![e18(10)],
            withdrawn_shares: U256::ZERO,
            total_shares: U256::ZERO,
        };
        let first = match strategy.process_flows(&flows).unwrap() {
            ProtocolAction::Pending(token) => token,
            action => panic!("unexpected action {:?}", action),
        };
        assert!(strategy.process_flows(&flows).is_err());

        let second = match strategy.continue_action(&first, &[]).unwrap() {
            ProtocolAction::Pending(token) => token,
            action => panic!("unexpected action {:?}", action),
        };
        assert_ne!(first, second);
        assert!(matches!(
            strategy.continue_action(&first, &[]),
            Err(ManagerError::DecodingError(_))
        ));
        assert_eq!(strategy.holdings(), &[U256::ZERO]);

        assert_eq!(
            strategy.continue_action(&second, &[]).unwrap(),
            ProtocolAction::Done(vec![U256::ZERO])
        );
        assert_eq!(strategy.holdings(), &[e18(10)]);
    }

    #[test]
    fn test_report_and_compound() {
        let mut strategy = ReportedStrategy::new(1, 0);
        strategy
            .apply_report(&StrategyReport {
                gains: vec![Nat::from(100_u64)],
                losses: vec![],
                rewards: vec![Nat::from(5_u64)],
            })
            .unwrap();
        assert_eq!(strategy.total_value(&[scale()]).unwrap(), U256::from(100));

        strategy
            .apply_report(&StrategyReport {
                gains: vec![],
                losses: vec![Nat::from(101_u64)],
                rewards: vec![],
            })
            .unwrap_err();
        assert_eq!(strategy.holdings(), &[U256::from(100)]);

        let added = strategy
            .compound(&[], &[U256::from(2) * scale()])
            .unwrap();
        assert_eq!(added, U256::from(10));
        assert_eq!(strategy.holdings(), &[U256::from(105)]);
        assert_eq!(strategy.rewards(), &[U256::ZERO]);
    }

    #[test]
    fn test_emergency_withdraw_recovers_in_flight_deposits() {
        let mut strategy = ReportedStrategy::new(1, 1);
        strategy
            .apply_report(&StrategyReport {
                gains: vec![Nat::from(7_u64)],
                losses: vec![],
                rewards: vec![Nat::from(1_u64)],
            })
            .unwrap();
        strategy
            .process_flows(&StrategyFlows {
                deposits: vec![U256::from(10)],
                withdrawn_shares: U256::ZERO,
                total_shares: U256::ZERO,
            })
            .unwrap();

        assert_eq!(strategy.emergency_withdraw().unwrap(), vec![U256::from(18)]);
        assert_eq!(strategy.holdings(), &[U256::ZERO]);
        assert!(strategy.continue_action(&ContinuationToken(vec![]), &[]).is_err());
    }

    #[test]
    fn test_preview_copy_and_cancel() {
        let mut strategy = ReportedStrategy::new(1, 1);
        strategy
            .apply_report(&StrategyReport {
                gains: vec![Nat::from(100_u64)],
                losses: vec![],
                rewards: vec![],
            })
            .unwrap();
        let flows = StrategyFlows {
            deposits: vec![U256::from(10)],
            withdrawn_shares: U256::from(1),
            total_shares: U256::from(4),
        };
        assert_eq!(strategy.preview_flows(&flows), Ok(vec![U256::from(25)]));

        // A copy moves independently of the original
        let mut copy = strategy.box_clone();
        copy.process_flows(&flows).unwrap();
        assert!(strategy.in_flight.is_none());
        assert!(strategy.process_flows(&flows).is_ok());

        // A cancelled action never settles, its deposits stay out of the position
        strategy.cancel_action().unwrap();
        assert!(strategy.in_flight.is_none());
        assert_eq!(strategy.holdings(), &[U256::from(100)]);
        assert_eq!(strategy.emergency_withdraw(), Ok(vec![U256::from(100)]));
    }
}
