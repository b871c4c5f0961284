//! Events published after each committed action

use crate::engine::bet::{BetReceipt, RefundReceipt};
use crate::ledger::{Address, SettledBet};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Initialized {
        authority: Address,
        fee_bps: u64,
        max_bet: u64,
    },
    Deposited {
        amount: u64,
        vault_balance: u64,
    },
    Withdrawn {
        amount: u64,
        vault_balance: u64,
    },
    FeeUpdated {
        previous: u64,
        fee_bps: u64,
    },
    MaxBetUpdated {
        previous: u64,
        max_bet: u64,
    },
    AuthorityTransferred {
        previous: Address,
        authority: Address,
    },
    BetPlaced(BetReceipt),
    BetSettled {
        bettor: Address,
        #[serde(flatten)]
        result: SettledBet,
    },
    BetRefunded(RefundReceipt),
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::Initialized { .. } => "initialized",
            EngineEvent::Deposited { .. } => "deposited",
            EngineEvent::Withdrawn { .. } => "withdrawn",
            EngineEvent::FeeUpdated { .. } => "fee_updated",
            EngineEvent::MaxBetUpdated { .. } => "max_bet_updated",
            EngineEvent::AuthorityTransferred { .. } => "authority_transferred",
            EngineEvent::BetPlaced(_) => "bet_placed",
            EngineEvent::BetSettled { .. } => "bet_settled",
            EngineEvent::BetRefunded(_) => "bet_refunded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{CoinSide, RequestId};

    #[test]
    fn test_event_json_is_tagged() {
        let bettor = Address::from_name("alice");
        let event = EngineEvent::BetSettled {
            bettor,
            result: SettledBet {
                request_id: RequestId::derive(1, &bettor),
                guess: CoinSide::Heads,
                outcome: CoinSide::Heads,
                won: true,
                amount: 10,
                payout: 19,
                randomness_value: 8,
                settled_at: 0,
            },
        };

        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "bet_settled");
        assert_eq!(json["outcome"], "heads");
        assert_eq!(json["payout"], 19);
        assert_eq!(event.name(), "bet_settled");
    }
}
