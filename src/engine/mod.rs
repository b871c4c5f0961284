//! Coin-flip wagering engine
//!
//! [`CoinFlipEngine::execute`] is the single mutating entry point. Each
//! instruction runs as one ledger action; on success the resulting
//! [`EngineEvent`] is published to subscribers and returned to the caller.
//! Events are published before the ledger accepts the next action, so
//! subscribers see them in commit order across all callers.

pub mod bet;
pub mod events;
pub mod vault_manager;

pub use bet::{compute_payout, BetReceipt, RefundReceipt};
pub use events::EngineEvent;
pub use vault_manager::VaultSnapshot;

use crate::config::CoinFlipConfig;
use crate::errors::EngineResult;
use crate::ledger::{
    Address, BetStatus, GlobalConfig, Ledger, LedgerTx, RequestId, SettledBet, UserBetRecord,
    VaultState,
};
use crate::randomness::{LedgerRandomness, RandomnessAdapter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const DEFAULT_EVENT_CAPACITY: usize = 1_024;
const DEFAULT_BET_EXPIRY_SECS: i64 = 3_600;

/// Actions a caller can submit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "instruction", rename_all = "snake_case")]
pub enum Instruction {
    Initialize { fee_bps: u64, max_bet: u64 },
    DepositSol { amount: u64 },
    WithdrawSol { amount: u64 },
    UpdateFee { fee_bps: u64 },
    UpdateMaxBet { max_bet: u64 },
    TransferAuthority { new_authority: Address },
    PlaceBet {
        request_id: RequestId,
        guess: u8,
        amount: u64,
    },
    ClaimBet,
    RefundExpiredBet,
}

impl Instruction {
    pub fn name(&self) -> &'static str {
        match self {
            Instruction::Initialize { .. } => "initialize",
            Instruction::DepositSol { .. } => "deposit_sol",
            Instruction::WithdrawSol { .. } => "withdraw_sol",
            Instruction::UpdateFee { .. } => "update_fee",
            Instruction::UpdateMaxBet { .. } => "update_max_bet",
            Instruction::TransferAuthority { .. } => "transfer_authority",
            Instruction::PlaceBet { .. } => "place_bet",
            Instruction::ClaimBet => "claim_bet",
            Instruction::RefundExpiredBet => "refund_expired_bet",
        }
    }
}

pub struct CoinFlipEngine {
    ledger: Arc<Ledger>,
    randomness: Arc<dyn RandomnessAdapter>,
    bet_expiry_secs: i64,
    events: broadcast::Sender<EngineEvent>,
}

impl CoinFlipEngine {
    /// Engine over `ledger` using the ledger-resident randomness adapter
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self::with_adapter(ledger, Arc::new(LedgerRandomness))
    }

    pub fn with_adapter(ledger: Arc<Ledger>, randomness: Arc<dyn RandomnessAdapter>) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        Self {
            ledger,
            randomness,
            bet_expiry_secs: DEFAULT_BET_EXPIRY_SECS,
            events,
        }
    }

    pub fn from_config(ledger: Arc<Ledger>, config: &CoinFlipConfig) -> Self {
        let (events, _) = broadcast::channel(config.monitoring.event_channel_capacity);
        Self {
            ledger,
            randomness: Arc::new(LedgerRandomness),
            bet_expiry_secs: config.engine.bet_expiry_secs,
            events,
        }
    }

    pub fn with_bet_expiry(mut self, secs: i64) -> Self {
        self.bet_expiry_secs = secs;
        self
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn bet_expiry_secs(&self) -> i64 {
        self.bet_expiry_secs
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Run one instruction atomically on behalf of `caller`
    pub fn execute(&self, caller: &Address, instruction: Instruction) -> EngineResult<EngineEvent> {
        let action = instruction.name();

        let result = self.ledger.transact_then(
            |tx| self.apply(tx, caller, instruction),
            |event| {
                log_committed(caller, event);
                // Sending only fails when nobody is subscribed
                let _ = self.events.send(event.clone());
            },
        );
        if let Err(e) = &result {
            warn!(action, caller = %caller, error = %e, "action rejected");
        }
        result
    }

    fn apply(
        &self,
        tx: &mut LedgerTx<'_>,
        caller: &Address,
        instruction: Instruction,
    ) -> EngineResult<EngineEvent> {
        let randomness = self.randomness.as_ref();

        let event = match instruction {
            Instruction::Initialize { fee_bps, max_bet } => {
                let config = vault_manager::initialize(tx, caller, fee_bps, max_bet)?;
                EngineEvent::Initialized {
                    authority: config.authority,
                    fee_bps: config.fee_bps,
                    max_bet: config.max_bet,
                }
            }
            Instruction::DepositSol { amount } => {
                let snapshot = vault_manager::deposit_sol(tx, caller, amount)?;
                EngineEvent::Deposited {
                    amount,
                    vault_balance: snapshot.balance,
                }
            }
            Instruction::WithdrawSol { amount } => {
                let snapshot = vault_manager::withdraw_sol(tx, caller, amount)?;
                EngineEvent::Withdrawn {
                    amount,
                    vault_balance: snapshot.balance,
                }
            }
            Instruction::UpdateFee { fee_bps } => EngineEvent::FeeUpdated {
                previous: vault_manager::update_fee(tx, caller, fee_bps)?,
                fee_bps,
            },
            Instruction::UpdateMaxBet { max_bet } => EngineEvent::MaxBetUpdated {
                previous: vault_manager::update_max_bet(tx, caller, max_bet)?,
                max_bet,
            },
            Instruction::TransferAuthority { new_authority } => {
                let config = vault_manager::transfer_authority(tx, caller, &new_authority)?;
                EngineEvent::AuthorityTransferred {
                    previous: *caller,
                    authority: config.authority,
                }
            }
            Instruction::PlaceBet {
                request_id,
                guess,
                amount,
            } => EngineEvent::BetPlaced(bet::place_bet(
                tx, randomness, caller, request_id, guess, amount,
            )?),
            Instruction::ClaimBet => EngineEvent::BetSettled {
                bettor: *caller,
                result: bet::claim_bet(tx, randomness, caller)?,
            },
            Instruction::RefundExpiredBet => EngineEvent::BetRefunded(bet::refund_expired_bet(
                tx,
                randomness,
                caller,
                self.bet_expiry_secs,
            )?),
        };

        Ok(event)
    }

    pub fn global_config(&self) -> EngineResult<Option<GlobalConfig>> {
        self.ledger.load(&GlobalConfig::address())
    }

    pub fn vault_state(&self) -> EngineResult<Option<VaultState>> {
        self.ledger.load(&VaultState::address())
    }

    pub fn vault_snapshot(&self) -> EngineResult<VaultSnapshot> {
        self.ledger.view(vault_manager::snapshot)
    }

    pub fn vault_balance(&self) -> EngineResult<u64> {
        self.ledger.balance(&VaultState::address())
    }

    /// Vault funds not reserved for pending payouts
    pub fn free_liquidity(&self) -> EngineResult<u64> {
        Ok(self.vault_snapshot()?.free_liquidity())
    }

    pub fn balance_of(&self, address: &Address) -> EngineResult<u64> {
        self.ledger.balance(address)
    }

    pub fn bet_record(&self, user: &Address) -> EngineResult<Option<UserBetRecord>> {
        self.ledger.load(&UserBetRecord::address(user))
    }

    pub fn is_pending(&self, user: &Address) -> EngineResult<bool> {
        Ok(self
            .bet_record(user)?
            .map(|record| record.status() == BetStatus::Pending)
            .unwrap_or(false))
    }

    pub fn last_outcome(&self, user: &Address) -> EngineResult<Option<SettledBet>> {
        Ok(self.bet_record(user)?.and_then(|record| record.last_outcome))
    }

    /// Check the vault balance against its counters
    pub fn check_conservation(&self) -> EngineResult<VaultSnapshot> {
        self.ledger.view(vault_manager::check_conservation)
    }
}

fn log_committed(caller: &Address, event: &EngineEvent) {
    match event {
        EngineEvent::BetPlaced(receipt) => debug!(
            bettor = %caller,
            request_id = %receipt.request_id,
            guess = %receipt.guess,
            amount = receipt.amount,
            "bet placed"
        ),
        EngineEvent::BetSettled { result, .. } => info!(
            bettor = %caller,
            request_id = %result.request_id,
            outcome = %result.outcome,
            won = result.won,
            payout = result.payout,
            "bet settled"
        ),
        other => info!(caller = %caller, event = other.name(), "action committed"),
    }
}
