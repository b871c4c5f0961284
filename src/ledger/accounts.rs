//! Engine-owned ledger records

use crate::errors::CoinFlipError;
use crate::ledger::{derive, seeds, Address, LedgerRecord, RequestId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol configuration singleton
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    pub authority: Address,
    /// Fee deducted from winning payouts, in basis points
    pub fee_bps: u64,
    pub max_bet: u64,
    pub vault: Address,
}

impl GlobalConfig {
    pub fn address() -> Address {
        derive(seeds::GLOBAL_STATE_SEED, &[])
    }
}

impl LedgerRecord for GlobalConfig {
    const KIND: &'static str = "global";
}

/// Accounting counters of the escrow pool.
///
/// The pool balance itself sits in the balance table under
/// [`VaultState::address`]; these counters explain how it got there.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultState {
    pub total_deposited: u64,
    pub total_withdrawn: u64,
    /// Every wager ever escrowed
    pub total_escrowed: u64,
    /// Gross payouts to winners (their own stake included)
    pub total_paid_out: u64,
    /// Payouts minus the winners' own stakes
    pub total_net_paid_to_winners: u64,
    pub total_forfeited: u64,
    pub total_refunded: u64,
    /// Randomness request fees the vault paid to the oracle
    pub total_oracle_fees: u64,
    /// Stakes of bets that are still pending
    pub pending_escrow: u64,
    /// What the vault owes if every pending bet wins
    pub outstanding_liabilities: u64,
    pub bets_placed: u64,
    pub bets_settled: u64,
}

impl VaultState {
    pub fn address() -> Address {
        derive(seeds::VAULT_SEED, &[])
    }

    /// Balance the counters say the vault must hold
    pub fn expected_balance(&self) -> Option<u64> {
        self.total_deposited
            .checked_add(self.total_forfeited)?
            .checked_add(self.pending_escrow)?
            .checked_sub(self.total_withdrawn)?
            .checked_sub(self.total_net_paid_to_winners)?
            .checked_sub(self.total_oracle_fees)
    }
}

impl LedgerRecord for VaultState {
    const KIND: &'static str = "vault";
}

/// Side of the coin; the wire value is 0 or 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoinSide {
    Heads,
    Tails,
}

impl CoinSide {
    /// Side selected by a random value: even is heads, odd is tails
    pub fn from_value(value: u64) -> Self {
        if value % 2 == 0 {
            CoinSide::Heads
        } else {
            CoinSide::Tails
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            CoinSide::Heads => 0,
            CoinSide::Tails => 1,
        }
    }
}

impl TryFrom<u8> for CoinSide {
    type Error = CoinFlipError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CoinSide::Heads),
            1 => Ok(CoinSide::Tails),
            other => Err(CoinFlipError::InvalidGuess(other)),
        }
    }
}

impl fmt::Display for CoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoinSide::Heads => write!(f, "heads"),
            CoinSide::Tails => write!(f, "tails"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetStatus {
    Idle,
    Pending,
}

/// Wager escrowed and waiting for randomness
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingBet {
    pub amount: u64,
    pub guess: CoinSide,
    pub request_id: RequestId,
    /// Payout reserved at placement, paid if the guess wins
    pub payout: u64,
    pub placed_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetSlot {
    Idle,
    Pending(PendingBet),
}

/// Result of a claimed bet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettledBet {
    pub request_id: RequestId,
    pub guess: CoinSide,
    pub outcome: CoinSide,
    pub won: bool,
    pub amount: u64,
    /// Zero on a loss
    pub payout: u64,
    pub randomness_value: u64,
    pub settled_at: i64,
}

/// Per-user bet slot, overwritten across bets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBetRecord {
    pub owner: Address,
    pub slot: BetSlot,
    pub last_outcome: Option<SettledBet>,
    pub bets_placed: u64,
}

impl UserBetRecord {
    pub fn address(user: &Address) -> Address {
        derive(seeds::USER_INFO_SEED, &[user.as_bytes()])
    }

    pub fn new(owner: Address) -> Self {
        Self {
            owner,
            slot: BetSlot::Idle,
            last_outcome: None,
            bets_placed: 0,
        }
    }

    pub fn status(&self) -> BetStatus {
        match self.slot {
            BetSlot::Idle => BetStatus::Idle,
            BetSlot::Pending(_) => BetStatus::Pending,
        }
    }

    pub fn pending(&self) -> Option<&PendingBet> {
        match &self.slot {
            BetSlot::Pending(bet) => Some(bet),
            BetSlot::Idle => None,
        }
    }
}

impl LedgerRecord for UserBetRecord {
    const KIND: &'static str = "user-bet";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coin_side_from_value() {
        assert_eq!(CoinSide::from_value(8), CoinSide::Heads);
        assert_eq!(CoinSide::from_value(7), CoinSide::Tails);
        assert_eq!(CoinSide::from_value(u64::MAX), CoinSide::Tails);
    }

    #[test]
    fn test_guess_must_be_binary() {
        assert_eq!(CoinSide::try_from(0), Ok(CoinSide::Heads));
        assert_eq!(CoinSide::try_from(1), Ok(CoinSide::Tails));
        assert_eq!(CoinSide::try_from(2), Err(CoinFlipError::InvalidGuess(2)));
    }

    #[test]
    fn test_user_records_are_per_user() {
        let alice = Address::from_name("alice");
        let bob = Address::from_name("bob");
        assert_ne!(UserBetRecord::address(&alice), UserBetRecord::address(&bob));
        assert_ne!(GlobalConfig::address(), VaultState::address());
    }

    #[test]
    fn test_expected_balance() {
        let vault = VaultState {
            total_deposited: 100,
            total_withdrawn: 10,
            total_net_paid_to_winners: 5,
            total_forfeited: 7,
            pending_escrow: 3,
            total_oracle_fees: 4,
            ..Default::default()
        };
        assert_eq!(vault.expected_balance(), Some(91));

        let overdrawn = VaultState {
            total_deposited: 1,
            total_oracle_fees: 2,
            ..Default::default()
        };
        assert_eq!(overdrawn.expected_balance(), None);
    }
}
