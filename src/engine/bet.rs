//! Bet lifecycle: placement, settlement and refund
//!
//! `Idle -> Pending` on placement, `Pending -> Idle` on claim or refund. The
//! won/lost outcome is computed and paid in the same action that resets the
//! slot, so a bet can be settled at most once.

use crate::engine::vault_manager::{load_config, load_vault, save_vault, snapshot};
use crate::errors::{CoinFlipError, EngineResult};
use crate::ledger::{
    Address, BetSlot, CoinSide, LedgerTx, PendingBet, RequestId, SettledBet, UserBetRecord,
};
use crate::randomness::{RandomnessAdapter, RandomnessRequest, RequestParams};
use crate::BPS_DENOMINATOR;
use serde::{Deserialize, Serialize};

/// Returned by a successful placement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetReceipt {
    pub bettor: Address,
    pub request_id: RequestId,
    pub guess: CoinSide,
    pub amount: u64,
    /// Paid out if the guess wins
    pub potential_payout: u64,
    /// Request fee the vault paid to the oracle
    pub oracle_fee: u64,
}

/// Returned by a successful refund
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub bettor: Address,
    pub request_id: RequestId,
    pub amount: u64,
}

/// `amount * 2 * (1 - fee_bps / 10_000)`, rounded down
pub fn compute_payout(amount: u64, fee_bps: u64) -> EngineResult<u64> {
    let fee_bps = fee_bps.min(BPS_DENOMINATOR);
    let gross = (amount as u128) * 2 * ((BPS_DENOMINATOR - fee_bps) as u128);
    u64::try_from(gross / BPS_DENOMINATOR as u128)
        .map_err(|_| CoinFlipError::ArithmeticOverflow.into())
}

fn checked_add(counter: u64, amount: u64) -> EngineResult<u64> {
    counter
        .checked_add(amount)
        .ok_or_else(|| CoinFlipError::ArithmeticOverflow.into())
}

fn load_record(tx: &LedgerTx<'_>, user: &Address) -> EngineResult<Option<UserBetRecord>> {
    tx.load(&UserBetRecord::address(user))
}

/// Escrow a wager and request randomness for it
pub fn place_bet(
    tx: &mut LedgerTx<'_>,
    randomness: &dyn RandomnessAdapter,
    caller: &Address,
    request_id: RequestId,
    guess: u8,
    amount: u64,
) -> EngineResult<BetReceipt> {
    let guess = CoinSide::try_from(guess)?;
    if amount == 0 {
        return Err(CoinFlipError::InvalidAmount.into());
    }

    let config = load_config(tx)?;
    if amount > config.max_bet {
        return Err(CoinFlipError::BetTooLarge {
            amount,
            max_bet: config.max_bet,
        }
        .into());
    }

    let mut record = load_record(tx, caller)?.unwrap_or_else(|| UserBetRecord::new(*caller));
    if record.pending().is_some() {
        return Err(CoinFlipError::BetAlreadyPending.into());
    }

    if tx.is_consumed(&request_id)?
        || tx.exists::<RandomnessRequest>(&RandomnessRequest::address(&request_id))?
    {
        return Err(CoinFlipError::DuplicateRequest(request_id.to_hex()).into());
    }

    // Free liquidity must also cover the request fee the vault pays
    let oracle_fee = randomness.request_fee(tx)?;
    let available = snapshot(tx)?.free_liquidity().saturating_sub(oracle_fee);
    if amount > available {
        return Err(CoinFlipError::InsufficientVaultCoverage { amount, available }.into());
    }

    let funds = tx.balance(caller)?;
    if funds < amount {
        return Err(CoinFlipError::InsufficientFunds {
            need: amount,
            available: funds,
        }
        .into());
    }

    let payout = compute_payout(amount, config.fee_bps)?;

    tx.transfer(caller, &config.vault, amount)?;

    let mut vault = load_vault(tx)?;
    vault.total_escrowed = checked_add(vault.total_escrowed, amount)?;
    vault.pending_escrow = checked_add(vault.pending_escrow, amount)?;
    vault.outstanding_liabilities = checked_add(vault.outstanding_liabilities, payout)?;
    vault.bets_placed = checked_add(vault.bets_placed, 1)?;

    record.slot = BetSlot::Pending(PendingBet {
        amount,
        guess,
        request_id,
        payout,
        placed_at: tx.now(),
    });
    record.bets_placed = checked_add(record.bets_placed, 1)?;
    tx.save(&UserBetRecord::address(caller), &record)?;

    let ack = randomness.request(
        tx,
        RequestParams {
            request_id,
            requester: *caller,
            payer: config.vault,
            escrowed_amount: amount,
            guess,
        },
    )?;
    vault.total_oracle_fees = checked_add(vault.total_oracle_fees, ack.fee_paid)?;
    save_vault(tx, &vault)?;

    Ok(BetReceipt {
        bettor: *caller,
        request_id,
        guess,
        amount,
        potential_payout: payout,
        oracle_fee: ack.fee_paid,
    })
}

/// Settle the caller's pending bet once its randomness is fulfilled
pub fn claim_bet(
    tx: &mut LedgerTx<'_>,
    randomness: &dyn RandomnessAdapter,
    caller: &Address,
) -> EngineResult<SettledBet> {
    let mut record = load_record(tx, caller)?.ok_or(CoinFlipError::NoPendingBet)?;
    let bet = record.pending().cloned().ok_or(CoinFlipError::NoPendingBet)?;
    if record.owner != *caller {
        return Err(CoinFlipError::Unauthorized.into());
    }

    let value = randomness
        .read(tx, &bet.request_id)?
        .value()
        .ok_or(CoinFlipError::RandomnessNotFulfilled)?;

    let outcome = CoinSide::from_value(value);
    let won = outcome == bet.guess;

    let config = load_config(tx)?;
    let mut vault = load_vault(tx)?;
    vault.pending_escrow = vault
        .pending_escrow
        .checked_sub(bet.amount)
        .ok_or(CoinFlipError::ArithmeticOverflow)?;
    vault.outstanding_liabilities = vault.outstanding_liabilities.saturating_sub(bet.payout);
    vault.bets_settled = checked_add(vault.bets_settled, 1)?;

    let payout = if won {
        tx.transfer(&config.vault, caller, bet.payout)?;
        let net = bet
            .payout
            .checked_sub(bet.amount)
            .ok_or(CoinFlipError::ArithmeticOverflow)?;
        vault.total_paid_out = checked_add(vault.total_paid_out, bet.payout)?;
        vault.total_net_paid_to_winners = checked_add(vault.total_net_paid_to_winners, net)?;
        bet.payout
    } else {
        vault.total_forfeited = checked_add(vault.total_forfeited, bet.amount)?;
        0
    };
    save_vault(tx, &vault)?;

    let settled = SettledBet {
        request_id: bet.request_id,
        guess: bet.guess,
        outcome,
        won,
        amount: bet.amount,
        payout,
        randomness_value: value,
        settled_at: tx.now(),
    };
    record.slot = BetSlot::Idle;
    record.last_outcome = Some(settled.clone());
    tx.save(&UserBetRecord::address(caller), &record)?;

    randomness.close(tx, &bet.request_id)?;

    Ok(settled)
}

/// Return the escrow of a bet whose randomness never arrived
pub fn refund_expired_bet(
    tx: &mut LedgerTx<'_>,
    randomness: &dyn RandomnessAdapter,
    caller: &Address,
    expiry_secs: i64,
) -> EngineResult<RefundReceipt> {
    let mut record = load_record(tx, caller)?.ok_or(CoinFlipError::NoPendingBet)?;
    let bet = record.pending().cloned().ok_or(CoinFlipError::NoPendingBet)?;
    if record.owner != *caller {
        return Err(CoinFlipError::Unauthorized.into());
    }

    let age = tx.now().saturating_sub(bet.placed_at);
    if age < expiry_secs {
        return Err(CoinFlipError::BetNotExpired {
            remaining_secs: expiry_secs - age,
        }
        .into());
    }
    if randomness.read(tx, &bet.request_id)?.is_fulfilled() {
        return Err(CoinFlipError::RandomnessAlreadyFulfilled.into());
    }

    let config = load_config(tx)?;
    tx.transfer(&config.vault, caller, bet.amount)?;

    let mut vault = load_vault(tx)?;
    vault.pending_escrow = vault
        .pending_escrow
        .checked_sub(bet.amount)
        .ok_or(CoinFlipError::ArithmeticOverflow)?;
    vault.outstanding_liabilities = vault.outstanding_liabilities.saturating_sub(bet.payout);
    vault.total_refunded = checked_add(vault.total_refunded, bet.amount)?;
    save_vault(tx, &vault)?;

    record.slot = BetSlot::Idle;
    tx.save(&UserBetRecord::address(caller), &record)?;

    randomness.close(tx, &bet.request_id)?;

    Ok(RefundReceipt {
        bettor: *caller,
        request_id: bet.request_id,
        amount: bet.amount,
    })
}
