//! End-to-end bet lifecycle through the engine's instruction surface

use coinflip::{
    engine::{compute_payout, CoinFlipEngine, EngineEvent, Instruction},
    ledger::{BetStatus, CoinSide, GlobalConfig, Ledger, ManualClock, SettledBet},
    randomness::VrfOracle,
    Address, CoinFlipError, EngineError, EngineResult, RequestId,
};
use std::sync::Arc;

const FEE_BPS: u64 = 400;
const MAX_BET: u64 = 2_000_000_000;
const VAULT: u64 = 4_000_000_000;
const ORACLE_FEE: u64 = 5_000;

struct Harness {
    engine: CoinFlipEngine,
    oracle: VrfOracle,
    clock: Arc<ManualClock>,
    admin: Address,
    treasury: Address,
}

impl Harness {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(1_720_000_000));
        let ledger = Arc::new(Ledger::in_memory().with_clock(clock.clone()));
        let oracle = VrfOracle::new_random();
        let treasury = Address::from_name("oracle-treasury");
        oracle.bootstrap(&ledger, treasury, ORACLE_FEE).unwrap();

        let admin = Address::from_name("admin");
        ledger.airdrop(&admin, VAULT).unwrap();

        let engine = CoinFlipEngine::new(ledger).with_bet_expiry(600);
        engine
            .execute(&admin, Instruction::Initialize { fee_bps: FEE_BPS, max_bet: MAX_BET })
            .unwrap();
        engine
            .execute(&admin, Instruction::DepositSol { amount: VAULT })
            .unwrap();

        Self {
            engine,
            oracle,
            clock,
            admin,
            treasury,
        }
    }

    fn bettor(&self, name: &str, funds: u64) -> Address {
        let user = Address::from_name(name);
        self.engine.ledger().airdrop(&user, funds).unwrap();
        user
    }

    fn place(&self, user: &Address, nonce: u32, guess: u8, amount: u64) -> EngineResult<RequestId> {
        let request_id = RequestId::derive(nonce, user);
        self.engine.execute(
            user,
            Instruction::PlaceBet {
                request_id,
                guess,
                amount,
            },
        )?;
        Ok(request_id)
    }

    fn claim(&self, user: &Address) -> EngineResult<SettledBet> {
        match self.engine.execute(user, Instruction::ClaimBet)? {
            EngineEvent::BetSettled { result, .. } => Ok(result),
            other => panic!("unexpected event {:?}", other),
        }
    }

    fn fulfill(&self, request_id: &RequestId, value: u64) {
        self.oracle
            .fulfill_with_value(self.engine.ledger(), request_id, value)
            .unwrap();
    }

    fn balances(&self, users: &[Address]) -> Vec<u64> {
        let mut all = vec![self.engine.vault_balance().unwrap()];
        all.extend(users.iter().map(|u| self.engine.balance_of(u).unwrap()));
        all
    }
}

fn rejection(result: EngineResult<impl std::fmt::Debug>) -> CoinFlipError {
    match result {
        Err(EngineError::CoinFlip(e)) => e,
        other => panic!("expected a coin flip rejection, got {:?}", other),
    }
}

#[test]
fn test_winning_bet_scenario() {
    let h = Harness::new();
    let user = h.bettor("alice", 100_000_000);

    let request_id = h.place(&user, 1, 0, 20_000_000).unwrap();
    assert_eq!(h.engine.balance_of(&user).unwrap(), 100_000_000 - 20_000_000);
    assert!(h.engine.is_pending(&user).unwrap());

    h.fulfill(&request_id, 8);
    let settled = h.claim(&user).unwrap();

    let expected_payout = 20_000_000 * 2 * (10_000 - FEE_BPS) / 10_000;
    assert_eq!(expected_payout, 38_400_000);
    assert!(settled.won);
    assert_eq!(settled.outcome, CoinSide::Heads);
    assert_eq!(settled.payout, expected_payout);
    assert_eq!(
        h.engine.vault_balance().unwrap(),
        VAULT + 20_000_000 - ORACLE_FEE - expected_payout
    );
    assert_eq!(
        h.engine.balance_of(&user).unwrap(),
        100_000_000 - 20_000_000 + expected_payout
    );

    let record = h.engine.bet_record(&user).unwrap().unwrap();
    assert_eq!(record.status(), BetStatus::Idle);
    assert_eq!(record.last_outcome, Some(settled));
    h.engine.check_conservation().unwrap();
}

#[test]
fn test_losing_bet_scenario() {
    let h = Harness::new();
    let user = h.bettor("bob", 100_000_000);

    let request_id = h.place(&user, 1, 0, 20_000_000).unwrap();
    h.fulfill(&request_id, 7);
    let settled = h.claim(&user).unwrap();

    assert!(!settled.won);
    assert_eq!(settled.outcome, CoinSide::Tails);
    assert_eq!(settled.payout, 0);
    assert_eq!(h.engine.vault_balance().unwrap(), VAULT + 20_000_000 - ORACLE_FEE);
    assert_eq!(h.engine.balance_of(&user).unwrap(), 100_000_000 - 20_000_000);
    assert!(!h.engine.is_pending(&user).unwrap());

    let vault = h.engine.vault_state().unwrap().unwrap();
    assert_eq!(vault.total_forfeited, 20_000_000);
    assert_eq!(vault.outstanding_liabilities, 0);
    h.engine.check_conservation().unwrap();
}

#[test]
fn test_place_bet_debits_exactly_the_wager() {
    let h = Harness::new();

    for (i, amount) in [1u64, 999, 20_000_000, MAX_BET].into_iter().enumerate() {
        let user = h.bettor(&format!("bettor-{}", i), MAX_BET);
        let balance_before = h.engine.balance_of(&user).unwrap();
        let vault_before = h.engine.vault_balance().unwrap();
        let treasury_before = h.engine.balance_of(&h.treasury).unwrap();

        let receipt = match h
            .engine
            .execute(
                &user,
                Instruction::PlaceBet {
                    request_id: RequestId::derive(42, &user),
                    guess: (i % 2) as u8,
                    amount,
                },
            )
            .unwrap()
        {
            EngineEvent::BetPlaced(receipt) => receipt,
            other => panic!("unexpected event {:?}", other),
        };

        // The oracle fee comes out of the vault, never the bettor
        assert_eq!(h.engine.balance_of(&user).unwrap(), balance_before - amount);
        assert_eq!(receipt.oracle_fee, ORACLE_FEE);
        assert_eq!(h.engine.vault_balance().unwrap(), vault_before + amount - ORACLE_FEE);
        assert_eq!(h.engine.balance_of(&h.treasury).unwrap(), treasury_before + ORACLE_FEE);

        let record = h.engine.bet_record(&user).unwrap().unwrap();
        let pending = record.pending().unwrap();
        assert_eq!(pending.amount, amount);
        assert_eq!(pending.payout, compute_payout(amount, FEE_BPS).unwrap());
    }

    // A bettor holding exactly the wager can place it
    let exact = h.bettor("exact", 20_000_000);
    h.place(&exact, 1, 0, 20_000_000).unwrap();
    assert_eq!(h.engine.balance_of(&exact).unwrap(), 0);

    let vault = h.engine.vault_state().unwrap().unwrap();
    assert_eq!(vault.total_oracle_fees, 5 * ORACLE_FEE);
    h.engine.check_conservation().unwrap();
}

#[test]
fn test_rejected_bets_change_no_balances() {
    let h = Harness::new();
    let user = h.bettor("carol", 3 * MAX_BET);
    let watched = [user, h.treasury];
    let before = h.balances(&watched);

    assert_eq!(
        rejection(h.place(&user, 1, 0, MAX_BET + 1)),
        CoinFlipError::BetTooLarge {
            amount: MAX_BET + 1,
            max_bet: MAX_BET
        }
    );
    assert_eq!(rejection(h.place(&user, 1, 0, 0)), CoinFlipError::InvalidAmount);
    assert_eq!(rejection(h.place(&user, 1, 5, 10)), CoinFlipError::InvalidGuess(5));
    assert_eq!(h.balances(&watched), before);
    assert!(h.engine.bet_record(&user).unwrap().is_none());

    h.place(&user, 1, 1, 10).unwrap();
    let after_first = h.balances(&watched);
    assert_eq!(rejection(h.place(&user, 2, 1, 10)), CoinFlipError::BetAlreadyPending);
    assert_eq!(h.balances(&watched), after_first);
}

#[test]
fn test_vault_coverage_limits_bets() {
    let h = Harness::new();
    let whale = h.bettor("whale", 4 * MAX_BET);
    let minnow = h.bettor("minnow", 99);

    // Each max bet reserves its full payout, shrinking what is left to cover
    h.place(&whale, 1, 0, MAX_BET).unwrap();
    let free = h.engine.free_liquidity().unwrap();
    assert_eq!(
        free,
        VAULT + MAX_BET - ORACLE_FEE - compute_payout(MAX_BET, FEE_BPS).unwrap()
    );

    let other = h.bettor("other-whale", 4 * MAX_BET);
    h.place(&other, 1, 0, MAX_BET).unwrap();
    // The vault also has to be able to pay the next request fee
    let coverable = h.engine.free_liquidity().unwrap() - ORACLE_FEE;

    let third = h.bettor("third-whale", 4 * MAX_BET);
    let before = h.balances(&[third, h.treasury]);
    assert_eq!(
        rejection(h.place(&third, 1, 0, coverable + 1)),
        CoinFlipError::InsufficientVaultCoverage {
            amount: coverable + 1,
            available: coverable
        }
    );
    assert_eq!(h.balances(&[third, h.treasury]), before);

    assert_eq!(
        rejection(h.place(&minnow, 1, 0, 100)),
        CoinFlipError::InsufficientFunds {
            need: 100,
            available: 99
        }
    );
    h.engine.check_conservation().unwrap();
}

#[test]
fn test_claim_is_exactly_once() {
    let h = Harness::new();
    let user = h.bettor("dave", 1_000_000);

    assert_eq!(rejection(h.claim(&user)), CoinFlipError::NoPendingBet);

    let request_id = h.place(&user, 1, 1, 1_000).unwrap();
    assert_eq!(rejection(h.claim(&user)), CoinFlipError::RandomnessNotFulfilled);
    assert!(h.engine.is_pending(&user).unwrap());

    h.fulfill(&request_id, 1);
    h.claim(&user).unwrap();
    let balance = h.engine.balance_of(&user).unwrap();

    assert_eq!(rejection(h.claim(&user)), CoinFlipError::NoPendingBet);
    assert_eq!(h.engine.balance_of(&user).unwrap(), balance);
    h.engine.check_conservation().unwrap();
}

#[test]
fn test_only_the_bettor_settles_their_slot() {
    let h = Harness::new();
    let alice = h.bettor("alice", 1_000_000);
    let mallory = h.bettor("mallory", 1_000_000);

    let request_id = h.place(&alice, 1, 0, 1_000).unwrap();
    h.fulfill(&request_id, 0);

    // Claims are keyed by the caller, so mallory only reaches an empty slot
    assert_eq!(rejection(h.claim(&mallory)), CoinFlipError::NoPendingBet);
    assert!(h.engine.is_pending(&alice).unwrap());
    assert!(h.claim(&alice).unwrap().won);
}

#[test]
fn test_request_ids_are_single_use() {
    let h = Harness::new();
    let alice = h.bettor("alice", 1_000_000);
    let bob = h.bettor("bob", 1_000_000);

    let request_id = h.place(&alice, 77, 0, 1_000).unwrap();

    // Bob replays alice's id
    let err = h.engine.execute(
        &bob,
        Instruction::PlaceBet {
            request_id,
            guess: 0,
            amount: 1_000,
        },
    );
    assert!(matches!(rejection(err), CoinFlipError::DuplicateRequest(_)));

    h.fulfill(&request_id, 4);
    h.claim(&alice).unwrap();
    assert!(matches!(
        rejection(h.place(&alice, 77, 0, 1_000)),
        CoinFlipError::DuplicateRequest(_)
    ));
}

#[test]
fn test_fee_administration() {
    let h = Harness::new();
    let stranger = h.bettor("stranger", 10);

    let err = h.engine.execute(&stranger, Instruction::UpdateFee { fee_bps: 0 });
    assert_eq!(rejection(err), CoinFlipError::Unauthorized);
    assert_eq!(h.engine.global_config().unwrap().unwrap().fee_bps, FEE_BPS);

    let err = h
        .engine
        .execute(&h.admin, Instruction::UpdateFee { fee_bps: coinflip::FEE_BPS_MAX + 1 });
    assert!(matches!(rejection(err), CoinFlipError::FeeOutOfRange { .. }));
    assert_eq!(h.engine.global_config().unwrap().unwrap().fee_bps, FEE_BPS);

    h.engine
        .execute(&h.admin, Instruction::UpdateFee { fee_bps: coinflip::FEE_BPS_MAX })
        .unwrap();
    assert_eq!(
        h.engine.global_config().unwrap().unwrap().fee_bps,
        coinflip::FEE_BPS_MAX
    );
}

#[test]
fn test_authority_handover() {
    let h = Harness::new();
    let successor = h.bettor("successor", 0);

    h.engine
        .execute(
            &h.admin,
            Instruction::TransferAuthority {
                new_authority: successor,
            },
        )
        .unwrap();

    let config: GlobalConfig = h.engine.global_config().unwrap().unwrap();
    assert_eq!(config.authority, successor);
    assert_eq!(
        rejection(h.engine.execute(&h.admin, Instruction::WithdrawSol { amount: 1 })),
        CoinFlipError::Unauthorized
    );
    h.engine
        .execute(&successor, Instruction::WithdrawSol { amount: 1_000 })
        .unwrap();
    assert_eq!(h.engine.balance_of(&successor).unwrap(), 1_000);
    h.engine
        .execute(&successor, Instruction::UpdateMaxBet { max_bet: 10 })
        .unwrap();
    assert_eq!(h.engine.global_config().unwrap().unwrap().max_bet, 10);
}

#[test]
fn test_withdraw_cannot_touch_reserved_payouts() {
    let h = Harness::new();
    let user = h.bettor("erin", MAX_BET);
    let request_id = h.place(&user, 1, 0, MAX_BET).unwrap();

    let free = h.engine.free_liquidity().unwrap();
    assert_eq!(
        rejection(h.engine.execute(&h.admin, Instruction::WithdrawSol { amount: free + 1 })),
        CoinFlipError::InsufficientVaultFunds {
            requested: free + 1,
            available: free
        }
    );
    h.engine
        .execute(&h.admin, Instruction::WithdrawSol { amount: free })
        .unwrap();

    // The vault can still pay the pending winner in full
    h.fulfill(&request_id, 2);
    let settled = h.claim(&user).unwrap();
    assert_eq!(settled.payout, compute_payout(MAX_BET, FEE_BPS).unwrap());
    assert_eq!(h.engine.vault_balance().unwrap(), 0);
    h.engine.check_conservation().unwrap();
}

#[test]
fn test_unfulfilled_bet_refund_after_expiry() {
    let h = Harness::new();
    let user = h.bettor("frank", 1_000_000);
    h.place(&user, 1, 0, 50_000).unwrap();

    h.clock.advance(599);
    assert_eq!(
        rejection(h.engine.execute(&user, Instruction::RefundExpiredBet)),
        CoinFlipError::BetNotExpired { remaining_secs: 1 }
    );

    h.clock.advance(1);
    match h.engine.execute(&user, Instruction::RefundExpiredBet).unwrap() {
        EngineEvent::BetRefunded(receipt) => assert_eq!(receipt.amount, 50_000),
        other => panic!("unexpected event {:?}", other),
    }

    assert_eq!(h.engine.balance_of(&user).unwrap(), 1_000_000);
    assert!(!h.engine.is_pending(&user).unwrap());
    let vault = h.engine.vault_state().unwrap().unwrap();
    assert_eq!(vault.total_refunded, 50_000);
    assert_eq!(vault.outstanding_liabilities, 0);
    h.engine.check_conservation().unwrap();

    // The slot is free again
    h.place(&user, 2, 0, 50_000).unwrap();
}

#[test]
fn test_conservation_over_mixed_sequence() {
    let h = Harness::new();
    let users: Vec<Address> = (0..6)
        .map(|i| h.bettor(&format!("mixed-{}", i), 500_000_000))
        .collect();

    for round in 0..5u32 {
        let mut pending = Vec::new();
        for (i, user) in users.iter().enumerate() {
            let amount = 1_000_000 * (i as u64 + 1) + round as u64;
            let request_id = h.place(user, round, (i % 2) as u8, amount).unwrap();
            pending.push((*user, request_id));
            h.engine.check_conservation().unwrap();
        }

        if round == 2 {
            h.engine
                .execute(&h.admin, Instruction::WithdrawSol { amount: 100_000_000 })
                .unwrap();
            h.engine
                .execute(&h.admin, Instruction::UpdateFee { fee_bps: 150 })
                .unwrap();
        }

        // Fulfill out of placement order
        for (user, request_id) in pending.iter().rev() {
            h.oracle.fulfill(h.engine.ledger(), request_id).unwrap();
            h.claim(user).unwrap();
            h.engine.check_conservation().unwrap();
        }
    }

    let vault = h.engine.vault_state().unwrap().unwrap();
    assert_eq!(vault.bets_placed, 30);
    assert_eq!(vault.bets_settled, 30);
    assert_eq!(vault.pending_escrow, 0);
    assert_eq!(vault.outstanding_liabilities, 0);
}
