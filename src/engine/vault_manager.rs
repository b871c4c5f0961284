//! Global configuration and the escrow vault
//!
//! Only the authority recorded in [`GlobalConfig`] may move vault funds or
//! change parameters. Withdrawals can never dip into what pending bets are
//! owed.

use crate::errors::{CoinFlipError, EngineResult, StorageError};
use crate::ledger::{Address, GlobalConfig, LedgerTx, VaultState};
use crate::FEE_BPS_MAX;
use serde::{Deserialize, Serialize};

/// Vault balance together with its accounting counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultSnapshot {
    pub balance: u64,
    pub state: VaultState,
}

impl VaultSnapshot {
    /// Funds not reserved for pending payouts
    pub fn free_liquidity(&self) -> u64 {
        self.balance.saturating_sub(self.state.outstanding_liabilities)
    }
}

pub(crate) fn load_config(tx: &LedgerTx<'_>) -> EngineResult<GlobalConfig> {
    tx.load(&GlobalConfig::address())?
        .ok_or_else(|| CoinFlipError::NotInitialized.into())
}

pub(crate) fn load_vault(tx: &LedgerTx<'_>) -> EngineResult<VaultState> {
    tx.load(&VaultState::address())?
        .ok_or_else(|| CoinFlipError::NotInitialized.into())
}

pub(crate) fn save_vault(tx: &mut LedgerTx<'_>, vault: &VaultState) -> EngineResult<()> {
    tx.save(&VaultState::address(), vault)
}

pub(crate) fn snapshot(tx: &LedgerTx<'_>) -> EngineResult<VaultSnapshot> {
    Ok(VaultSnapshot {
        balance: tx.balance(&VaultState::address())?,
        state: load_vault(tx)?,
    })
}

fn require_authority(config: &GlobalConfig, caller: &Address) -> EngineResult<()> {
    if config.authority != *caller {
        return Err(CoinFlipError::Unauthorized.into());
    }
    Ok(())
}

fn check_fee(fee_bps: u64) -> EngineResult<()> {
    if fee_bps > FEE_BPS_MAX {
        return Err(CoinFlipError::FeeOutOfRange {
            fee_bps,
            max_bps: FEE_BPS_MAX,
        }
        .into());
    }
    Ok(())
}

/// Create the config singleton and the vault; the caller becomes authority
pub fn initialize(
    tx: &mut LedgerTx<'_>,
    caller: &Address,
    fee_bps: u64,
    max_bet: u64,
) -> EngineResult<GlobalConfig> {
    if tx.exists::<GlobalConfig>(&GlobalConfig::address())? {
        return Err(CoinFlipError::AlreadyInitialized.into());
    }
    check_fee(fee_bps)?;
    if max_bet == 0 {
        return Err(CoinFlipError::InvalidAmount.into());
    }

    let config = GlobalConfig {
        authority: *caller,
        fee_bps,
        max_bet,
        vault: VaultState::address(),
    };
    tx.save(&GlobalConfig::address(), &config)?;
    save_vault(tx, &VaultState::default())?;

    Ok(config)
}

pub fn deposit_sol(
    tx: &mut LedgerTx<'_>,
    caller: &Address,
    amount: u64,
) -> EngineResult<VaultSnapshot> {
    let config = load_config(tx)?;
    require_authority(&config, caller)?;
    if amount == 0 {
        return Err(CoinFlipError::InvalidAmount.into());
    }

    tx.transfer(caller, &config.vault, amount)?;

    let mut vault = load_vault(tx)?;
    vault.total_deposited = vault
        .total_deposited
        .checked_add(amount)
        .ok_or(CoinFlipError::ArithmeticOverflow)?;
    save_vault(tx, &vault)?;

    snapshot(tx)
}

pub fn withdraw_sol(
    tx: &mut LedgerTx<'_>,
    caller: &Address,
    amount: u64,
) -> EngineResult<VaultSnapshot> {
    let config = load_config(tx)?;
    require_authority(&config, caller)?;
    if amount == 0 {
        return Err(CoinFlipError::InvalidAmount.into());
    }

    let available = snapshot(tx)?.free_liquidity();
    if amount > available {
        return Err(CoinFlipError::InsufficientVaultFunds {
            requested: amount,
            available,
        }
        .into());
    }

    tx.transfer(&config.vault, caller, amount)?;

    let mut vault = load_vault(tx)?;
    vault.total_withdrawn = vault
        .total_withdrawn
        .checked_add(amount)
        .ok_or(CoinFlipError::ArithmeticOverflow)?;
    save_vault(tx, &vault)?;

    snapshot(tx)
}

/// Returns the previous fee
pub fn update_fee(tx: &mut LedgerTx<'_>, caller: &Address, fee_bps: u64) -> EngineResult<u64> {
    let mut config = load_config(tx)?;
    require_authority(&config, caller)?;
    check_fee(fee_bps)?;

    let previous = config.fee_bps;
    config.fee_bps = fee_bps;
    tx.save(&GlobalConfig::address(), &config)?;
    Ok(previous)
}

/// Returns the previous max bet
pub fn update_max_bet(tx: &mut LedgerTx<'_>, caller: &Address, max_bet: u64) -> EngineResult<u64> {
    let mut config = load_config(tx)?;
    require_authority(&config, caller)?;
    if max_bet == 0 {
        return Err(CoinFlipError::InvalidAmount.into());
    }

    let previous = config.max_bet;
    config.max_bet = max_bet;
    tx.save(&GlobalConfig::address(), &config)?;
    Ok(previous)
}

pub fn transfer_authority(
    tx: &mut LedgerTx<'_>,
    caller: &Address,
    new_authority: &Address,
) -> EngineResult<GlobalConfig> {
    let mut config = load_config(tx)?;
    require_authority(&config, caller)?;

    config.authority = *new_authority;
    tx.save(&GlobalConfig::address(), &config)?;
    Ok(config)
}

/// Verify the vault balance against its counters and its liabilities
pub fn check_conservation(tx: &LedgerTx<'_>) -> EngineResult<VaultSnapshot> {
    let snapshot = snapshot(tx)?;
    let state = &snapshot.state;

    let expected = state.expected_balance().ok_or_else(|| StorageError::CorruptedData {
        key: VaultState::address().to_hex(),
        reason: "vault counters underflow".to_string(),
    })?;
    if expected != snapshot.balance {
        return Err(StorageError::CorruptedData {
            key: VaultState::address().to_hex(),
            reason: format!("balance {} but counters expect {}", snapshot.balance, expected),
        }
        .into());
    }
    if snapshot.balance < state.outstanding_liabilities
        || state.outstanding_liabilities < state.pending_escrow
    {
        return Err(StorageError::CorruptedData {
            key: VaultState::address().to_hex(),
            reason: format!(
                "balance {} cannot cover liabilities {} (pending escrow {})",
                snapshot.balance, state.outstanding_liabilities, state.pending_escrow
            ),
        }
        .into());
    }

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EngineError;
    use crate::ledger::Ledger;

    fn setup() -> (Ledger, Address) {
        let ledger = Ledger::in_memory();
        let admin = Address::from_name("admin");
        ledger.airdrop(&admin, 10_000).unwrap();
        ledger.transact(|tx| initialize(tx, &admin, 400, 1_000)).unwrap();
        (ledger, admin)
    }

    fn coin_flip_err(err: EngineError) -> CoinFlipError {
        match err {
            EngineError::CoinFlip(e) => e,
            other => panic!("expected coin flip error, got {other}"),
        }
    }

    #[test]
    fn test_initialize_once() {
        let (ledger, admin) = setup();
        let config: GlobalConfig = ledger.load(&GlobalConfig::address()).unwrap().unwrap();
        assert_eq!(config.authority, admin);
        assert_eq!(config.fee_bps, 400);

        let other = Address::from_name("other");
        let err = ledger.transact(|tx| initialize(tx, &other, 0, 1)).unwrap_err();
        assert_eq!(coin_flip_err(err), CoinFlipError::AlreadyInitialized);
    }

    #[test]
    fn test_initialize_validates_parameters() {
        let ledger = Ledger::in_memory();
        let admin = Address::from_name("admin");

        let err = ledger.transact(|tx| initialize(tx, &admin, FEE_BPS_MAX + 1, 1)).unwrap_err();
        assert!(matches!(coin_flip_err(err), CoinFlipError::FeeOutOfRange { .. }));

        let err = ledger.transact(|tx| initialize(tx, &admin, 0, 0)).unwrap_err();
        assert_eq!(coin_flip_err(err), CoinFlipError::InvalidAmount);
        assert!(ledger.load::<GlobalConfig>(&GlobalConfig::address()).unwrap().is_none());
    }

    #[test]
    fn test_deposit_and_withdraw() {
        let (ledger, admin) = setup();

        let after_deposit = ledger.transact(|tx| deposit_sol(tx, &admin, 4_000)).unwrap();
        assert_eq!(after_deposit.balance, 4_000);
        assert_eq!(after_deposit.state.total_deposited, 4_000);

        let after_withdraw = ledger.transact(|tx| withdraw_sol(tx, &admin, 1_500)).unwrap();
        assert_eq!(after_withdraw.balance, 2_500);
        assert_eq!(after_withdraw.state.total_withdrawn, 1_500);
        assert_eq!(ledger.balance(&admin).unwrap(), 7_500);

        ledger.view(|tx| check_conservation(tx)).unwrap();
    }

    #[test]
    fn test_zero_amounts_rejected() {
        let (ledger, admin) = setup();
        let err = ledger.transact(|tx| deposit_sol(tx, &admin, 0)).unwrap_err();
        assert_eq!(coin_flip_err(err), CoinFlipError::InvalidAmount);
        let err = ledger.transact(|tx| withdraw_sol(tx, &admin, 0)).unwrap_err();
        assert_eq!(coin_flip_err(err), CoinFlipError::InvalidAmount);
    }

    #[test]
    fn test_only_authority_moves_vault_funds() {
        let (ledger, admin) = setup();
        let intruder = Address::from_name("intruder");
        ledger.airdrop(&intruder, 1_000).unwrap();
        ledger.transact(|tx| deposit_sol(tx, &admin, 1_000)).unwrap();

        let err = ledger.transact(|tx| deposit_sol(tx, &intruder, 10)).unwrap_err();
        assert_eq!(coin_flip_err(err), CoinFlipError::Unauthorized);
        let err = ledger.transact(|tx| withdraw_sol(tx, &intruder, 10)).unwrap_err();
        assert_eq!(coin_flip_err(err), CoinFlipError::Unauthorized);
        assert_eq!(ledger.balance(&VaultState::address()).unwrap(), 1_000);
    }

    #[test]
    fn test_withdraw_respects_liabilities() {
        let (ledger, admin) = setup();
        ledger.transact(|tx| deposit_sol(tx, &admin, 1_000)).unwrap();
        ledger
            .transact(|tx| {
                let mut vault = load_vault(tx)?;
                vault.outstanding_liabilities = 700;
                save_vault(tx, &vault)
            })
            .unwrap();

        let err = ledger.transact(|tx| withdraw_sol(tx, &admin, 301)).unwrap_err();
        assert_eq!(
            coin_flip_err(err),
            CoinFlipError::InsufficientVaultFunds {
                requested: 301,
                available: 300
            }
        );
        ledger.transact(|tx| withdraw_sol(tx, &admin, 300)).unwrap();
    }

    #[test]
    fn test_update_fee() {
        let (ledger, admin) = setup();
        let stranger = Address::from_name("stranger");

        let err = ledger.transact(|tx| update_fee(tx, &stranger, 100)).unwrap_err();
        assert_eq!(coin_flip_err(err), CoinFlipError::Unauthorized);

        let err = ledger.transact(|tx| update_fee(tx, &admin, FEE_BPS_MAX + 1)).unwrap_err();
        assert!(matches!(coin_flip_err(err), CoinFlipError::FeeOutOfRange { .. }));

        let config: GlobalConfig = ledger.load(&GlobalConfig::address()).unwrap().unwrap();
        assert_eq!(config.fee_bps, 400);

        assert_eq!(ledger.transact(|tx| update_fee(tx, &admin, 250)).unwrap(), 400);
    }

    #[test]
    fn test_transfer_authority() {
        let (ledger, admin) = setup();
        let successor = Address::from_name("successor");

        ledger.transact(|tx| transfer_authority(tx, &admin, &successor)).unwrap();

        let err = ledger.transact(|tx| update_max_bet(tx, &admin, 5)).unwrap_err();
        assert_eq!(coin_flip_err(err), CoinFlipError::Unauthorized);
        assert_eq!(ledger.transact(|tx| update_max_bet(tx, &successor, 5)).unwrap(), 1_000);
    }

    #[test]
    fn test_actions_before_initialize() {
        let ledger = Ledger::in_memory();
        let admin = Address::from_name("admin");
        let err = ledger.transact(|tx| deposit_sol(tx, &admin, 1)).unwrap_err();
        assert_eq!(coin_flip_err(err), CoinFlipError::NotInitialized);
    }
}
