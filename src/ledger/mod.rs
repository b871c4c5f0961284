//! Host ledger: keyed records, balances and atomic actions
//!
//! Actions run one at a time. Each one works on a [`LedgerTx`] overlay; the
//! overlay is committed as a single write set when the action returns `Ok`
//! and dropped otherwise, so a failed action leaves no trace.

pub mod accounts;
pub mod address;
pub mod clock;
pub mod store;

pub use accounts::*;
pub use address::{derive, seeds, Address, RequestId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{open_store, AccountStore, MemoryStore, RocksStore, WriteOp, WriteSet};

use crate::config::StorageConfig;
use crate::errors::{CoinFlipError, EngineResult, StorageError};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::{Arc, Mutex};

const BALANCE_PREFIX: &[u8] = b"bal:";
const CONSUMED_PREFIX: &[u8] = b"used:";

/// A typed record stored at a derived address
pub trait LedgerRecord: Serialize + DeserializeOwned {
    /// Key namespace of this record type
    const KIND: &'static str;

    fn storage_key(address: &Address) -> Vec<u8> {
        let mut key = Vec::with_capacity(Self::KIND.len() + 33);
        key.extend_from_slice(Self::KIND.as_bytes());
        key.push(b':');
        key.extend_from_slice(address.as_bytes());
        key
    }
}

fn balance_key(address: &Address) -> Vec<u8> {
    let mut key = Vec::with_capacity(BALANCE_PREFIX.len() + 32);
    key.extend_from_slice(BALANCE_PREFIX);
    key.extend_from_slice(address.as_bytes());
    key
}

fn consumed_key(request_id: &RequestId) -> Vec<u8> {
    let mut key = Vec::with_capacity(CONSUMED_PREFIX.len() + 32);
    key.extend_from_slice(CONSUMED_PREFIX);
    key.extend_from_slice(request_id.as_bytes());
    key
}

fn decode<T: DeserializeOwned>(key: &[u8], bytes: &[u8]) -> EngineResult<T> {
    bincode::deserialize(bytes).map_err(|e| {
        StorageError::CorruptedData {
            key: hex::encode(key),
            reason: e.to_string(),
        }
        .into()
    })
}

fn encode<T: Serialize>(key: &[u8], value: &T) -> EngineResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| {
        StorageError::CorruptedData {
            key: hex::encode(key),
            reason: e.to_string(),
        }
        .into()
    })
}

/// The host ledger every engine action executes against
pub struct Ledger {
    store: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl Ledger {
    pub fn new(store: Arc<dyn AccountStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    /// Fresh in-memory ledger on the system clock
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(SystemClock))
    }

    /// Ledger on the configured storage backend
    pub fn open(config: &StorageConfig) -> EngineResult<Self> {
        Ok(Self::new(open_store(config)?, Arc::new(SystemClock)))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> i64 {
        self.clock.unix_timestamp()
    }

    /// Run one atomic action.
    ///
    /// Writes become visible only if `action` returns `Ok`.
    pub fn transact<T, F>(&self, action: F) -> EngineResult<T>
    where
        F: FnOnce(&mut LedgerTx<'_>) -> EngineResult<T>,
    {
        self.transact_then(action, |_| {})
    }

    /// Like [`transact`](Self::transact), and runs `on_commit` after a
    /// successful commit while the writer lock is still held. Hooks therefore
    /// observe actions in commit order.
    pub fn transact_then<T, F, H>(&self, action: F, on_commit: H) -> EngineResult<T>
    where
        F: FnOnce(&mut LedgerTx<'_>) -> EngineResult<T>,
        H: FnOnce(&T),
    {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut tx = LedgerTx::new(self.store.as_ref(), self.clock.unix_timestamp());
        let output = action(&mut tx)?;
        let writes = tx.into_writes();
        if !writes.is_empty() {
            self.store.commit(writes)?;
        }
        on_commit(&output);
        Ok(output)
    }

    /// Read a consistent view; any writes made by `query` are discarded
    pub fn view<T, F>(&self, query: F) -> EngineResult<T>
    where
        F: FnOnce(&LedgerTx<'_>) -> EngineResult<T>,
    {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let tx = LedgerTx::new(self.store.as_ref(), self.clock.unix_timestamp());
        query(&tx)
    }

    /// Host-level funding of an address (genesis allocation, test faucet)
    pub fn airdrop(&self, to: &Address, amount: u64) -> EngineResult<u64> {
        self.transact(|tx| tx.mint(to, amount))
    }

    pub fn balance(&self, address: &Address) -> EngineResult<u64> {
        self.view(|tx| tx.balance(address))
    }

    pub fn load<T: LedgerRecord>(&self, address: &Address) -> EngineResult<Option<T>> {
        self.view(|tx| tx.load(address))
    }
}

/// Write overlay of a single action
pub struct LedgerTx<'a> {
    store: &'a dyn AccountStore,
    writes: WriteSet,
    now: i64,
}

impl<'a> LedgerTx<'a> {
    fn new(store: &'a dyn AccountStore, now: i64) -> Self {
        Self {
            store,
            writes: WriteSet::new(),
            now,
        }
    }

    fn into_writes(self) -> WriteSet {
        self.writes
    }

    /// Ledger time at which this action executes
    pub fn now(&self) -> i64 {
        self.now
    }

    fn get_raw(&self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        match self.writes.get(key) {
            Some(WriteOp::Put(value)) => Ok(Some(value.clone())),
            Some(WriteOp::Delete) => Ok(None),
            None => self.store.get(key),
        }
    }

    pub fn load<T: LedgerRecord>(&self, address: &Address) -> EngineResult<Option<T>> {
        let key = T::storage_key(address);
        match self.get_raw(&key)? {
            Some(bytes) => decode(&key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn exists<T: LedgerRecord>(&self, address: &Address) -> EngineResult<bool> {
        Ok(self.get_raw(&T::storage_key(address))?.is_some())
    }

    pub fn save<T: LedgerRecord>(&mut self, address: &Address, record: &T) -> EngineResult<()> {
        let key = T::storage_key(address);
        let bytes = encode(&key, record)?;
        self.writes.insert(key, WriteOp::Put(bytes));
        Ok(())
    }

    pub fn remove<T: LedgerRecord>(&mut self, address: &Address) {
        self.writes.insert(T::storage_key(address), WriteOp::Delete);
    }

    /// Every record of type `T`, overlay included
    pub fn scan<T: LedgerRecord>(&self) -> EngineResult<Vec<(Address, T)>> {
        let mut prefix = T::KIND.as_bytes().to_vec();
        prefix.push(b':');

        let mut merged: std::collections::BTreeMap<Vec<u8>, Vec<u8>> =
            self.store.scan_prefix(&prefix)?.into_iter().collect();
        for (key, op) in self.writes.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            match op {
                WriteOp::Put(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                WriteOp::Delete => {
                    merged.remove(key);
                }
            }
        }

        merged
            .into_iter()
            .map(|(key, bytes)| -> EngineResult<(Address, T)> {
                let raw: [u8; 32] = key[prefix.len()..].try_into().map_err(|_| {
                    StorageError::CorruptedData {
                        key: hex::encode(&key),
                        reason: "address suffix is not 32 bytes".to_string(),
                    }
                })?;
                Ok((Address::new(raw), decode(&key, &bytes)?))
            })
            .collect()
    }

    pub fn balance(&self, address: &Address) -> EngineResult<u64> {
        let key = balance_key(address);
        match self.get_raw(&key)? {
            Some(bytes) => decode(&key, &bytes),
            None => Ok(0),
        }
    }

    fn set_balance(&mut self, address: &Address, amount: u64) -> EngineResult<()> {
        let key = balance_key(address);
        let bytes = encode(&key, &amount)?;
        self.writes.insert(key, WriteOp::Put(bytes));
        Ok(())
    }

    /// Move funds between two addresses
    pub fn transfer(&mut self, from: &Address, to: &Address, amount: u64) -> EngineResult<()> {
        if amount == 0 || from == to {
            return Ok(());
        }

        let from_balance = self.balance(from)?;
        if from_balance < amount {
            return Err(CoinFlipError::InsufficientFunds {
                need: amount,
                available: from_balance,
            }
            .into());
        }
        let to_balance = self
            .balance(to)?
            .checked_add(amount)
            .ok_or(CoinFlipError::ArithmeticOverflow)?;

        self.set_balance(from, from_balance - amount)?;
        self.set_balance(to, to_balance)
    }

    /// Create funds out of thin air; only reachable through [`Ledger::airdrop`]
    fn mint(&mut self, to: &Address, amount: u64) -> EngineResult<u64> {
        let balance = self
            .balance(to)?
            .checked_add(amount)
            .ok_or(CoinFlipError::ArithmeticOverflow)?;
        self.set_balance(to, balance)?;
        Ok(balance)
    }

    pub fn is_consumed(&self, request_id: &RequestId) -> EngineResult<bool> {
        Ok(self.get_raw(&consumed_key(request_id))?.is_some())
    }

    /// Tombstone a request id so it can never be used again
    pub fn mark_consumed(&mut self, request_id: &RequestId) -> EngineResult<()> {
        let key = consumed_key(request_id);
        let bytes = encode(&key, &self.now)?;
        self.writes.insert(key, WriteOp::Put(bytes));
        Ok(())
    }
}
