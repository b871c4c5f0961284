//! Request/read contract between the engine and the randomness oracle
//!
//! The oracle network keeps its records in the same ledger the engine runs
//! on. The engine only ever touches them through [`RandomnessAdapter`].

use crate::errors::{CoinFlipError, EngineResult, OracleError};
use crate::ledger::{derive, Address, CoinSide, LedgerRecord, LedgerTx, RequestId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use tracing::debug;

pub const RANDOMNESS_ACCOUNT_SEED: &[u8] = b"orao-vrf-randomness-request";
pub const CONFIG_ACCOUNT_SEED: &[u8] = b"orao-vrf-network-configuration";

/// 64 bytes of oracle-produced randomness
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Randomness(pub [u8; 64]);

impl Randomness {
    /// Integer the coin is flipped on: first 8 bytes, little endian
    pub fn value(&self) -> u64 {
        let mut head = [0u8; 8];
        head.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(head)
    }

    /// Randomness whose [`value`](Self::value) is exactly `value`
    pub fn from_value(value: u64) -> Self {
        let mut bytes = [0u8; 64];
        bytes[..8].copy_from_slice(&value.to_le_bytes());
        Self(bytes)
    }
}

impl fmt::Debug for Randomness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Randomness({})", hex::encode(&self.0[..8]))
    }
}

impl Serialize for Randomness {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Randomness {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes: Vec<u8> = Deserialize::deserialize(deserializer)?;
        let array: [u8; 64] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("randomness must be 64 bytes"))?;
        Ok(Self(array))
    }
}

/// Fulfillment state of one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fulfillment {
    /// Not produced yet; a normal, retryable state
    Pending,
    Fulfilled {
        randomness: Randomness,
        /// VRF pre-output and proof, empty for scripted fulfillments
        proof: Vec<u8>,
        fulfilled_at: i64,
    },
}

impl Fulfillment {
    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Fulfillment::Fulfilled { .. })
    }

    pub fn randomness(&self) -> Option<&Randomness> {
        match self {
            Fulfillment::Fulfilled { randomness, .. } => Some(randomness),
            Fulfillment::Pending => None,
        }
    }

    pub fn value(&self) -> Option<u64> {
        self.randomness().map(Randomness::value)
    }
}

/// Oracle-owned record of one randomness request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomnessRequest {
    pub request_id: RequestId,
    pub requester: Address,
    pub escrowed_amount: u64,
    pub guess: CoinSide,
    pub requested_at: i64,
    pub fulfillment: Fulfillment,
}

impl RandomnessRequest {
    pub fn address(request_id: &RequestId) -> Address {
        derive(RANDOMNESS_ACCOUNT_SEED, &[request_id.as_bytes()])
    }
}

impl LedgerRecord for RandomnessRequest {
    const KIND: &'static str = "vrf-request";
}

/// Oracle network configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleNetworkState {
    /// Public key fulfillments are verified against
    pub fulfillment_authority: [u8; 32],
    pub treasury: Address,
    pub request_fee: u64,
    pub requests_total: u64,
    pub fulfilled_total: u64,
}

impl OracleNetworkState {
    pub fn address() -> Address {
        derive(CONFIG_ACCOUNT_SEED, &[])
    }
}

impl LedgerRecord for OracleNetworkState {
    const KIND: &'static str = "vrf-network";
}

/// Everything the oracle records about a request
#[derive(Debug, Clone, Copy)]
pub struct RequestParams {
    pub request_id: RequestId,
    pub requester: Address,
    /// Account the request fee is taken from
    pub payer: Address,
    pub escrowed_amount: u64,
    pub guess: CoinSide,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestAck {
    pub request_id: RequestId,
    pub account: Address,
    pub fee_paid: u64,
    /// The id was already registered by the same requester
    pub already_registered: bool,
}

/// Contract the bet engine consumes
pub trait RandomnessAdapter: Send + Sync {
    /// Fee charged to the payer per request
    fn request_fee(&self, tx: &LedgerTx<'_>) -> EngineResult<u64>;

    /// Register interest in randomness for `params.request_id`.
    ///
    /// Idempotent per id: re-requesting returns the existing registration
    /// without charging again.
    fn request(&self, tx: &mut LedgerTx<'_>, params: RequestParams) -> EngineResult<RequestAck>;

    /// Current fulfillment state; pure read
    fn read(&self, tx: &LedgerTx<'_>, request_id: &RequestId) -> EngineResult<Fulfillment>;

    /// Drop a request once its bet is settled or refunded
    fn close(&self, tx: &mut LedgerTx<'_>, request_id: &RequestId) -> EngineResult<()>;
}

/// Adapter over the oracle records kept in the ledger
#[derive(Debug, Default, Clone, Copy)]
pub struct LedgerRandomness;

impl LedgerRandomness {
    fn network_state(tx: &LedgerTx<'_>) -> EngineResult<OracleNetworkState> {
        tx.load(&OracleNetworkState::address())?
            .ok_or_else(|| OracleError::NotBootstrapped.into())
    }
}

impl RandomnessAdapter for LedgerRandomness {
    fn request_fee(&self, tx: &LedgerTx<'_>) -> EngineResult<u64> {
        Ok(Self::network_state(tx)?.request_fee)
    }

    fn request(&self, tx: &mut LedgerTx<'_>, params: RequestParams) -> EngineResult<RequestAck> {
        let account = RandomnessRequest::address(&params.request_id);

        if let Some(existing) = tx.load::<RandomnessRequest>(&account)? {
            if existing.requester != params.requester {
                return Err(OracleError::RequesterMismatch(params.request_id.to_hex()).into());
            }
            return Ok(RequestAck {
                request_id: params.request_id,
                account,
                fee_paid: 0,
                already_registered: true,
            });
        }

        let mut network = Self::network_state(tx)?;
        tx.transfer(&params.payer, &network.treasury, network.request_fee)?;
        network.requests_total = network
            .requests_total
            .checked_add(1)
            .ok_or(CoinFlipError::ArithmeticOverflow)?;
        tx.save(&OracleNetworkState::address(), &network)?;

        let request = RandomnessRequest {
            request_id: params.request_id,
            requester: params.requester,
            escrowed_amount: params.escrowed_amount,
            guess: params.guess,
            requested_at: tx.now(),
            fulfillment: Fulfillment::Pending,
        };
        tx.save(&account, &request)?;

        debug!(request_id = %params.request_id, fee = network.request_fee, "randomness requested");

        Ok(RequestAck {
            request_id: params.request_id,
            account,
            fee_paid: network.request_fee,
            already_registered: false,
        })
    }

    fn read(&self, tx: &LedgerTx<'_>, request_id: &RequestId) -> EngineResult<Fulfillment> {
        tx.load::<RandomnessRequest>(&RandomnessRequest::address(request_id))?
            .map(|request| request.fulfillment)
            .ok_or_else(|| OracleError::UnknownRequest(request_id.to_hex()).into())
    }

    fn close(&self, tx: &mut LedgerTx<'_>, request_id: &RequestId) -> EngineResult<()> {
        tx.remove::<RandomnessRequest>(&RandomnessRequest::address(request_id));
        tx.mark_consumed(request_id)
    }
}

/// Write a fulfillment into a pending request (oracle network side)
pub(crate) fn record_fulfillment(
    tx: &mut LedgerTx<'_>,
    request_id: &RequestId,
    randomness: Randomness,
    proof: Vec<u8>,
) -> EngineResult<()> {
    let account = RandomnessRequest::address(request_id);
    let mut request = tx
        .load::<RandomnessRequest>(&account)?
        .ok_or_else(|| OracleError::UnknownRequest(request_id.to_hex()))?;
    if request.fulfillment.is_fulfilled() {
        return Err(OracleError::AlreadyFulfilled(request_id.to_hex()).into());
    }

    request.fulfillment = Fulfillment::Fulfilled {
        randomness,
        proof,
        fulfilled_at: tx.now(),
    };
    tx.save(&account, &request)?;

    let network_address = OracleNetworkState::address();
    let mut network = tx
        .load::<OracleNetworkState>(&network_address)?
        .ok_or(OracleError::NotBootstrapped)?;
    network.fulfilled_total = network
        .fulfilled_total
        .checked_add(1)
        .ok_or(CoinFlipError::ArithmeticOverflow)?;
    tx.save(&network_address, &network)
}
