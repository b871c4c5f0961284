//! Coinflip - provably fair coin-flip wagering engine
//!
//! A bettor escrows a wager in a shared vault and requests VRF randomness;
//! once the oracle fulfills the request the bettor claims, and the bet is
//! settled against the first 8 bytes of the random value. All state lives in
//! a small keyed ledger whose actions are atomic.

pub mod config;
pub mod engine;
pub mod errors;
pub mod ledger;
pub mod randomness;

/// Highest fee the authority may configure (10%)
pub const FEE_BPS_MAX: u64 = 1_000;
pub const BPS_DENOMINATOR: u64 = 10_000;

pub use config::{CoinFlipConfig, ConfigLoader};
pub use engine::{CoinFlipEngine, EngineEvent, Instruction};
pub use errors::{CoinFlipError, EngineError, EngineResult};
pub use ledger::{Address, CoinSide, Ledger, RequestId};
pub use randomness::{LedgerRandomness, RandomnessAdapter, VrfOracle};
