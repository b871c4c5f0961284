//! Error types for the coin-flip engine
//!
//! One enum per layer, wrapped by a root error so every action returns a
//! single `EngineResult`.

use thiserror::Error;

/// Root error type for all engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Action rejected by the wagering rules
    #[error("Coin flip error: {0}")]
    CoinFlip(#[from] CoinFlipError),

    /// Randomness oracle errors
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// Storage system errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

/// Rejections raised by engine actions.
///
/// Every one of these is raised before the action writes anything.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoinFlipError {
    #[error("Global config already initialized")]
    AlreadyInitialized,

    #[error("Global config not initialized")]
    NotInitialized,

    #[error("Caller is not allowed to perform this action")]
    Unauthorized,

    #[error("Invalid amount")]
    InvalidAmount,

    #[error("Invalid guess {0} (must be 0 or 1)")]
    InvalidGuess(u8),

    #[error("Fee {fee_bps} bps out of range (max {max_bps})")]
    FeeOutOfRange { fee_bps: u64, max_bps: u64 },

    #[error("Bet of {amount} exceeds max bet {max_bet}")]
    BetTooLarge { amount: u64, max_bet: u64 },

    #[error("Vault cannot cover bet of {amount} (free liquidity {available})")]
    InsufficientVaultCoverage { amount: u64, available: u64 },

    #[error("Vault cannot release {requested} (free liquidity {available})")]
    InsufficientVaultFunds { requested: u64, available: u64 },

    #[error("Insufficient funds: need {need}, have {available}")]
    InsufficientFunds { need: u64, available: u64 },

    #[error("Randomness request {0} already used")]
    DuplicateRequest(String),

    #[error("A bet is already pending for this user")]
    BetAlreadyPending,

    #[error("No pending bet")]
    NoPendingBet,

    #[error("Randomness not fulfilled yet, try again later")]
    RandomnessNotFulfilled,

    #[error("Randomness already fulfilled, claim the bet instead")]
    RandomnessAlreadyFulfilled,

    #[error("Bet has not expired yet ({remaining_secs}s remaining)")]
    BetNotExpired { remaining_secs: i64 },

    #[error("Arithmetic overflow")]
    ArithmeticOverflow,
}

/// Errors raised by the randomness oracle network
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("Oracle network state not bootstrapped")]
    NotBootstrapped,

    #[error("Unknown randomness request {0}")]
    UnknownRequest(String),

    #[error("Randomness request {0} already fulfilled")]
    AlreadyFulfilled(String),

    #[error("Request {0} already registered by another requester")]
    RequesterMismatch(String),

    #[error("Invalid fulfillment proof: {0}")]
    InvalidProof(String),
}

/// Storage system errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database open failed: {0}")]
    DatabaseOpenFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Corrupted data at {key}: {reason}")]
    CorruptedData { key: String, reason: String },
}

/// Configuration and validation errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Missing required field: {0}")]
    MissingRequired(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),
}

impl EngineError {
    /// True when the caller should simply retry the same action later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::CoinFlip(CoinFlipError::RandomnessNotFulfilled)
        )
    }

    /// The wagering rejection behind this error, if any
    pub fn as_coin_flip(&self) -> Option<&CoinFlipError> {
        match self {
            EngineError::CoinFlip(e) => Some(e),
            _ => None,
        }
    }
}

// External error conversions
impl From<rocksdb::Error> for EngineError {
    fn from(e: rocksdb::Error) -> Self {
        EngineError::Storage(StorageError::WriteFailed(e.to_string()))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Storage(StorageError::ReadFailed(e.to_string()))
    }
}

// Convenience type alias for Results
pub type EngineResult<T> = Result<T, EngineError>;
