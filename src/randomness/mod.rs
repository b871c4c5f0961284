pub mod adapter;
pub mod vrf;

pub use adapter::{
    Fulfillment, LedgerRandomness, OracleNetworkState, Randomness, RandomnessAdapter,
    RandomnessRequest, RequestAck, RequestParams,
};
pub use vrf::{verify_fulfillment, VrfOracle};
