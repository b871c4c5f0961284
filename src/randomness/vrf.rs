//! Simulated oracle network backed by a schnorrkel VRF
//!
//! Stands in for the external oracle: bootstraps the network state, fulfills
//! pending requests and lets anyone check that a value is bound to its
//! request id.

use crate::errors::{EngineResult, OracleError};
use crate::ledger::{Address, Ledger, RequestId};
use crate::randomness::adapter::{
    record_fulfillment, OracleNetworkState, Randomness, RandomnessRequest,
};
use schnorrkel::vrf::{VRFPreOut, VRFProof};
use schnorrkel::{signing_context, ExpansionMode, Keypair, MiniSecretKey, PublicKey};
use sha2::{Digest, Sha256, Sha512};
use std::sync::Arc;
use tracing::{debug, info};

const VRF_SIGNING_CONTEXT: &[u8] = b"coinflip-vrf";
const VRF_OUTPUT_CONTEXT: &[u8] = b"coinflip-randomness";

/// Pre-output (32 bytes) followed by the proof (64 bytes)
pub const PROOF_LEN: usize = 96;

/// VRF-backed randomness oracle
pub struct VrfOracle {
    keypair: Arc<Keypair>,
}

impl VrfOracle {
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    /// Oracle with a random keypair (for testing)
    pub fn new_random() -> Self {
        use rand_core::OsRng;
        Self::new(Keypair::generate_with(OsRng))
    }

    /// Oracle whose key is derived from a seed phrase, stable across runs
    pub fn from_seed_phrase(phrase: &str) -> EngineResult<Self> {
        let seed: [u8; 32] = Sha256::digest(phrase.as_bytes()).into();
        let mini = MiniSecretKey::from_bytes(&seed)
            .map_err(|e| OracleError::InvalidProof(format!("bad seed: {:?}", e)))?;
        Ok(Self::new(mini.expand_to_keypair(ExpansionMode::Ed25519)))
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public.to_bytes()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key())
    }

    /// Create (or reconfigure) the oracle network state in the ledger
    pub fn bootstrap(
        &self,
        ledger: &Ledger,
        treasury: Address,
        request_fee: u64,
    ) -> EngineResult<OracleNetworkState> {
        let state = ledger.transact(|tx| {
            let address = OracleNetworkState::address();
            let state = match tx.load::<OracleNetworkState>(&address)? {
                Some(mut existing) => {
                    existing.fulfillment_authority = self.public_key();
                    existing.treasury = treasury;
                    existing.request_fee = request_fee;
                    existing
                }
                None => OracleNetworkState {
                    fulfillment_authority: self.public_key(),
                    treasury,
                    request_fee,
                    requests_total: 0,
                    fulfilled_total: 0,
                },
            };
            tx.save(&address, &state)?;
            Ok(state)
        })?;

        info!(treasury = %treasury, request_fee, authority = %self.public_key_hex(), "oracle network bootstrapped");
        Ok(state)
    }

    /// Evaluate the VRF on a request id
    pub fn evaluate(&self, request_id: &RequestId) -> (Randomness, Vec<u8>) {
        let transcript = signing_context(VRF_SIGNING_CONTEXT).bytes(request_id.as_bytes());
        let (inout, proof, _) = self.keypair.vrf_sign(transcript);

        let seed: [u8; 32] = inout.make_bytes(VRF_OUTPUT_CONTEXT);
        let randomness = expand(&seed);

        let mut proof_bytes = Vec::with_capacity(PROOF_LEN);
        proof_bytes.extend_from_slice(&inout.to_preout().to_bytes());
        proof_bytes.extend_from_slice(&proof.to_bytes());

        (randomness, proof_bytes)
    }

    /// Fulfill one pending request with VRF output
    pub fn fulfill(&self, ledger: &Ledger, request_id: &RequestId) -> EngineResult<Randomness> {
        let (randomness, proof) = self.evaluate(request_id);
        ledger.transact(|tx| record_fulfillment(tx, request_id, randomness, proof))?;

        debug!(request_id = %request_id, value = randomness.value(), "randomness fulfilled");
        Ok(randomness)
    }

    /// Fulfill with a caller-chosen value.
    ///
    /// Carries no proof, so [`verify_fulfillment`] rejects it. Meant for
    /// scripted environments that need a known outcome.
    pub fn fulfill_with_value(
        &self,
        ledger: &Ledger,
        request_id: &RequestId,
        value: u64,
    ) -> EngineResult<Randomness> {
        let randomness = Randomness::from_value(value);
        ledger.transact(|tx| record_fulfillment(tx, request_id, randomness, Vec::new()))?;
        Ok(randomness)
    }

    /// Fulfill every request still waiting; returns how many were fulfilled
    pub fn fulfill_pending(&self, ledger: &Ledger) -> EngineResult<usize> {
        let pending: Vec<RequestId> = ledger.view(|tx| {
            Ok(tx
                .scan::<RandomnessRequest>()?
                .into_iter()
                .filter(|(_, request)| !request.fulfillment.is_fulfilled())
                .map(|(_, request)| request.request_id)
                .collect())
        })?;

        for request_id in &pending {
            self.fulfill(ledger, request_id)?;
        }
        Ok(pending.len())
    }
}

fn expand(seed: &[u8; 32]) -> Randomness {
    let digest = Sha512::digest(seed);
    let mut bytes = [0u8; 64];
    bytes.copy_from_slice(&digest);
    Randomness(bytes)
}

/// Check that `randomness` is the VRF output of `public_key` on `request_id`
pub fn verify_fulfillment(
    public_key: &[u8; 32],
    request_id: &RequestId,
    randomness: &Randomness,
    proof: &[u8],
) -> Result<bool, OracleError> {
    if proof.len() != PROOF_LEN {
        return Err(OracleError::InvalidProof(format!(
            "expected {} proof bytes, got {}",
            PROOF_LEN,
            proof.len()
        )));
    }

    let public = PublicKey::from_bytes(public_key)
        .map_err(|e| OracleError::InvalidProof(format!("invalid public key: {:?}", e)))?;
    let preout = VRFPreOut::from_bytes(&proof[..32])
        .map_err(|e| OracleError::InvalidProof(format!("invalid pre-output: {:?}", e)))?;
    let vrf_proof = VRFProof::from_bytes(&proof[32..])
        .map_err(|e| OracleError::InvalidProof(format!("invalid proof: {:?}", e)))?;

    let transcript = signing_context(VRF_SIGNING_CONTEXT).bytes(request_id.as_bytes());
    let inout = match public.vrf_verify(transcript, &preout, &vrf_proof) {
        Ok((inout, _)) => inout,
        Err(_) => return Ok(false),
    };

    let seed: [u8; 32] = inout.make_bytes(VRF_OUTPUT_CONTEXT);
    Ok(expand(&seed) == *randomness)
}
