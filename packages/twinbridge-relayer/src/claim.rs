//! Merkle claim flow
//!
//! The validator contract commits to a tree over the first 8192 primes. A
//! claim proves one prime's inclusion and submits `submit(proof, leaf)` from
//! the claiming account. Before anything is sent the account signs a random
//! challenge and the signature and proof are both checked locally.

use alloy::primitives::B256;
use rand::RngCore;
use thiserror::Error;
use tracing::{debug, info};

use twinbridge_core::evm::{
    sign_challenge, verify_challenge, AccountContext, BridgeCall, SignedChallenge, SignerError,
    SubmissionError, SubmissionOutcome, TxSubmitter,
};
use twinbridge_core::{
    bytes32_to_hex, generate_primes, leaves_from_u64, u64_to_bytes32, Bytes32, MerkleError,
    MerkleProof, MerkleTree,
};

/// Leaves in the validator's tree
pub const PRIME_LEAF_COUNT: usize = 8192;

/// Bytes of randomness in a claim challenge
pub const CHALLENGE_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ClaimError {
    /// Claims start at index 1
    #[error("leaf index 0 is reserved; claim an index between 1 and {max}")]
    ReservedIndex { max: usize },

    #[error(transparent)]
    Merkle(#[from] MerkleError),

    #[error("proof for leaf {index} does not verify against root {root}")]
    ProofRejected { index: usize, root: String },

    #[error("challenge signature does not recover to {address}")]
    ChallengeRejected { address: String },

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),
}

/// The prime leaf set and its tree
pub struct PrimeTree {
    primes: Vec<u64>,
    tree: MerkleTree,
}

impl PrimeTree {
    /// Tree over the first `count` primes; `count` must be a power of two
    pub fn generate(count: usize) -> Result<Self, ClaimError> {
        let primes = generate_primes(count);
        let tree = MerkleTree::build(leaves_from_u64(&primes))?;
        debug!(
            leaves = tree.leaf_count(),
            height = tree.height(),
            root = %bytes32_to_hex(&tree.root()),
            "Built prime tree"
        );
        Ok(Self { primes, tree })
    }

    pub fn root(&self) -> Bytes32 {
        self.tree.root()
    }

    pub fn tree(&self) -> &MerkleTree {
        &self.tree
    }

    /// Everything needed to claim the leaf at `index`
    pub fn plan(&self, index: usize) -> Result<ClaimPlan, ClaimError> {
        if index == 0 {
            return Err(ClaimError::ReservedIndex {
                max: self.tree.leaf_count() - 1,
            });
        }
        let proof = self.tree.proof(index)?;
        let prime = self.primes[index];
        let leaf = u64_to_bytes32(prime);
        let root = self.tree.root();

        if !proof.verify(&root, &leaf) {
            return Err(ClaimError::ProofRejected {
                index,
                root: bytes32_to_hex(&root),
            });
        }

        Ok(ClaimPlan {
            index,
            prime,
            leaf,
            root,
            proof,
        })
    }
}

/// A locally verified claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimPlan {
    pub index: usize,
    pub prime: u64,
    pub leaf: Bytes32,
    pub root: Bytes32,
    pub proof: MerkleProof,
}

impl ClaimPlan {
    /// The validator call carrying this claim
    pub fn call(&self) -> BridgeCall {
        BridgeCall::SubmitProof {
            proof: self.proof.siblings.iter().map(|s| B256::from(*s)).collect(),
            leaf: B256::from(self.leaf),
        }
    }
}

/// Fresh random challenge bytes
pub fn random_challenge() -> [u8; CHALLENGE_LEN] {
    let mut challenge = [0u8; CHALLENGE_LEN];
    rand::thread_rng().fill_bytes(&mut challenge);
    challenge
}

/// Sign `challenge` with the claiming account and check it recovers
pub fn authorize(ctx: &AccountContext, challenge: &[u8]) -> Result<SignedChallenge, ClaimError> {
    let signed = sign_challenge(ctx, challenge)?;
    if !verify_challenge(challenge, &signed) {
        return Err(ClaimError::ChallengeRejected {
            address: ctx.address().to_string(),
        });
    }
    debug!(
        address = %signed.address,
        signature = %signed.signature_hex(),
        "Challenge signed"
    );
    Ok(signed)
}

/// Authorize, then submit `plan` through `submitter`
pub async fn submit_claim(
    submitter: &dyn TxSubmitter,
    ctx: &AccountContext,
    plan: &ClaimPlan,
) -> Result<SubmissionOutcome, ClaimError> {
    authorize(ctx, &random_challenge())?;

    info!(
        chain = %submitter.chain_name(),
        claimant = %ctx.address(),
        index = plan.index,
        prime = plan.prime,
        root = %bytes32_to_hex(&plan.root),
        proof_len = plan.proof.siblings.len(),
        "Submitting Merkle claim"
    );
    let outcome = submitter.submit(ctx, &plan.call()).await?;
    crate::metrics::record_submission(submitter.chain_name(), "submit", outcome.status());
    Ok(outcome)
}
