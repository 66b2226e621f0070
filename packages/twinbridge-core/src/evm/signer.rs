//! Account management and challenge signing
//!
//! An [`Account`] owns a private key for the lifetime of the process. It is never
//! reachable through a global: callers hand an [`AccountContext`] to every
//! signing and submission call.
//!
//! Challenges are signed with the EIP-191 personal-message convention
//! (`"\x19Ethereum Signed Message:\n" || len || challenge`), and recovery
//! applies the same prefix, so a signature produced here verifies with any
//! `personal_sign` verifier, OpenZeppelin's `ECDSA.toEthSignedMessageHash`
//! included.

use alloy::network::EthereumWallet;
use alloy::primitives::{eip191_hash_message, Address, PrimitiveSignature, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::redact::Redacted;

/// Errors from key loading, signing and recovery
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("secret not available from {source_name}")]
    SecretUnavailable { source_name: String },

    #[error("invalid private key from {source_name}: {reason}")]
    InvalidKey { source_name: String, reason: String },

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("signature recovery failed: {0}")]
    Recovery(String),
}

// ============================================================================
// Secret Loading
// ============================================================================

/// Where the signing key comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSource {
    /// Environment variable holding a hex private key
    Env(String),
    /// File whose first line is a hex private key
    File(PathBuf),
}

impl SecretSource {
    fn describe(&self) -> String {
        match self {
            SecretSource::Env(var) => format!("env {}", var),
            SecretSource::File(path) => format!("file {}", path.display()),
        }
    }

    /// Resolve the secret once; the raw string is dropped as soon as it is parsed
    pub fn load(&self) -> Result<Account, SignerError> {
        let source_name = self.describe();
        let raw = match self {
            SecretSource::Env(var) => std::env::var(var).ok(),
            SecretSource::File(path) => std::fs::read_to_string(path)
                .ok()
                .and_then(|contents| contents.lines().next().map(str::to_string)),
        }
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| SignerError::SecretUnavailable {
            source_name: source_name.clone(),
        })?;

        Account::from_private_key(raw.trim()).map_err(|e| match e {
            SignerError::InvalidKey { reason, .. } => SignerError::InvalidKey { source_name, reason },
            other => other,
        })
    }
}

// ============================================================================
// Account
// ============================================================================

/// A signing identity: address plus key material
///
/// Not `Clone`; share it through [`AccountContext`].
pub struct Account {
    signer: PrivateKeySigner,
}

impl Account {
    /// Parse a hex private key (with or without 0x prefix)
    pub fn from_private_key(key: &str) -> Result<Self, SignerError> {
        let signer: PrivateKeySigner = key.parse().map_err(|e| SignerError::InvalidKey {
            source_name: "private key".to_string(),
            reason: format!("{}", e),
        })?;
        Ok(Self { signer })
    }

    /// Generate fresh key material
    pub fn random() -> Self {
        Self {
            signer: PrivateKeySigner::random(),
        }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Hex private key, for persisting in the identity store
    pub(crate) fn secret_hex(&self) -> Redacted<String> {
        Redacted(hex::encode(self.signer.to_bytes()))
    }

    pub(crate) fn wallet(&self) -> EthereumWallet {
        EthereumWallet::from(self.signer.clone())
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address())
            .field("key", &Redacted(()))
            .finish()
    }
}

/// Shared handle to the account used for one signing scope
#[derive(Debug, Clone)]
pub struct AccountContext {
    account: Arc<Account>,
}

impl AccountContext {
    pub fn new(account: Account) -> Self {
        Self {
            account: Arc::new(account),
        }
    }

    pub fn address(&self) -> Address {
        self.account.address()
    }

    pub fn account(&self) -> &Account {
        &self.account
    }
}

// ============================================================================
// Challenge Signing
// ============================================================================

/// Signature over a challenge together with the claimed signer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedChallenge {
    pub address: Address,
    /// 65-byte `r || s || v` signature
    #[serde(with = "hex::serde")]
    pub signature: Vec<u8>,
}

impl SignedChallenge {
    /// Signature as 0x-prefixed hex
    pub fn signature_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.signature))
    }
}

/// The exact bytes that get hashed for a challenge: EIP-191 prefix plus payload
pub fn personal_message(challenge: &[u8]) -> Vec<u8> {
    let mut message = format!("\x19Ethereum Signed Message:\n{}", challenge.len()).into_bytes();
    message.extend_from_slice(challenge);
    message
}

/// Digest that is actually signed for `challenge`
pub fn challenge_digest(challenge: &[u8]) -> B256 {
    eip191_hash_message(challenge)
}

/// Sign `challenge` with the account in `ctx`
pub fn sign_challenge(ctx: &AccountContext, challenge: &[u8]) -> Result<SignedChallenge, SignerError> {
    let signature = ctx
        .account()
        .signer
        .sign_message_sync(challenge)
        .map_err(|e| SignerError::Signing(e.to_string()))?;

    Ok(SignedChallenge {
        address: ctx.address(),
        signature: signature.as_bytes().to_vec(),
    })
}

/// Recover the signer of `challenge` from a 65-byte signature
pub fn recover_signer(challenge: &[u8], signature: &[u8]) -> Result<Address, SignerError> {
    let signature = PrimitiveSignature::try_from(signature)
        .map_err(|e| SignerError::MalformedSignature(e.to_string()))?;
    signature
        .recover_address_from_msg(challenge)
        .map_err(|e| SignerError::Recovery(e.to_string()))
}

/// True iff `signed` recovers to its own claimed address for `challenge`
pub fn verify_challenge(challenge: &[u8], signed: &SignedChallenge) -> bool {
    matches!(recover_signer(challenge, &signed.signature), Ok(addr) if addr == signed.address)
}
