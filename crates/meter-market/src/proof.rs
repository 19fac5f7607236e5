//! Proof-of-work claim verification and replay protection.
//!
//! A host authenticates each claim by signing the canonical message
//!
//! ```text
//! proof_hash (32 bytes) || host address (32 bytes) || units (u64, big-endian)
//! ```
//!
//! which binds the signature to one host and one claimed quantity. The
//! proof hash itself is consumed on acceptance, so the same claim can never be
//! credited to a second session.
//!
//! Verification is pure; replay bookkeeping lives in [`UsedProofSet`].

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use meter_core::{Address, CoreError, Signature, Wallet};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::MarketError;

/// Length of the canonical proof message.
pub const PROOF_MESSAGE_LENGTH: usize = 32 + 32 + 8;

/// Hash identifying a unit-of-work claim.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProofHash([u8; 32]);

impl ProofHash {
    /// Creates a proof hash from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hashes arbitrary work output into a proof hash.
    #[must_use]
    pub fn digest(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ProofHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ProofHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProofHash({self})")
    }
}

impl FromStr for ProofHash {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| MarketError::InvalidParameter(format!("invalid proof hash: {e}")))?;
        Ok(Self(bytes))
    }
}

impl Serialize for ProofHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ProofHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// A host's claim of additional units of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofClaim {
    /// Units produced since the last accepted proof.
    pub units: u64,
    /// Hash of the claimed work.
    pub proof_hash: ProofHash,
    /// Raw signature bytes over the canonical message.
    pub signature: Vec<u8>,
    /// Off-chain locator for the work content.
    pub content_locator: String,
}

impl ProofClaim {
    /// Builds and signs a claim with the host's wallet.
    #[must_use]
    pub fn signed(
        wallet: &Wallet,
        proof_hash: ProofHash,
        units: u64,
        content_locator: impl Into<String>,
    ) -> Self {
        Self {
            units,
            proof_hash,
            signature: sign_proof(wallet, &proof_hash, units).to_bytes().to_vec(),
            content_locator: content_locator.into(),
        }
    }
}

/// Append-only audit record of an accepted proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofSubmission {
    /// Hash of the claimed work.
    pub proof_hash: ProofHash,
    /// Units credited by this submission.
    pub units: u64,
    /// Signature that authenticated the claim.
    pub signature: Signature,
    /// Off-chain locator for the work content.
    pub content_locator: String,
    /// Whether the signature was verified.
    pub verified: bool,
    /// When the proof was accepted.
    pub submitted_at: DateTime<Utc>,
}

/// Builds the canonical message a host signs for a claim.
#[must_use]
pub fn proof_message(proof_hash: &ProofHash, host: &Address, units: u64) -> [u8; PROOF_MESSAGE_LENGTH] {
    let mut message = [0u8; PROOF_MESSAGE_LENGTH];
    message[..32].copy_from_slice(proof_hash.as_bytes());
    message[32..64].copy_from_slice(host.as_bytes());
    message[64..].copy_from_slice(&units.to_be_bytes());
    message
}

/// Signs a claim with the host's wallet.
#[must_use]
pub fn sign_proof(wallet: &Wallet, proof_hash: &ProofHash, units: u64) -> Signature {
    wallet.sign(&proof_message(proof_hash, &wallet.address(), units))
}

/// Verifies that `signature` was produced by `host` over the claim.
///
/// # Errors
///
/// Returns `MarketError::MalformedSignature` if the signature is not 64 bytes
/// and `MarketError::SignerMismatch` if it does not verify for `host`.
pub fn verify_proof_signature(
    host: &Address,
    proof_hash: &ProofHash,
    units: u64,
    signature: &[u8],
) -> Result<Signature, MarketError> {
    let signature = Signature::from_slice(signature)?;
    let message = proof_message(proof_hash, host, units);

    match host.verify(&message, &signature) {
        Ok(()) => Ok(signature),
        Err(CoreError::InvalidSignature | CoreError::InvalidAddress(_)) => {
            Err(MarketError::SignerMismatch(host.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Set of proof hashes that have already been credited.
///
/// Entries are never evicted; forgetting a hash would let it be replayed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedProofSet {
    hashes: HashSet<ProofHash>,
}

impl UsedProofSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the hash has been used.
    #[must_use]
    pub fn contains(&self, hash: &ProofHash) -> bool {
        self.hashes.contains(hash)
    }

    /// Fails if the hash has been used.
    ///
    /// # Errors
    ///
    /// Returns `MarketError::ProofReplay` for a used hash.
    pub fn check_unused(&self, hash: &ProofHash) -> Result<(), MarketError> {
        if self.contains(hash) {
            Err(MarketError::ProofReplay(hash.to_string()))
        } else {
            Ok(())
        }
    }

    /// Marks a hash as used. Returns `false` if it was already present.
    pub fn mark_used(&mut self, hash: ProofHash) -> bool {
        self.hashes.insert(hash)
    }

    /// Number of consumed hashes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Returns true if no hash has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_message_layout() {
        let hash = ProofHash::from_bytes([0xaa; 32]);
        let host = Address::from_bytes([0xbb; 32]);
        let message = proof_message(&hash, &host, 500);

        assert_eq!(&message[..32], &[0xaa; 32]);
        assert_eq!(&message[32..64], &[0xbb; 32]);
        assert_eq!(&message[64..], &500u64.to_be_bytes());
    }

    #[test]
    fn valid_signature_verifies() {
        let host = Wallet::generate();
        let hash = ProofHash::digest(b"work");
        let claim = ProofClaim::signed(&host, hash, 500, "cid");

        let result = verify_proof_signature(&host.address(), &hash, 500, &claim.signature);
        assert!(result.is_ok());
    }

    #[test]
    fn signature_bound_to_quantity() {
        let host = Wallet::generate();
        let hash = ProofHash::digest(b"work");
        let claim = ProofClaim::signed(&host, hash, 500, "cid");

        let result = verify_proof_signature(&host.address(), &hash, 501, &claim.signature);
        assert!(matches!(result, Err(MarketError::SignerMismatch(_))));
    }

    #[test]
    fn signature_bound_to_host() {
        let host = Wallet::generate();
        let other = Wallet::generate();
        let hash = ProofHash::digest(b"work");
        let claim = ProofClaim::signed(&host, hash, 500, "cid");

        let result = verify_proof_signature(&other.address(), &hash, 500, &claim.signature);
        assert!(matches!(result, Err(MarketError::SignerMismatch(_))));
    }

    #[test]
    fn malformed_signature_length_rejected() {
        let host = Wallet::generate();
        let hash = ProofHash::digest(b"work");

        let result = verify_proof_signature(&host.address(), &hash, 1, &[0u8; 65]);
        assert!(matches!(
            result,
            Err(MarketError::MalformedSignature {
                expected: 64,
                actual: 65
            })
        ));
    }

    #[test]
    fn used_set_detects_replay() {
        let mut used = UsedProofSet::new();
        let hash = ProofHash::digest(b"work");

        assert!(used.check_unused(&hash).is_ok());
        assert!(used.mark_used(hash));
        assert!(!used.mark_used(hash));
        assert!(matches!(
            used.check_unused(&hash),
            Err(MarketError::ProofReplay(_))
        ));
        assert_eq!(used.len(), 1);
    }

    #[test]
    fn proof_hash_hex_roundtrip() {
        let hash = ProofHash::digest(b"abc");
        let parsed: ProofHash = hash.to_string().parse().expect("valid hex");
        assert_eq!(parsed, hash);
    }
}
