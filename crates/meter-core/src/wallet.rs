//! Addresses, wallets and Ed25519 signatures.
//!
//! An account address is the base58 encoding of its Ed25519 public key, so a
//! signature can be checked against an address without any key lookup.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::CoreError;

/// Length in bytes of an Ed25519 signature.
pub const SIGNATURE_LENGTH: usize = 64;

/// An account address (base58-encoded Ed25519 public key).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address([u8; 32]);

impl Address {
    /// Creates an address from raw public key bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Creates an address from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidAddress` if the slice is not 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        let array: [u8; 32] = bytes.try_into().map_err(|_| {
            CoreError::InvalidAddress(format!("address must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(array))
    }

    /// Parses a base58-encoded address.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidAddress` if the string is not valid base58
    /// or does not decode to 32 bytes.
    pub fn from_base58(s: &str) -> Result<Self, CoreError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| CoreError::InvalidAddress(format!("invalid base58: {e}")))?;
        Self::from_slice(&bytes)
    }

    /// Returns the raw address bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the base58 form of this address.
    #[must_use]
    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    /// Interprets the address as an Ed25519 verifying key.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidAddress` if the bytes are not a valid curve point.
    pub fn verifying_key(&self) -> Result<VerifyingKey, CoreError> {
        VerifyingKey::from_bytes(&self.0).map_err(|e| CoreError::InvalidAddress(e.to_string()))
    }

    /// Verifies that `signature` over `message` was produced by this address's key.
    ///
    /// Uses strict verification so a malleated signature never passes for an
    /// already-accepted one.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidAddress` if the address is not a valid key and
    /// `CoreError::InvalidSignature` if verification fails.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CoreError> {
        self.verifying_key()?
            .verify_strict(message, &signature.0)
            .map_err(|_| CoreError::InvalidSignature)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_base58())
    }
}

impl FromStr for Address {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base58(s)
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_base58(&s).map_err(de::Error::custom)
    }
}

/// An Ed25519 signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(DalekSignature);

impl Signature {
    /// Creates a signature from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: &[u8; SIGNATURE_LENGTH]) -> Self {
        Self(DalekSignature::from_bytes(bytes))
    }

    /// Creates a signature from a byte slice of unknown length.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::MalformedSignature` if the slice is not 64 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        let array: [u8; SIGNATURE_LENGTH] =
            bytes.try_into().map_err(|_| CoreError::MalformedSignature {
                expected: SIGNATURE_LENGTH,
                actual: bytes.len(),
            })?;
        Ok(Self::from_bytes(&array))
    }

    /// Returns the raw bytes of the signature.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LENGTH] {
        self.0.to_bytes()
    }
}

/// An Ed25519 keypair whose public half is an [`Address`].
pub struct Wallet {
    signing_key: SigningKey,
    address: Address,
}

impl Wallet {
    /// Generates a new wallet from the operating system's CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    /// Creates a wallet from a 32-byte secret key.
    #[must_use]
    pub fn from_secret_key(secret: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(secret))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = Address::from_bytes(signing_key.verifying_key().to_bytes());
        Self {
            signing_key,
            address,
        }
    }

    /// Returns the wallet address.
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    /// Signs a message.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.signing_key.sign(message))
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::generate()
    }
}

#[allow(clippy::missing_fields_in_debug)]
impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_base58_roundtrip() {
        let wallet = Wallet::generate();
        let encoded = wallet.address().to_base58();
        let parsed: Address = encoded.parse().expect("valid address");
        assert_eq!(parsed, wallet.address());
    }

    #[test]
    fn address_rejects_wrong_length() {
        let short = bs58::encode([1u8; 16]).into_string();
        assert!(matches!(
            Address::from_base58(&short),
            Err(CoreError::InvalidAddress(_))
        ));
        assert!(Address::from_base58("0OIl").is_err());
    }

    #[test]
    fn signature_verifies_against_signer_address() {
        let wallet = Wallet::generate();
        let signature = wallet.sign(b"claim");
        assert!(wallet.address().verify(b"claim", &signature).is_ok());
    }

    #[test]
    fn signature_rejected_for_other_address_or_message() {
        let signer = Wallet::generate();
        let other = Wallet::generate();
        let signature = signer.sign(b"claim");

        assert_eq!(
            other.address().verify(b"claim", &signature),
            Err(CoreError::InvalidSignature)
        );
        assert_eq!(
            signer.address().verify(b"tampered", &signature),
            Err(CoreError::InvalidSignature)
        );
    }

    #[test]
    fn signature_from_slice_checks_length() {
        let wallet = Wallet::generate();
        let bytes = wallet.sign(b"m").to_bytes();
        assert!(Signature::from_slice(&bytes).is_ok());
        assert_eq!(
            Signature::from_slice(&bytes[..63]),
            Err(CoreError::MalformedSignature {
                expected: 64,
                actual: 63
            })
        );
    }

    #[test]
    fn wallet_from_secret_is_deterministic() {
        let a = Wallet::from_secret_key(&[42u8; 32]);
        let b = Wallet::from_secret_key(&[42u8; 32]);
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn wallet_debug_redacts_secret() {
        let debug = format!("{:?}", Wallet::generate());
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn address_serializes_as_base58_string() {
        let address = Address::from_bytes([3u8; 32]);
        let json = serde_json::to_string(&address).expect("serialize");
        assert_eq!(json, format!("\"{}\"", address.to_base58()));
        let restored: Address = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored, address);
    }
}
