//! Error types for meter-core.

use thiserror::Error;

/// Errors that can occur in core primitive operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Invalid amount (overflow, underflow, or malformed).
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Invalid account address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Signature bytes have the wrong length.
    #[error("malformed signature: expected {expected} bytes, got {actual}")]
    MalformedSignature {
        /// Required signature length.
        expected: usize,
        /// Length that was supplied.
        actual: usize,
    },

    /// Signature did not verify against the expected key.
    #[error("invalid signature")]
    InvalidSignature,
}
