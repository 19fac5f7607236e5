//! # meter-core
//!
//! Primitives shared by the metered session escrow engine.
//!
//! This crate provides:
//!
//! - [`Amount`] — Asset amount with 18-decimal fixed-point precision
//! - [`Address`] — Base58 account address backed by an Ed25519 public key
//! - [`Wallet`] — Key management and message signing
//! - [`Asset`] — Native currency or a fungible token

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod amount;
pub mod asset;
pub mod error;
pub mod wallet;

pub use amount::Amount;
pub use asset::{Asset, AssetCategory};
pub use error::CoreError;
pub use wallet::{Address, Signature, Wallet, SIGNATURE_LENGTH};
