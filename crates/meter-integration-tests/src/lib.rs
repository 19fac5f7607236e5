//! Integration test crate for the metered session marketplace.
//!
//! This crate exists solely to run tests that span the core primitives and
//! the marketplace engine. It has no public API.

#![forbid(unsafe_code)]
