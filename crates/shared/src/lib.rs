#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Botfleet Shared Types
//!
//! This crate contains the wire types shared across the Botfleet platform.

pub mod types;

pub use types::*;
