//! Testing utilities and mock implementations
//!
//! Lets the client run against a scripted broker without a network.

pub mod mocks;

pub use mocks::*;
