//! # medchain-contracts
//!
//! Shared types and errors for the medication-administration hash chain.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate, only data definitions and error types.

pub mod error;
pub mod record;
pub mod verify;
