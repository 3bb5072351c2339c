//! Shared utilities.
//!
//! Hashing, filesystem helpers and script execution used across the crate.

pub mod cmd;
pub mod fs;
pub mod hash;
