//! Decrypt a Signal Desktop database and browse it over a local HTTP API.

pub mod config;
pub mod database;
pub mod errors;
pub mod keys;
pub mod queries;
pub mod server;
pub mod session;

#[cfg(test)]
mod test_support;

pub use errors::{ArchiveError, Result};
