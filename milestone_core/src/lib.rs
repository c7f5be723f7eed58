//! Off-chain milestone proof tracking: flat-file proof collections behind a
//! single-writer database thread, served over a small JSON HTTP API.

pub mod config;
pub mod error;
pub mod frontend;
pub mod proofdb;
pub mod record;
pub mod server;
pub mod store;
pub mod verification;
