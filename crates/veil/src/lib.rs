//! Core of a non-custodial privacy wallet.
//!
//! One credential deterministically yields every key the wallet needs. Secrets are kept in an
//! encrypted local store, the external privacy engine is started once per process, and private
//! transactions are proved by cancellable background tasks whose progress is observable.

#![recursion_limit = "256"]

pub mod broadcast;
pub mod chain;
pub mod config;
pub mod doctor;
pub mod engine;
pub mod errors;
pub mod fsutil;
pub mod keys;
pub mod paths;
pub mod proof;
pub mod retry;
pub mod store;
#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;
pub mod wallet;

pub use errors::{Result, VeilError};
