//! Authoritative voucher store and redemption ledger.
//!
//! The voucher row is the only contended resource: each row carries its own
//! async mutex, and holding that mutex is what the redemption protocol calls
//! "the row lock". The ledger is append-only and written exclusively while
//! the owning row's lock is held.

use thiserror::Error;

mod memory;

pub use memory::{MemoryStore, RedemptionFilter, RedemptionTxn};

/// Failure to acquire a voucher row lock in time. Transient; callers retry
/// a bounded number of times before giving up.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    #[error("timed out waiting for the voucher row lock")]
    Timeout,
}
