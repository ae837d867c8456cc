//! Error types for redemption processing.

use thiserror::Error;

/// Deterministic rejection reasons, in the order the checks run.
///
/// The messages are the caller-facing reason strings.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    #[error("Voucher not found")]
    NotFound,
    #[error("Voucher is inactive")]
    Inactive,
    #[error("This voucher is restricted to a specific customer")]
    CustomerMismatch,
    #[error("Customer ID is required for this voucher")]
    CustomerIdRequired,
    #[error("Voucher has expired")]
    Expired,
    #[error("Voucher is not yet active")]
    NotYetActive,
    #[error("Voucher has reached maximum redemption")]
    RedemptionLimitReached,
    #[error("Daily quota exceeded")]
    DailyQuotaExceeded,
}

/// Top-level error returned by [`Engine::redeem`](super::Engine::redeem) and
/// [`Engine::validate`](super::Engine::validate).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RedeemError {
    /// The attempt was evaluated and turned down; nothing was mutated.
    #[error("{0}")]
    Rejected(#[from] RejectReason),

    /// The row lock could not be acquired within the retry budget.
    #[error("Voucher is busy, please retry")]
    Contended,
}
