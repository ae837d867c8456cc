//! Redemption transaction coordinator.
//!
//! Orchestrates a single atomic unit per attempt: lock the voucher row,
//! count today's ledger rows, evaluate, then either commit (increment plus
//! ledger append) or drop the lock with nothing mutated. Per-voucher
//! serialization comes entirely from the row lock; transient lock timeouts
//! are retried with backoff before surfacing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::Amount;
use crate::model::{Redemption, Voucher};
use crate::store::{LockError, MemoryStore, RedemptionTxn};

mod rules;
pub use rules::{DiscountGrant, evaluate, grant};

mod error;
pub use error::{RedeemError, RejectReason};

/// Bounds on lock acquisition and retry for one redemption attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// How long one lock acquisition may wait before counting as contended.
    pub lock_timeout: Duration,
    /// Total acquisition attempts before giving up.
    pub attempts: u32,
    /// Base backoff between attempts; grows linearly with the attempt
    /// number.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(1000),
            attempts: 3,
            backoff: Duration::from_millis(25),
        }
    }
}

/// One redemption attempt as submitted by a caller.
#[derive(Debug, Clone, Default)]
pub struct RedeemRequest {
    pub customer_id: Option<String>,
    pub transaction_amount: Option<Amount>,
    pub metadata: serde_json::Value,
}

/// A committed redemption: the granted discount and the ledger row.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub grant: DiscountGrant,
    pub redemption: Redemption,
}

/// The redemption coordinator.
pub struct Engine {
    store: Arc<MemoryStore>,
    retry: RetryPolicy,
}

/// Public API
impl Engine {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self::with_policy(store, RetryPolicy::default())
    }

    pub fn with_policy(store: Arc<MemoryStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Redeem `code` once. On success the counter increment and the ledger
    /// row commit together; on rejection nothing is mutated.
    pub async fn redeem(
        &self,
        code: &str,
        request: RedeemRequest,
        now: DateTime<Utc>,
    ) -> Result<Receipt, RedeemError> {
        let customer = request.customer_id.clone();
        let result = self.redeem_locked(code, request, now).await;
        Self::log_outcome(code, customer.as_deref(), &result);
        result
    }

    /// Read-only probe: the voucher snapshot plus the evaluation verdict.
    /// Takes no long-lived lock and never mutates.
    pub async fn probe(
        &self,
        code: &str,
        customer_id: Option<&str>,
        transaction_amount: Option<Amount>,
        now: DateTime<Utc>,
    ) -> Option<(Voucher, Result<DiscountGrant, RejectReason>)> {
        let voucher = self.store.get(code).await?;
        let (start, end) = crate::model::day_window(now);
        let todays = self
            .store
            .count_redemptions_in_window(voucher.id, start, end)
            .await;
        let outcome = evaluate(&voucher, customer_id, now, todays, transaction_amount);
        Some((voucher, outcome))
    }

    /// Like [`probe`](Self::probe) but collapsing the miss and reject cases
    /// into [`RedeemError`], for callers that only care about a passing
    /// voucher.
    pub async fn validate(
        &self,
        code: &str,
        customer_id: Option<&str>,
        transaction_amount: Option<Amount>,
        now: DateTime<Utc>,
    ) -> Result<(Voucher, DiscountGrant), RedeemError> {
        match self.probe(code, customer_id, transaction_amount, now).await {
            None => Err(RejectReason::NotFound.into()),
            Some((voucher, Ok(grant))) => Ok((voucher, grant)),
            Some((_, Err(reason))) => Err(reason.into()),
        }
    }
}

/// Private API
impl Engine {
    async fn redeem_locked(
        &self,
        code: &str,
        request: RedeemRequest,
        now: DateTime<Utc>,
    ) -> Result<Receipt, RedeemError> {
        let Some(txn) = self.lock_row(code).await? else {
            return Err(RejectReason::NotFound.into());
        };

        let todays = txn.todays_count(now).await;
        let grant = evaluate(
            txn.voucher(),
            request.customer_id.as_deref(),
            now,
            todays,
            request.transaction_amount,
        )?; // rejection drops the guard: rollback

        let redemption = txn
            .commit(request.customer_id, grant.descriptor, request.metadata, now)
            .await;
        Ok(Receipt { grant, redemption })
    }

    /// Acquire the row lock, retrying transient timeouts per the policy.
    async fn lock_row(&self, code: &str) -> Result<Option<RedemptionTxn<'_>>, RedeemError> {
        let mut attempt = 0;
        loop {
            match self
                .store
                .begin_redemption(code, self.retry.lock_timeout)
                .await
            {
                Ok(row) => return Ok(row),
                Err(LockError::Timeout) => {
                    attempt += 1;
                    if attempt >= self.retry.attempts {
                        return Err(RedeemError::Contended);
                    }
                    warn!(code, attempt, "row lock timed out, backing off");
                    tokio::time::sleep(self.retry.backoff * attempt).await;
                }
            }
        }
    }

    /// Small helper to log redemption outcomes
    fn log_outcome(code: &str, customer: Option<&str>, result: &Result<Receipt, RedeemError>) {
        match result {
            Ok(receipt) => {
                info!(
                    code,
                    customer,
                    redemption = receipt.redemption.id,
                    "redeem applied"
                );
            }
            Err(RedeemError::Rejected(reason)) => {
                info!(code, customer, reason = %reason, "redeem rejected");
            }
            Err(RedeemError::Contended) => {
                warn!(code, customer, "redeem abandoned: lock retries exhausted");
            }
        }
    }
}
