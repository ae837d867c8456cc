//! Pure accept/reject evaluation and discount computation.
//!
//! No I/O happens here; the coordinator feeds in a locked snapshot and
//! today's ledger count, and acts on the verdict.

use chrono::{DateTime, Utc};

use crate::Amount;
use crate::model::{Discount, Voucher};

use super::error::RejectReason;

/// The outcome of an accepted attempt: the descriptor that applies, plus the
/// computed discount value when a transaction amount was supplied (always
/// present for fixed-amount discounts).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscountGrant {
    pub descriptor: Discount,
    pub value: Option<Amount>,
}

/// Evaluate one redemption attempt against a voucher snapshot.
///
/// Checks run in a fixed order and the first failure wins, so concurrent
/// callers racing the same voucher observe deterministic reasons. The
/// caller maps a missing voucher to [`RejectReason::NotFound`] before ever
/// reaching this function.
pub fn evaluate(
    voucher: &Voucher,
    customer_id: Option<&str>,
    now: DateTime<Utc>,
    todays_count: usize,
    transaction_amount: Option<Amount>,
) -> Result<DiscountGrant, RejectReason> {
    if !voucher.active {
        return Err(RejectReason::Inactive);
    }

    if let Some(restriction) = voucher.customer_id.as_deref() {
        match customer_id {
            Some(requested) if requested != restriction => {
                return Err(RejectReason::CustomerMismatch);
            }
            None => return Err(RejectReason::CustomerIdRequired),
            Some(_) => {}
        }
    }

    if now > voucher.expires_at {
        return Err(RejectReason::Expired);
    }

    if now < voucher.starts_at {
        return Err(RejectReason::NotYetActive);
    }

    if voucher.redeemed_count >= voucher.max_redemptions {
        return Err(RejectReason::RedemptionLimitReached);
    }

    if todays_count >= voucher.daily_quota as usize {
        return Err(RejectReason::DailyQuotaExceeded);
    }

    Ok(grant(voucher.discount, transaction_amount))
}

/// Compute the discount for a passing attempt.
///
/// Fixed amounts apply verbatim. Percentages need a transaction amount to
/// produce a value; the cap bounds the computed value, and only applies to
/// percentage discounts.
pub fn grant(descriptor: Discount, transaction_amount: Option<Amount>) -> DiscountGrant {
    let value = match descriptor {
        Discount::FixedAmount { amount_off, .. } => Some(amount_off),
        Discount::Percentage {
            percent_off,
            amount_limit,
        } => transaction_amount.map(|total| {
            let raw = total.percent_of(percent_off);
            match amount_limit {
                Some(cap) => raw.min(cap),
                None => raw,
            }
        }),
    };
    DiscountGrant { descriptor, value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn base_voucher() -> Voucher {
        let now = Utc::now();
        Voucher {
            id: Uuid::new_v4(),
            code: "WELCOME2024".into(),
            name: "Welcome offer".into(),
            active: true,
            discount: Discount::Percentage {
                percent_off: Amount::from_float(20.0),
                amount_limit: None,
            },
            starts_at: now - Duration::days(1),
            expires_at: now + Duration::days(30),
            max_redemptions: 100,
            daily_quota: 10,
            customer_id: None,
            redeemed_count: 0,
        }
    }

    fn eval(voucher: &Voucher) -> Result<DiscountGrant, RejectReason> {
        evaluate(voucher, None, Utc::now(), 0, None)
    }

    #[test]
    fn passing_voucher_grants_descriptor() {
        let voucher = base_voucher();
        let grant = eval(&voucher).unwrap();
        assert_eq!(grant.descriptor, voucher.discount);
        assert_eq!(grant.value, None); // no cart total supplied
    }

    #[test]
    fn inactive_rejected() {
        let mut voucher = base_voucher();
        voucher.active = false;
        assert_eq!(eval(&voucher), Err(RejectReason::Inactive));
    }

    #[test]
    fn inactive_wins_over_later_checks() {
        // inactive AND expired AND exhausted: the first check in order wins
        let mut voucher = base_voucher();
        voucher.active = false;
        voucher.expires_at = Utc::now() - Duration::days(1);
        voucher.redeemed_count = voucher.max_redemptions;
        assert_eq!(eval(&voucher), Err(RejectReason::Inactive));
    }

    #[test]
    fn restricted_voucher_rejects_other_customer() {
        let mut voucher = base_voucher();
        voucher.customer_id = Some("cust-1".into());
        assert_eq!(
            evaluate(&voucher, Some("cust-2"), Utc::now(), 0, None),
            Err(RejectReason::CustomerMismatch)
        );
    }

    #[test]
    fn restricted_voucher_requires_customer_id() {
        let mut voucher = base_voucher();
        voucher.customer_id = Some("cust-1".into());
        assert_eq!(
            evaluate(&voucher, None, Utc::now(), 0, None),
            Err(RejectReason::CustomerIdRequired)
        );
    }

    #[test]
    fn restricted_voucher_accepts_matching_customer() {
        let mut voucher = base_voucher();
        voucher.customer_id = Some("cust-1".into());
        assert!(evaluate(&voucher, Some("cust-1"), Utc::now(), 0, None).is_ok());
    }

    #[test]
    fn customer_check_precedes_expiry() {
        let mut voucher = base_voucher();
        voucher.customer_id = Some("cust-1".into());
        voucher.expires_at = Utc::now() - Duration::hours(1);
        assert_eq!(
            evaluate(&voucher, Some("cust-2"), Utc::now(), 0, None),
            Err(RejectReason::CustomerMismatch)
        );
    }

    #[test]
    fn expired_rejected() {
        let mut voucher = base_voucher();
        voucher.expires_at = Utc::now() - Duration::hours(1);
        assert_eq!(eval(&voucher), Err(RejectReason::Expired));
    }

    #[test]
    fn not_yet_active_rejected() {
        let mut voucher = base_voucher();
        voucher.starts_at = Utc::now() + Duration::hours(1);
        assert_eq!(eval(&voucher), Err(RejectReason::NotYetActive));
    }

    #[test]
    fn expiry_checked_before_start() {
        // inverted snapshot where now is both before start and after expiry
        let mut voucher = base_voucher();
        voucher.starts_at = Utc::now() + Duration::hours(1);
        voucher.expires_at = Utc::now() - Duration::hours(1);
        assert_eq!(eval(&voucher), Err(RejectReason::Expired));
    }

    #[test]
    fn exhausted_voucher_rejected() {
        let mut voucher = base_voucher();
        voucher.redeemed_count = voucher.max_redemptions;
        assert_eq!(eval(&voucher), Err(RejectReason::RedemptionLimitReached));
    }

    #[test]
    fn daily_quota_rejected_at_boundary() {
        let voucher = base_voucher();
        assert_eq!(
            evaluate(&voucher, None, Utc::now(), voucher.daily_quota as usize, None),
            Err(RejectReason::DailyQuotaExceeded)
        );
        assert!(
            evaluate(
                &voucher,
                None,
                Utc::now(),
                voucher.daily_quota as usize - 1,
                None
            )
            .is_ok()
        );
    }

    #[test]
    fn limit_checked_before_daily_quota() {
        let mut voucher = base_voucher();
        voucher.redeemed_count = voucher.max_redemptions;
        assert_eq!(
            evaluate(&voucher, None, Utc::now(), voucher.daily_quota as usize, None),
            Err(RejectReason::RedemptionLimitReached)
        );
    }

    // discount computation

    #[test]
    fn fixed_amount_applies_verbatim() {
        let descriptor = Discount::FixedAmount {
            amount_off: Amount::from_float(15.0),
            amount_limit: None,
        };
        let grant = grant(descriptor, None);
        assert_eq!(grant.value, Some(Amount::from_float(15.0)));
    }

    #[test]
    fn fixed_amount_ignores_cap() {
        let descriptor = Discount::FixedAmount {
            amount_off: Amount::from_float(15.0),
            amount_limit: Some(Amount::from_float(5.0)),
        };
        let grant = grant(descriptor, Some(Amount::from_float(1000.0)));
        assert_eq!(grant.value, Some(Amount::from_float(15.0)));
    }

    #[test]
    fn percentage_without_total_is_descriptor_only() {
        let descriptor = Discount::Percentage {
            percent_off: Amount::from_float(20.0),
            amount_limit: None,
        };
        let grant = grant(descriptor, None);
        assert_eq!(grant.value, None);
        assert_eq!(grant.descriptor, descriptor);
    }

    #[test]
    fn percentage_computes_from_total() {
        let descriptor = Discount::Percentage {
            percent_off: Amount::from_float(20.0),
            amount_limit: None,
        };
        let grant = grant(descriptor, Some(Amount::from_float(150.0)));
        assert_eq!(grant.value, Some(Amount::from_float(30.0)));
    }

    #[test]
    fn percentage_cap_bounds_computed_value() {
        // 25% of 3000 = 750, capped at 500
        let descriptor = Discount::Percentage {
            percent_off: Amount::from_float(25.0),
            amount_limit: Some(Amount::from_float(500.0)),
        };
        let grant = grant(descriptor, Some(Amount::from_float(3000.0)));
        assert_eq!(grant.value, Some(Amount::from_float(500.0)));
    }

    #[test]
    fn percentage_cap_inert_below_threshold() {
        let descriptor = Discount::Percentage {
            percent_off: Amount::from_float(25.0),
            amount_limit: Some(Amount::from_float(500.0)),
        };
        let grant = grant(descriptor, Some(Amount::from_float(100.0)));
        assert_eq!(grant.value, Some(Amount::from_float(25.0)));
    }
}
