//! Core domain types for the voucher engine.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::Amount;

/// Stable internal voucher identifier.
pub type VoucherId = Uuid;

/// Auto-increment ledger row identifier.
pub type RedemptionId = u64;

/// Invalid voucher input on create or update.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum VoucherError {
    #[error("Voucher name is required")]
    MissingName,
    #[error("Voucher code is required")]
    MissingCode,
    #[error("Invalid amount off value")]
    InvalidAmountOff,
    #[error("Invalid percentage off value")]
    InvalidPercentOff,
    #[error("Invalid discount limit value")]
    InvalidAmountLimit,
    #[error("Invalid redemption quantity")]
    InvalidQuantity,
    #[error("Invalid daily quota")]
    InvalidDailyQuota,
    #[error("Daily quota cannot be greater than total quantity")]
    QuotaAboveQuantity,
    #[error("Expiration date must be after start date")]
    ExpirationBeforeStart,
    #[error("Redemption quantity cannot be lowered below the redeemed count")]
    QuantityBelowRedeemed,
    #[error("A voucher with this code already exists")]
    DuplicateCode,
}

/// Discount descriptor: how much is discounted, and an optional cap on the
/// computed value.
///
/// The cap is only applied to `Percentage` discounts; `FixedAmount` carries
/// the field for a uniform wire shape but the engine never applies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Discount {
    #[serde(rename = "FIXED_AMOUNT")]
    FixedAmount {
        amount_off: Amount,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount_limit: Option<Amount>,
    },
    #[serde(rename = "PERCENTAGE")]
    Percentage {
        percent_off: Amount,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount_limit: Option<Amount>,
    },
}

impl Discount {
    pub fn validate(&self) -> Result<(), VoucherError> {
        let limit = match *self {
            Discount::FixedAmount {
                amount_off,
                amount_limit,
            } => {
                if !amount_off.is_positive() {
                    return Err(VoucherError::InvalidAmountOff);
                }
                amount_limit
            }
            Discount::Percentage {
                percent_off,
                amount_limit,
            } => {
                if !percent_off.is_positive() || percent_off > Amount::from_float(100.0) {
                    return Err(VoucherError::InvalidPercentOff);
                }
                amount_limit
            }
        };

        if let Some(limit) = limit {
            if !limit.is_positive() {
                return Err(VoucherError::InvalidAmountLimit);
            }
        }

        Ok(())
    }
}

/// Aggregate and per-day redemption limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RedemptionLimits {
    pub quantity: u32,
    pub daily_quota: u32,
}

/// A discount offer identified by a unique, case-sensitive code.
#[derive(Debug, Clone)]
pub struct Voucher {
    pub id: VoucherId,
    pub code: String,
    pub name: String,
    pub active: bool,
    pub discount: Discount,
    pub starts_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub max_redemptions: u32,
    pub daily_quota: u32,
    pub customer_id: Option<String>,
    /// Mutated only by the redemption transaction; never exceeds
    /// `max_redemptions`.
    pub redeemed_count: u32,
}

impl Voucher {
    /// Re-check every creation constraint against the current field values.
    pub fn validate(&self) -> Result<(), VoucherError> {
        if self.name.trim().is_empty() {
            return Err(VoucherError::MissingName);
        }
        if self.code.trim().is_empty() {
            return Err(VoucherError::MissingCode);
        }
        self.discount.validate()?;
        if self.max_redemptions == 0 {
            return Err(VoucherError::InvalidQuantity);
        }
        if self.daily_quota == 0 {
            return Err(VoucherError::InvalidDailyQuota);
        }
        if self.daily_quota > self.max_redemptions {
            return Err(VoucherError::QuotaAboveQuantity);
        }
        if self.expires_at <= self.starts_at {
            return Err(VoucherError::ExpirationBeforeStart);
        }
        if self.redeemed_count > self.max_redemptions {
            return Err(VoucherError::QuantityBelowRedeemed);
        }
        Ok(())
    }

    /// Apply an administrative edit, rejecting any combination that breaks a
    /// creation constraint or the stored `redeemed_count` invariant.
    ///
    /// On rejection the receiver may hold partially applied fields; callers
    /// that must stay consistent edit a copy and write back on success.
    pub fn apply_update(&mut self, update: VoucherUpdate) -> Result<(), VoucherError> {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(discount) = update.discount {
            self.discount = discount;
        }
        if let Some(limits) = update.redemption {
            self.max_redemptions = limits.quantity;
            self.daily_quota = limits.daily_quota;
        }
        if let Some(starts_at) = update.start_date {
            self.starts_at = starts_at;
        }
        if let Some(expires_at) = update.expiration_date {
            self.expires_at = expires_at;
        }
        if let Some(active) = update.is_active {
            self.active = active;
        }
        if let Some(customer_id) = update.customer_id {
            self.customer_id = customer_id;
        }
        self.validate()
    }
}

/// Input for voucher creation, in the wire field names.
#[derive(Debug, Clone, Deserialize)]
pub struct NewVoucher {
    pub name: String,
    pub code: String,
    pub discount: Discount,
    pub redemption: RedemptionLimits,
    pub start_date: DateTime<Utc>,
    pub expiration_date: DateTime<Utc>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub customer_id: Option<String>,
}

fn default_active() -> bool {
    true
}

impl NewVoucher {
    /// Validate and mint the voucher with a fresh id and a zero count.
    pub fn into_voucher(self) -> Result<Voucher, VoucherError> {
        let voucher = Voucher {
            id: Uuid::new_v4(),
            code: self.code,
            name: self.name,
            active: self.is_active,
            discount: self.discount,
            starts_at: self.start_date,
            expires_at: self.expiration_date,
            max_redemptions: self.redemption.quantity,
            daily_quota: self.redemption.daily_quota,
            customer_id: self.customer_id,
            redeemed_count: 0,
        };
        voucher.validate()?;
        Ok(voucher)
    }
}

/// Field-wise administrative edit; absent fields are left untouched.
///
/// `customer_id` distinguishes "absent" (keep) from `null` (clear the
/// restriction).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VoucherUpdate {
    pub name: Option<String>,
    pub discount: Option<Discount>,
    pub redemption: Option<RedemptionLimits>,
    pub start_date: Option<DateTime<Utc>>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub customer_id: Option<Option<String>>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

/// One successful redemption, recorded immutably in the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct Redemption {
    pub id: RedemptionId,
    pub voucher_id: VoucherId,
    pub customer_id: Option<String>,
    /// Snapshot of the descriptor that was applied.
    pub discount: Discount,
    pub redeemed_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// Pagination window for listing endpoints.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Page {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_page() -> usize {
    1
}

fn default_limit() -> usize {
    10
}

impl Default for Page {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
        }
    }
}

impl Page {
    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }
}

/// The UTC calendar-day window `[start_of_day, start_of_day + 24h)`
/// containing `now`, used for the daily-quota count.
pub fn day_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}
