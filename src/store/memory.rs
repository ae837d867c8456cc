use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::model::{
    Discount, Page, Redemption, Voucher, VoucherError, VoucherId, VoucherUpdate, day_window,
};

use super::LockError;

/// In-process voucher store with per-row exclusive locks and an append-only
/// redemption ledger bucketed by voucher (the lookup shape the daily-quota
/// count needs).
pub struct MemoryStore {
    rows: RwLock<HashMap<String, Arc<Mutex<Voucher>>>>,
    ledger: RwLock<HashMap<VoucherId, Vec<Redemption>>>,
    next_redemption_id: AtomicU64,
}

/// Filters for redemption history queries.
#[derive(Debug, Clone, Default)]
pub struct RedemptionFilter {
    pub voucher_id: Option<VoucherId>,
    pub customer_id: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            ledger: RwLock::new(HashMap::new()),
            next_redemption_id: AtomicU64::new(0),
        }
    }

    /// Insert a new voucher row. The code must be unused.
    pub async fn insert(&self, voucher: Voucher) -> Result<Voucher, VoucherError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&voucher.code) {
            return Err(VoucherError::DuplicateCode);
        }
        rows.insert(voucher.code.clone(), Arc::new(Mutex::new(voucher.clone())));
        Ok(voucher)
    }

    /// Clone the current row state for a code, if present.
    pub async fn get(&self, code: &str) -> Option<Voucher> {
        let row = self.row(code).await?;
        Some(row.lock().await.clone())
    }

    /// Active vouchers, optionally filtered by customer restriction, ordered
    /// by code. Returns the requested page and the total matching count.
    pub async fn list(&self, customer_id: Option<&str>, page: Page) -> (Vec<Voucher>, usize) {
        let rows: Vec<_> = self.rows.read().await.values().cloned().collect();

        let mut matching = Vec::new();
        for row in rows {
            let voucher = row.lock().await;
            if !voucher.active {
                continue;
            }
            if let Some(customer) = customer_id {
                if voucher.customer_id.as_deref() != Some(customer) {
                    continue;
                }
            }
            matching.push(voucher.clone());
        }
        matching.sort_by(|a, b| a.code.cmp(&b.code));

        let total = matching.len();
        let page_rows = matching
            .into_iter()
            .skip(page.offset())
            .take(page.limit)
            .collect();
        (page_rows, total)
    }

    /// Apply an administrative edit under the row lock. `Ok(None)` when the
    /// code is unknown.
    pub async fn update(
        &self,
        code: &str,
        update: VoucherUpdate,
    ) -> Result<Option<Voucher>, VoucherError> {
        let Some(row) = self.row(code).await else {
            return Ok(None);
        };
        let mut voucher = row.lock().await;

        // edit a copy so a rejected update leaves the live row untouched
        let mut updated = voucher.clone();
        updated.apply_update(update)?;
        *voucher = updated.clone();
        Ok(Some(updated))
    }

    /// Delete a voucher and cascade its ledger rows.
    ///
    /// The row is unlinked first and then its lock is awaited, so an
    /// in-flight redemption finishes (and its ledger row is swept up by the
    /// cascade) before the delete returns.
    pub async fn remove(&self, code: &str) -> Option<Voucher> {
        let row = self.rows.write().await.remove(code)?;
        let voucher = row.lock().await.clone();
        self.ledger.write().await.remove(&voucher.id);
        Some(voucher)
    }

    /// Acquire the exclusive row lock for a redemption attempt.
    ///
    /// `Ok(None)` when the code is unknown; `Err` when the lock could not be
    /// acquired within `timeout`.
    pub async fn begin_redemption(
        &self,
        code: &str,
        timeout: Duration,
    ) -> Result<Option<RedemptionTxn<'_>>, LockError> {
        let Some(row) = self.row(code).await else {
            return Ok(None);
        };
        let guard = tokio::time::timeout(timeout, row.lock_owned())
            .await
            .map_err(|_| LockError::Timeout)?;
        Ok(Some(RedemptionTxn { store: self, guard }))
    }

    /// Committed ledger rows for a voucher with `start <= redeemed_at < end`.
    pub async fn count_redemptions_in_window(
        &self,
        voucher_id: VoucherId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> usize {
        self.ledger
            .read()
            .await
            .get(&voucher_id)
            .map_or(0, |bucket| {
                bucket
                    .iter()
                    .filter(|r| r.redeemed_at >= start && r.redeemed_at < end)
                    .count()
            })
    }

    /// Redemption history, newest first.
    pub async fn redemptions(
        &self,
        filter: &RedemptionFilter,
        page: Page,
    ) -> (Vec<Redemption>, usize) {
        let ledger = self.ledger.read().await;

        let mut matching: Vec<Redemption> = match filter.voucher_id {
            Some(id) => ledger.get(&id).cloned().unwrap_or_default(),
            None => ledger.values().flatten().cloned().collect(),
        };
        if let Some(customer) = filter.customer_id.as_deref() {
            matching.retain(|r| r.customer_id.as_deref() == Some(customer));
        }
        matching.sort_by(|a, b| b.redeemed_at.cmp(&a.redeemed_at).then(b.id.cmp(&a.id)));

        let total = matching.len();
        let page_rows = matching
            .into_iter()
            .skip(page.offset())
            .take(page.limit)
            .collect();
        (page_rows, total)
    }

    /// Deactivate vouchers whose expiration has passed. Advisory: the
    /// validation path checks expiry on its own, so a delayed sweep only
    /// affects listings.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let rows: Vec<_> = self.rows.read().await.values().cloned().collect();

        let mut deactivated = 0;
        for row in rows {
            let mut voucher = row.lock().await;
            if voucher.active && voucher.expires_at < now {
                voucher.active = false;
                deactivated += 1;
            }
        }
        deactivated
    }

    async fn row(&self, code: &str) -> Option<Arc<Mutex<Voucher>>> {
        self.rows.read().await.get(code).cloned()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// One redemption transaction: constructed with the row lock held, it is the
/// only path that mutates `redeemed_count` or appends ledger rows.
///
/// Dropping the guard without [`commit`](RedemptionTxn::commit) is rollback:
/// nothing was mutated yet, so a rejected or cancelled attempt leaves no
/// trace.
pub struct RedemptionTxn<'a> {
    store: &'a MemoryStore,
    guard: OwnedMutexGuard<Voucher>,
}

impl RedemptionTxn<'_> {
    /// The locked row snapshot.
    pub fn voucher(&self) -> &Voucher {
        &self.guard
    }

    /// Ledger rows for this voucher committed within the UTC day containing
    /// `now`. Counted under the row lock, so the value cannot be raced by
    /// another redemption of the same voucher.
    pub async fn todays_count(&self, now: DateTime<Utc>) -> usize {
        let (start, end) = day_window(now);
        self.store
            .count_redemptions_in_window(self.guard.id, start, end)
            .await
    }

    /// Commit: increment the counter and append the ledger row.
    ///
    /// The ledger write lock is taken before any mutation, making the
    /// increment-plus-append a single uninterruptible section; a caller
    /// cancelled before this point has changed nothing.
    pub async fn commit(
        mut self,
        customer_id: Option<String>,
        descriptor: Discount,
        metadata: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Redemption {
        let mut ledger = self.store.ledger.write().await;

        self.guard.redeemed_count += 1;
        let id = self.store.next_redemption_id.fetch_add(1, Ordering::Relaxed) + 1;
        let redemption = Redemption {
            id,
            voucher_id: self.guard.id,
            customer_id,
            discount: descriptor,
            redeemed_at: now,
            metadata,
        };
        ledger
            .entry(self.guard.id)
            .or_default()
            .push(redemption.clone());
        redemption
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Amount;
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    fn voucher(code: &str) -> Voucher {
        let now = Utc::now();
        Voucher {
            id: Uuid::new_v4(),
            code: code.into(),
            name: "Test".into(),
            active: true,
            discount: Discount::FixedAmount {
                amount_off: Amount::from_float(10.0),
                amount_limit: None,
            },
            starts_at: now - ChronoDuration::days(1),
            expires_at: now + ChronoDuration::days(1),
            max_redemptions: 10,
            daily_quota: 10,
            customer_id: None,
            redeemed_count: 0,
        }
    }

    const LOCK_TIMEOUT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn insert_rejects_duplicate_code() {
        let store = MemoryStore::new();
        store.insert(voucher("DUP")).await.unwrap();
        assert_eq!(
            store.insert(voucher("DUP")).await.unwrap_err(),
            VoucherError::DuplicateCode
        );
    }

    #[tokio::test]
    async fn get_is_case_sensitive() {
        let store = MemoryStore::new();
        store.insert(voucher("Code")).await.unwrap();
        assert!(store.get("Code").await.is_some());
        assert!(store.get("CODE").await.is_none());
        assert!(store.get("code").await.is_none());
    }

    #[tokio::test]
    async fn commit_increments_and_appends() {
        let store = MemoryStore::new();
        let v = store.insert(voucher("C")).await.unwrap();
        let now = Utc::now();

        let txn = store
            .begin_redemption("C", LOCK_TIMEOUT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(txn.todays_count(now).await, 0);
        let redemption = txn
            .commit(Some("cust-1".into()), v.discount, serde_json::json!({}), now)
            .await;

        assert_eq!(redemption.id, 1);
        assert_eq!(redemption.voucher_id, v.id);
        assert_eq!(store.get("C").await.unwrap().redeemed_count, 1);
        let (start, end) = day_window(now);
        assert_eq!(store.count_redemptions_in_window(v.id, start, end).await, 1);
    }

    #[tokio::test]
    async fn dropping_txn_rolls_back() {
        let store = MemoryStore::new();
        store.insert(voucher("C")).await.unwrap();

        let txn = store
            .begin_redemption("C", LOCK_TIMEOUT)
            .await
            .unwrap()
            .unwrap();
        drop(txn);

        let v = store.get("C").await.unwrap();
        assert_eq!(v.redeemed_count, 0);
        let (start, end) = day_window(Utc::now());
        assert_eq!(store.count_redemptions_in_window(v.id, start, end).await, 0);
    }

    #[tokio::test]
    async fn row_lock_is_exclusive() {
        let store = MemoryStore::new();
        store.insert(voucher("C")).await.unwrap();

        let held = store
            .begin_redemption("C", LOCK_TIMEOUT)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            store.begin_redemption("C", LOCK_TIMEOUT).await,
            Err(LockError::Timeout)
        ));
        drop(held);

        // released: the next acquisition succeeds
        assert!(
            store
                .begin_redemption("C", LOCK_TIMEOUT)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn different_codes_do_not_contend() {
        let store = MemoryStore::new();
        store.insert(voucher("A")).await.unwrap();
        store.insert(voucher("B")).await.unwrap();

        let _a = store
            .begin_redemption("A", LOCK_TIMEOUT)
            .await
            .unwrap()
            .unwrap();
        assert!(
            store
                .begin_redemption("B", LOCK_TIMEOUT)
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn begin_redemption_missing_code_is_none() {
        let store = MemoryStore::new();
        assert!(
            store
                .begin_redemption("NOPE", LOCK_TIMEOUT)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn window_count_excludes_other_days() {
        let store = MemoryStore::new();
        let v = store.insert(voucher("C")).await.unwrap();

        let yesterday = Utc::now() - ChronoDuration::days(1);
        let txn = store
            .begin_redemption("C", LOCK_TIMEOUT)
            .await
            .unwrap()
            .unwrap();
        txn.commit(None, v.discount, serde_json::Value::Null, yesterday)
            .await;

        let txn = store
            .begin_redemption("C", LOCK_TIMEOUT)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(txn.todays_count(Utc::now()).await, 0);
        assert_eq!(txn.todays_count(yesterday).await, 1);
    }

    #[tokio::test]
    async fn remove_cascades_ledger() {
        let store = MemoryStore::new();
        let v = store.insert(voucher("C")).await.unwrap();

        let txn = store
            .begin_redemption("C", LOCK_TIMEOUT)
            .await
            .unwrap()
            .unwrap();
        txn.commit(None, v.discount, serde_json::Value::Null, Utc::now())
            .await;

        assert!(store.remove("C").await.is_some());
        assert!(store.get("C").await.is_none());
        let (rows, total) = store
            .redemptions(&RedemptionFilter::default(), Page::default())
            .await;
        assert!(rows.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn remove_waits_for_in_flight_redemption() {
        let store = Arc::new(MemoryStore::new());
        let v = store.insert(voucher("C")).await.unwrap();

        let txn = store
            .begin_redemption("C", LOCK_TIMEOUT)
            .await
            .unwrap()
            .unwrap();

        let store2 = Arc::clone(&store);
        let deleter = tokio::spawn(async move { store2.remove("C").await });

        // the delete cannot finish while the row lock is held
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!deleter.is_finished());

        txn.commit(None, v.discount, serde_json::Value::Null, Utc::now())
            .await;
        let removed = deleter.await.unwrap().unwrap();
        assert_eq!(removed.redeemed_count, 1);

        // cascade swept the committed row too
        let (rows, _) = store
            .redemptions(&RedemptionFilter::default(), Page::default())
            .await;
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn list_filters_inactive_and_paginates() {
        let store = MemoryStore::new();
        for code in ["A", "B", "C"] {
            store.insert(voucher(code)).await.unwrap();
        }
        let mut inactive = voucher("D");
        inactive.active = false;
        store.insert(inactive).await.unwrap();

        let (rows, total) = store.list(None, Page { page: 1, limit: 2 }).await;
        assert_eq!(total, 3);
        let codes: Vec<_> = rows.iter().map(|v| v.code.as_str()).collect();
        assert_eq!(codes, ["A", "B"]);

        let (rows, _) = store.list(None, Page { page: 2, limit: 2 }).await;
        let codes: Vec<_> = rows.iter().map(|v| v.code.as_str()).collect();
        assert_eq!(codes, ["C"]);
    }

    #[tokio::test]
    async fn list_filters_by_customer_restriction() {
        let store = MemoryStore::new();
        let mut restricted = voucher("R");
        restricted.customer_id = Some("cust-1".into());
        store.insert(restricted).await.unwrap();
        store.insert(voucher("OPEN")).await.unwrap();

        let (rows, total) = store.list(Some("cust-1"), Page::default()).await;
        assert_eq!(total, 1);
        assert_eq!(rows[0].code, "R");
    }

    #[tokio::test]
    async fn update_revalidates_under_lock() {
        let store = MemoryStore::new();
        store.insert(voucher("C")).await.unwrap();

        let err = store
            .update(
                "C",
                VoucherUpdate {
                    redemption: Some(crate::model::RedemptionLimits {
                        quantity: 5,
                        daily_quota: 6,
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, VoucherError::QuotaAboveQuantity);

        // the rejected edit did not leak into the row
        let unchanged = store.get("C").await.unwrap();
        assert_eq!(unchanged.max_redemptions, 10);
        assert_eq!(unchanged.daily_quota, 10);

        // unknown code is not an error, just absent
        assert!(
            store
                .update("NOPE", VoucherUpdate::default())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn sweep_deactivates_only_expired_active_rows() {
        let store = MemoryStore::new();
        let mut expired = voucher("EXPIRED");
        expired.expires_at = Utc::now() - ChronoDuration::hours(1);
        store.insert(expired).await.unwrap();
        store.insert(voucher("LIVE")).await.unwrap();

        assert_eq!(store.sweep_expired(Utc::now()).await, 1);
        assert!(!store.get("EXPIRED").await.unwrap().active);
        assert!(store.get("LIVE").await.unwrap().active);

        // idempotent
        assert_eq!(store.sweep_expired(Utc::now()).await, 0);
    }

    #[tokio::test]
    async fn history_filters_and_orders_newest_first() {
        let store = MemoryStore::new();
        let a = store.insert(voucher("A")).await.unwrap();
        let b = store.insert(voucher("B")).await.unwrap();
        let base = Utc::now();

        for (code, customer, offset) in [
            ("A", Some("cust-1"), 0),
            ("A", Some("cust-2"), 1),
            ("B", Some("cust-1"), 2),
        ] {
            let txn = store
                .begin_redemption(code, LOCK_TIMEOUT)
                .await
                .unwrap()
                .unwrap();
            let v = txn.voucher().discount;
            txn.commit(
                customer.map(String::from),
                v,
                serde_json::Value::Null,
                base + ChronoDuration::seconds(offset),
            )
            .await;
        }

        let (rows, total) = store
            .redemptions(&RedemptionFilter::default(), Page::default())
            .await;
        assert_eq!(total, 3);
        assert!(rows[0].redeemed_at > rows[2].redeemed_at);

        let (rows, total) = store
            .redemptions(
                &RedemptionFilter {
                    voucher_id: Some(a.id),
                    customer_id: None,
                },
                Page::default(),
            )
            .await;
        assert_eq!(total, 2);
        assert!(rows.iter().all(|r| r.voucher_id == a.id));

        let (rows, total) = store
            .redemptions(
                &RedemptionFilter {
                    voucher_id: None,
                    customer_id: Some("cust-1".into()),
                },
                Page::default(),
            )
            .await;
        assert_eq!(total, 2);
        assert!(rows.iter().any(|r| r.voucher_id == b.id));
    }
}
