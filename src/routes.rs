//! HTTP handlers and wire DTOs.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::Amount;
use crate::auth::require_token;
use crate::engine::{DiscountGrant, RedeemRequest};
use crate::error::ApiError;
use crate::model::{
    Discount, NewVoucher, Page, Redemption, RedemptionId, Voucher, VoucherId, VoucherUpdate,
};
use crate::state::AppState;
use crate::store::RedemptionFilter;

/// Build the full API router; every route sits behind bearer auth.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/vouchers", post(create_voucher).get(list_vouchers))
        .route("/vouchers/validate", post(validate_voucher))
        .route(
            "/vouchers/{code}",
            get(get_voucher).put(update_voucher).delete(delete_voucher),
        )
        .route("/vouchers/{code}/redeem", post(redeem_voucher))
        .route("/redemptions", get(redemption_history))
        .layer(middleware::from_fn_with_state(state.clone(), require_token))
        .with_state(state)
}

// ── wire shapes ──────────────────────────────────────────────────────

/// Voucher as returned to callers: nested discount and redemption objects.
#[derive(Debug, Serialize)]
struct VoucherPayload {
    id: VoucherId,
    name: String,
    code: String,
    discount: Discount,
    redemption: RedemptionCounts,
    start_date: DateTime<Utc>,
    expiration_date: DateTime<Utc>,
    is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct RedemptionCounts {
    quantity: u32,
    daily_quota: u32,
    redeemed_count: u32,
}

impl From<Voucher> for VoucherPayload {
    fn from(voucher: Voucher) -> Self {
        Self {
            id: voucher.id,
            name: voucher.name,
            code: voucher.code,
            discount: voucher.discount,
            redemption: RedemptionCounts {
                quantity: voucher.max_redemptions,
                daily_quota: voucher.daily_quota,
                redeemed_count: voucher.redeemed_count,
            },
            start_date: voucher.starts_at,
            expiration_date: voucher.expires_at,
            is_active: voucher.active,
            customer_id: voucher.customer_id,
        }
    }
}

/// Granted discount: the descriptor fields plus the computed value when one
/// could be computed.
#[derive(Debug, Serialize)]
struct DiscountPayload {
    #[serde(flatten)]
    descriptor: Discount,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<Amount>,
}

impl From<DiscountGrant> for DiscountPayload {
    fn from(grant: DiscountGrant) -> Self {
        Self {
            descriptor: grant.descriptor,
            value: grant.value,
        }
    }
}

#[derive(Debug, Serialize)]
struct Paginated<T> {
    data: Vec<T>,
    total: usize,
    page: usize,
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    page: Option<usize>,
    limit: Option<usize>,
    customer_id: Option<String>,
}

impl ListQuery {
    fn page(&self) -> Page {
        let defaults = Page::default();
        Page {
            page: self.page.unwrap_or(defaults.page).max(1),
            limit: self.limit.unwrap_or(defaults.limit).clamp(1, 100),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeQuery {
    customer_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    voucher_id: Option<VoucherId>,
    customer_id: Option<String>,
    page: Option<usize>,
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RedeemBody {
    #[serde(default)]
    customer_id: Option<String>,
    #[serde(default)]
    transaction_amount: Option<Amount>,
    #[serde(default)]
    metadata: Value,
}

#[derive(Debug, Deserialize)]
struct ValidateBody {
    code: String,
    #[serde(default)]
    customer_id: Option<String>,
    #[serde(default)]
    transaction_amount: Option<Amount>,
}

#[derive(Debug, Serialize)]
struct RedeemResponse {
    discount: DiscountPayload,
    redemption: RedemptionReceipt,
}

#[derive(Debug, Serialize)]
struct RedemptionReceipt {
    id: RedemptionId,
    redeemed_at: DateTime<Utc>,
}

// ── handlers ─────────────────────────────────────────────────────────

async fn create_voucher(
    State(state): State<AppState>,
    Json(new): Json<NewVoucher>,
) -> Result<impl IntoResponse, ApiError> {
    let voucher = new.into_voucher()?;
    let voucher = state.store.insert(voucher).await?;
    Ok((StatusCode::CREATED, Json(VoucherPayload::from(voucher))))
}

async fn list_vouchers(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = query.page();
    let (vouchers, total) = state.store.list(query.customer_id.as_deref(), page).await;
    Ok(Json(Paginated {
        data: vouchers.into_iter().map(VoucherPayload::from).collect(),
        total,
        page: page.page,
        limit: page.limit,
    }))
}

/// Voucher by code, with a read-only validity probe folded into the body.
async fn get_voucher(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<ProbeQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let Some((voucher, outcome)) = state
        .engine
        .probe(&code, query.customer_id.as_deref(), None, Utc::now())
        .await
    else {
        return Err(ApiError::NotFound);
    };

    let mut body =
        serde_json::to_value(VoucherPayload::from(voucher)).map_err(ApiError::internal)?;
    body["is_valid"] = json!(outcome.is_ok());
    if let Err(reason) = outcome {
        body["validation_error"] = json!(reason.to_string());
    }
    Ok(Json(body))
}

async fn update_voucher(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(update): Json<VoucherUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    match state.store.update(&code, update).await? {
        Some(voucher) => Ok(Json(VoucherPayload::from(voucher))),
        None => Err(ApiError::NotFound),
    }
}

async fn delete_voucher(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    match state.store.remove(&code).await {
        Some(_) => Ok(Json(json!({ "message": "Voucher deleted successfully" }))),
        None => Err(ApiError::NotFound),
    }
}

async fn redeem_voucher(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Json(body): Json<RedeemBody>,
) -> Result<impl IntoResponse, ApiError> {
    let receipt = state
        .engine
        .redeem(
            &code,
            RedeemRequest {
                customer_id: body.customer_id,
                transaction_amount: body.transaction_amount,
                metadata: body.metadata,
            },
            Utc::now(),
        )
        .await?;

    Ok(Json(RedeemResponse {
        discount: receipt.grant.into(),
        redemption: RedemptionReceipt {
            id: receipt.redemption.id,
            redeemed_at: receipt.redemption.redeemed_at,
        },
    }))
}

/// Read-only validation: same verdict as a redemption would get, no
/// mutation.
async fn validate_voucher(
    State(state): State<AppState>,
    Json(body): Json<ValidateBody>,
) -> Result<impl IntoResponse, ApiError> {
    let (voucher, grant) = state
        .engine
        .validate(
            &body.code,
            body.customer_id.as_deref(),
            body.transaction_amount,
            Utc::now(),
        )
        .await?;

    Ok(Json(json!({
        "valid": true,
        "code": voucher.code,
        "discount": DiscountPayload::from(grant),
    })))
}

async fn redemption_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = ListQuery {
        page: query.page,
        limit: query.limit,
        customer_id: None,
    }
    .page();
    let filter = RedemptionFilter {
        voucher_id: query.voucher_id,
        customer_id: query.customer_id,
    };
    let (rows, total) = state.store.redemptions(&filter, page).await;
    Ok(Json(Paginated::<Redemption> {
        data: rows,
        total,
        page: page.page,
        limit: page.limit,
    }))
}
