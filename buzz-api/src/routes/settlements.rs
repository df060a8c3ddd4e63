//! Settlement requests and the admin approval workflow

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use buzz_core::business::BusinessDirectory;
use buzz_core::coupon::CouponRepository;
use buzz_core::mileage::MileageRepository;
use buzz_core::settlement::{
    BankInfo, SettlementRepository, SettlementRequest, SettlementStatus, SettlementSummary,
};
use buzz_core::Error as CoreError;

use crate::error::{ApiError, ApiResult};
use crate::middleware::audit::{AuditEventType, AuditLogEntry};
use crate::middleware::auth::Role;
use crate::notify::{Notification, NotificationEvent};
use crate::routes::{pagination, require_admin};
use crate::state::AppState;

/// Oldest settlement date accepted relative to today
const MAX_SETTLEMENT_AGE_DAYS: i64 = 30;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankInfoBody {
    pub bank_name: String,
    pub bank_account: String,
    pub account_holder: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BankInfoView {
    pub bank_name: String,
    pub bank_account: String,
    pub account_holder: String,
}

impl From<BankInfo> for BankInfoView {
    fn from(info: BankInfo) -> Self {
        Self {
            bank_name: info.bank_name,
            bank_account: info.bank_account,
            account_holder: info.account_holder,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementView {
    pub id: Uuid,
    pub business_id: Uuid,
    pub settlement_date: NaiveDate,
    pub coupon_count: i64,
    pub coupon_amount: Decimal,
    pub mileage_count: i64,
    pub mileage_amount: Decimal,
    pub total_amount: Decimal,
    pub bank_info: BankInfoView,
    pub status: SettlementStatus,
    pub reject_reason: Option<String>,
    pub cancel_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub estimated_payment_date: NaiveDate,
}

impl From<SettlementRequest> for SettlementView {
    fn from(request: SettlementRequest) -> Self {
        Self {
            id: request.id,
            business_id: request.business_id,
            settlement_date: request.settlement_date,
            coupon_count: request.coupon_count,
            coupon_amount: request.coupon_amount,
            mileage_count: request.mileage_count,
            mileage_amount: request.mileage_amount,
            total_amount: request.total_amount,
            bank_info: BankInfoView::from(request.bank_info),
            status: request.status,
            reject_reason: request.reject_reason,
            cancel_reason: request.cancel_reason,
            requested_at: request.requested_at,
            decided_at: request.decided_at,
            paid_at: request.paid_at,
            estimated_payment_date: request.estimated_payment_date,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSettlementRequest {
    pub settlement_date: NaiveDate,
    pub bank_info: BankInfoBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSettlementResponse {
    pub settlement_id: Uuid,
    pub settlement_date: NaiveDate,
    pub total_amount: Decimal,
    pub coupon_amount: Decimal,
    pub mileage_amount: Decimal,
    pub status: SettlementStatus,
    pub requested_at: DateTime<Utc>,
    pub estimated_payment_date: NaiveDate,
}

/// `POST /v1/settlements`
///
/// Aggregates the calling business's redemptions for one calendar day
/// into a payout request. Amounts are frozen here; approval actions
/// never recompute them.
pub async fn create_settlement(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateSettlementRequest>,
) -> ApiResult<Json<CreateSettlementResponse>> {
    let auth = state.auth.authenticate(&headers)?;
    let business_id = auth.require_business()?;

    let today = Utc::now().date_naive();
    if body.settlement_date > today {
        return Err(CoreError::InvalidSettlementDate(
            "settlement date cannot be in the future".to_string(),
        )
        .into());
    }
    if body.settlement_date < today - Duration::days(MAX_SETTLEMENT_AGE_DAYS) {
        return Err(CoreError::InvalidSettlementDate(format!(
            "settlement date must be within the last {} days",
            MAX_SETTLEMENT_AGE_DAYS
        ))
        .into());
    }
    if body.bank_info.bank_name.trim().is_empty()
        || body.bank_info.bank_account.trim().is_empty()
        || body.bank_info.account_holder.trim().is_empty()
    {
        return Err(ApiError::BadRequest(
            "bankName, bankAccount and accountHolder are required".to_string(),
        ));
    }

    state
        .businesses
        .get(&business_id)
        .await?
        .ok_or_else(|| CoreError::NotFound("Business".to_string()))?;

    let from = body.settlement_date.and_time(NaiveTime::MIN).and_utc();
    let to = (body.settlement_date + Duration::days(1))
        .and_time(NaiveTime::MIN)
        .and_utc();

    let (mileage_count, mileage_amount) = state
        .mileage
        .used_total_for_business(&business_id, from, to)
        .await?;
    let (coupon_count, coupon_amount) = state
        .coupons
        .redeemed_total_for_business(&business_id, from, to)
        .await?;
    if mileage_count == 0 && coupon_count == 0 {
        return Err(CoreError::NoTransactions.into());
    }

    let now = Utc::now();
    let request = SettlementRequest {
        id: Uuid::new_v4(),
        business_id,
        settlement_date: body.settlement_date,
        coupon_count,
        coupon_amount,
        mileage_count,
        mileage_amount,
        total_amount: coupon_amount + mileage_amount,
        bank_info: BankInfo {
            bank_name: body.bank_info.bank_name,
            bank_account: body.bank_info.bank_account,
            account_holder: body.bank_info.account_holder,
        },
        status: SettlementStatus::Pending,
        reject_reason: None,
        cancel_reason: None,
        requested_at: now,
        decided_at: None,
        paid_at: None,
        estimated_payment_date: (now + Duration::days(state.config.payout_lead_days)).date_naive(),
    };
    let created = state.settlements.create(&request).await?;

    state
        .audit
        .log(
            AuditLogEntry::new(AuditEventType::SettlementRequested, "request_settlement", true)
                .with_auth(&auth)
                .with_business(business_id)
                .with_resource(created.id.to_string())
                .with_metadata("totalAmount", json!(created.total_amount)),
        )
        .await;

    Ok(Json(CreateSettlementResponse {
        settlement_id: created.id,
        settlement_date: created.settlement_date,
        total_amount: created.total_amount,
        coupon_amount: created.coupon_amount,
        mileage_amount: created.mileage_amount,
        status: created.status,
        requested_at: created.requested_at,
        estimated_payment_date: created.estimated_payment_date,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SettlementListQuery {
    /// Status filter: pending, approved, rejected, paid, cancelled
    pub status: Option<String>,
    pub page: Option<i32>,
    pub limit: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementsResponse {
    pub settlements: Vec<SettlementView>,
    pub page: i32,
    pub limit: i32,
    pub total_count: i64,
    pub summary: SettlementSummary,
}

/// `GET /v1/settlements`
///
/// Lists the calling business's own settlement requests.
pub async fn list_settlements(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<SettlementListQuery>,
) -> ApiResult<Json<SettlementsResponse>> {
    let auth = state.auth.authenticate(&headers)?;
    let business_id = auth.require_business()?;

    let status = match &query.status {
        Some(raw) => Some(raw.parse::<SettlementStatus>()?),
        None => None,
    };
    let (page, limit) = pagination(query.page, query.limit);

    let (settlements, total_count) = state
        .settlements
        .list(Some(business_id), status, page, limit)
        .await?;
    let summary = state.settlements.summary(Some(business_id)).await?;

    Ok(Json(SettlementsResponse {
        settlements: settlements.into_iter().map(SettlementView::from).collect(),
        page,
        limit,
        total_count,
        summary,
    }))
}

/// `GET /v1/settlements/:id`
///
/// A business can only see its own requests; an unknown or unowned id
/// reads as not found.
pub async fn get_settlement(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SettlementView>> {
    let auth = state.auth.authenticate(&headers)?;

    let settlement = state
        .settlements
        .get(&id)
        .await?
        .ok_or_else(|| CoreError::NotFound("Settlement request".to_string()))?;

    if auth.role != Role::Admin {
        let own = auth.require_business()?;
        if settlement.business_id != own {
            return Err(CoreError::NotFound("Settlement request".to_string()).into());
        }
    }

    Ok(Json(SettlementView::from(settlement)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CancelSettlementRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionResponse {
    pub settlement_id: Uuid,
    pub status: SettlementStatus,
}

/// `POST /v1/settlements/:id/cancel`
///
/// Only the requesting business can cancel, and only while pending.
pub async fn cancel_settlement(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<CancelSettlementRequest>,
) -> ApiResult<Json<TransitionResponse>> {
    let auth = state.auth.authenticate(&headers)?;
    let business_id = auth.require_business()?;

    let settlement = state
        .settlements
        .get(&id)
        .await?
        .ok_or_else(|| CoreError::NotFound("Settlement request".to_string()))?;
    if settlement.business_id != business_id {
        return Err(CoreError::NotFound("Settlement request".to_string()).into());
    }

    let updated = state
        .settlements
        .transition(&id, SettlementStatus::Cancelled, body.reason)
        .await?;

    state
        .audit
        .log(
            AuditLogEntry::new(AuditEventType::SettlementCancelled, "cancel_settlement", true)
                .with_auth(&auth)
                .with_business(business_id)
                .with_resource(id.to_string()),
        )
        .await;

    Ok(Json(TransitionResponse {
        settlement_id: updated.id,
        status: updated.status,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminSettlementListQuery {
    pub business_id: Option<Uuid>,
    /// Status filter: pending, approved, rejected, paid, cancelled
    pub status: Option<String>,
    pub page: Option<i32>,
    pub limit: Option<i32>,
}

/// `GET /v1/admin/settlements`
pub async fn list_all_settlements(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AdminSettlementListQuery>,
) -> ApiResult<Json<SettlementsResponse>> {
    let auth = state.auth.authenticate(&headers)?;
    require_admin(&state, &auth, "list_all_settlements").await?;

    let status = match &query.status {
        Some(raw) => Some(raw.parse::<SettlementStatus>()?),
        None => None,
    };
    let (page, limit) = pagination(query.page, query.limit);

    let (settlements, total_count) = state
        .settlements
        .list(query.business_id, status, page, limit)
        .await?;
    let summary = state.settlements.summary(query.business_id).await?;

    Ok(Json(SettlementsResponse {
        settlements: settlements.into_iter().map(SettlementView::from).collect(),
        page,
        limit,
        total_count,
        summary,
    }))
}

/// `POST /v1/admin/settlements/:id/approve`
pub async fn approve_settlement(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TransitionResponse>> {
    let auth = state.auth.authenticate(&headers)?;
    require_admin(&state, &auth, "approve_settlement").await?;

    let updated = state
        .settlements
        .transition(&id, SettlementStatus::Approved, None)
        .await?;

    state
        .audit
        .log(
            AuditLogEntry::new(AuditEventType::SettlementApproved, "approve_settlement", true)
                .with_auth(&auth)
                .with_business(updated.business_id)
                .with_resource(id.to_string())
                .with_metadata("totalAmount", json!(updated.total_amount)),
        )
        .await;
    state
        .notifier
        .send(
            Notification::new(
                NotificationEvent::SettlementApproved,
                format!("Settlement for {} approved", updated.settlement_date),
            )
            .for_business(updated.business_id),
        )
        .await;

    Ok(Json(TransitionResponse {
        settlement_id: updated.id,
        status: updated.status,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RejectSettlementRequest {
    pub reason: Option<String>,
}

/// `POST /v1/admin/settlements/:id/reject`
pub async fn reject_settlement(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<RejectSettlementRequest>,
) -> ApiResult<Json<TransitionResponse>> {
    let auth = state.auth.authenticate(&headers)?;
    require_admin(&state, &auth, "reject_settlement").await?;

    let reason = match body.reason {
        Some(reason) if !reason.trim().is_empty() => reason,
        _ => {
            return Err(ApiError::BadRequest(
                "a reject reason is required".to_string(),
            ))
        }
    };

    let updated = state
        .settlements
        .transition(&id, SettlementStatus::Rejected, Some(reason.clone()))
        .await?;

    state
        .audit
        .log(
            AuditLogEntry::new(AuditEventType::SettlementRejected, "reject_settlement", true)
                .with_auth(&auth)
                .with_business(updated.business_id)
                .with_resource(id.to_string())
                .with_metadata("reason", json!(reason)),
        )
        .await;
    state
        .notifier
        .send(
            Notification::new(
                NotificationEvent::SettlementRejected,
                format!("Settlement for {} rejected: {}", updated.settlement_date, reason),
            )
            .for_business(updated.business_id),
        )
        .await;

    Ok(Json(TransitionResponse {
        settlement_id: updated.id,
        status: updated.status,
    }))
}

/// `POST /v1/admin/settlements/:id/paid`
pub async fn mark_paid(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TransitionResponse>> {
    let auth = state.auth.authenticate(&headers)?;
    require_admin(&state, &auth, "mark_paid").await?;

    let updated = state
        .settlements
        .transition(&id, SettlementStatus::Paid, None)
        .await?;

    state
        .audit
        .log(
            AuditLogEntry::new(AuditEventType::SettlementPaid, "mark_paid", true)
                .with_auth(&auth)
                .with_business(updated.business_id)
                .with_resource(id.to_string())
                .with_metadata("totalAmount", json!(updated.total_amount)),
        )
        .await;
    state
        .notifier
        .send(
            Notification::new(
                NotificationEvent::SettlementPaid,
                format!("Settlement of {} paid", updated.total_amount),
            )
            .for_business(updated.business_id),
        )
        .await;

    Ok(Json(TransitionResponse {
        settlement_id: updated.id,
        status: updated.status,
    }))
}
