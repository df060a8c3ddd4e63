//! Mileage balance, history, QR payment, and admin grant/expiry

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use buzz_core::business::{BusinessDirectory, BusinessStatus};
use buzz_core::mileage::{
    MileageRepository, MileageTransaction, TransactionContext, TransactionKind,
};
use buzz_core::Error as CoreError;

use crate::error::{ApiError, ApiResult};
use crate::middleware::audit::{AuditEventType, AuditLogEntry};
use crate::middleware::auth::Role;
use crate::notify::{Notification, NotificationEvent};
use crate::routes::{pagination, require_admin};
use crate::state::AppState;

/// Days ahead the balance endpoint looks when reporting soon-to-expire
/// points.
const EXPIRING_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub balance: Decimal,
    pub total_earned: Decimal,
    pub total_used: Decimal,
    pub total_expired: Decimal,
    pub expiring_amount: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// `GET /v1/mileage/balance`
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<BalanceResponse>> {
    let auth = state.auth.authenticate(&headers)?;

    let account = state.mileage.get_or_create_account(&auth.user_id).await?;
    let now = Utc::now();
    let expiring_amount = state
        .mileage
        .expiring_amount(&auth.user_id, now, now + Duration::days(EXPIRING_WINDOW_DAYS))
        .await?;

    Ok(Json(BalanceResponse {
        balance: account.balance,
        total_earned: account.total_earned,
        total_used: account.total_used,
        total_expired: account.total_expired,
        expiring_amount,
        updated_at: account.updated_at,
    }))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Transaction kind filter: earn, use, expire, cancel, refund
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub page: Option<i32>,
    pub limit: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub description: Option<String>,
    pub business_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<MileageTransaction> for TransactionView {
    fn from(tx: MileageTransaction) -> Self {
        Self {
            id: tx.id,
            kind: tx.kind,
            amount: tx.amount,
            balance_before: tx.balance_before,
            balance_after: tx.balance_after,
            description: tx.description,
            business_id: tx.business_id,
            expires_at: tx.expires_at,
            created_at: tx.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub balance: Decimal,
    pub total_earned: Decimal,
    pub total_used: Decimal,
    pub total_expired: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub transactions: Vec<TransactionView>,
    pub page: i32,
    pub limit: i32,
    pub total_count: i64,
    pub summary: HistorySummary,
}

/// `GET /v1/mileage/history`
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let auth = state.auth.authenticate(&headers)?;

    let kind = match &query.kind {
        Some(raw) => Some(raw.parse::<TransactionKind>()?),
        None => None,
    };
    let (page, limit) = pagination(query.page, query.limit);

    let (transactions, total_count) = state
        .mileage
        .list_transactions(&auth.user_id, kind, page, limit)
        .await?;
    let account = state.mileage.get_or_create_account(&auth.user_id).await?;

    Ok(Json(HistoryResponse {
        transactions: transactions.into_iter().map(TransactionView::from).collect(),
        page,
        limit,
        total_count,
        summary: HistorySummary {
            balance: account.balance,
            total_earned: account.total_earned,
            total_used: account.total_used,
            total_expired: account.total_expired,
        },
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrResponse {
    pub qr_code: String,
}

/// `POST /v1/mileage/qr`
///
/// Issues a signed payment token for the caller's own account.
pub async fn create_qr(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<QrResponse>> {
    let auth = state.auth.authenticate(&headers)?;
    let qr_code = state.qr.issue_mileage(&auth.user_id)?;
    Ok(Json(QrResponse { qr_code }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UseMileageRequest {
    pub qr_code: String,
    pub amount: Decimal,
    pub business_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UseMileageResponse {
    pub used_amount: Decimal,
    pub remaining_balance: Decimal,
    pub business_name: String,
    pub message: String,
}

/// `POST /v1/mileage/use`
///
/// Deducts points from the account named by the QR token. Business
/// callers may only charge against their own business; user callers may
/// only present their own token.
pub async fn use_mileage(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<UseMileageRequest>,
) -> ApiResult<Json<UseMileageResponse>> {
    let auth = state.auth.authenticate(&headers)?;
    let user_id = state.qr.verify_mileage(&body.qr_code)?;

    match auth.role {
        Role::Business => {
            let own = auth.require_business()?;
            if own != body.business_id {
                return Err(ApiError::Forbidden(
                    "businessId does not match the authenticated business".to_string(),
                ));
            }
        }
        Role::User => {
            if auth.user_id != user_id {
                return Err(ApiError::Forbidden(
                    "QR code belongs to a different user".to_string(),
                ));
            }
        }
        Role::Admin => {}
    }

    let business = state
        .businesses
        .get(&body.business_id)
        .await?
        .ok_or_else(|| CoreError::NotFound("Business".to_string()))?;
    if business.status == BusinessStatus::Suspended {
        return Err(CoreError::BusinessSuspended.into());
    }

    let context = TransactionContext {
        description: Some(format!("QR payment at {}", business.name)),
        reference_type: Some("qr_payment".to_string()),
        business_id: Some(business.id),
        ..Default::default()
    };
    let tx = state
        .mileage
        .record(&user_id, TransactionKind::Use, body.amount, &context)
        .await?;

    state
        .audit
        .log(
            AuditLogEntry::new(AuditEventType::MileageUsed, "use_mileage", true)
                .with_auth(&auth)
                .with_user(user_id)
                .with_business(business.id)
                .with_resource(tx.id.to_string())
                .with_metadata("amount", json!(tx.amount)),
        )
        .await;
    state
        .notifier
        .send(
            Notification::new(
                NotificationEvent::MileageUsed,
                format!("{} mileage points used at {}", tx.amount, business.name),
            )
            .for_user(user_id)
            .for_business(business.id),
        )
        .await;

    Ok(Json(UseMileageResponse {
        used_amount: tx.amount,
        remaining_balance: tx.balance_after,
        business_name: business.name,
        message: "Mileage payment completed".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantMileageRequest {
    pub user_id: Uuid,
    pub amount: Decimal,
    pub description: Option<String>,
    /// Absolute expiry for the granted points; wins over `expiryDays`
    pub expires_at: Option<DateTime<Utc>>,
    /// Relative expiry in days from now
    pub expiry_days: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantMileageResponse {
    pub transaction_id: Uuid,
    pub user_id: Uuid,
    pub amount: Decimal,
    pub balance_after: Decimal,
    pub expires_at: Option<DateTime<Utc>>,
}

/// `POST /v1/admin/mileage/grant`
pub async fn grant_mileage(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<GrantMileageRequest>,
) -> ApiResult<Json<GrantMileageResponse>> {
    let auth = state.auth.authenticate(&headers)?;
    require_admin(&state, &auth, "grant_mileage").await?;

    let expires_at = match (body.expires_at, body.expiry_days) {
        (Some(at), _) => Some(at),
        (None, Some(days)) => {
            if days <= 0 {
                return Err(ApiError::BadRequest(
                    "expiryDays must be positive".to_string(),
                ));
            }
            Some(Utc::now() + Duration::days(days))
        }
        (None, None) => None,
    };

    let context = TransactionContext {
        description: body.description.clone(),
        reference_type: Some("admin_grant".to_string()),
        expires_at,
        ..Default::default()
    };
    let tx = state
        .mileage
        .record(&body.user_id, TransactionKind::Earn, body.amount, &context)
        .await?;

    state
        .audit
        .log(
            AuditLogEntry::new(AuditEventType::MileageGranted, "grant_mileage", true)
                .with_auth(&auth)
                .with_user(body.user_id)
                .with_resource(tx.id.to_string())
                .with_metadata("amount", json!(tx.amount)),
        )
        .await;
    state
        .notifier
        .send(
            Notification::new(
                NotificationEvent::MileageEarned,
                format!("{} mileage points granted", tx.amount),
            )
            .for_user(body.user_id),
        )
        .await;

    Ok(Json(GrantMileageResponse {
        transaction_id: tx.id,
        user_id: tx.user_id,
        amount: tx.amount,
        balance_after: tx.balance_after,
        expires_at: tx.expires_at,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExpireMileageRequest {
    pub as_of: Option<DateTime<Utc>>,
    pub dry_run: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpireMileageResponse {
    pub dry_run: bool,
    pub users_affected: i64,
    pub transaction_count: i64,
    pub total_amount: Decimal,
    pub transactions: Vec<TransactionView>,
}

/// `POST /v1/admin/mileage/expire`
///
/// Runs the expiry sweep. With `dryRun` the affected rows are reported
/// without writing anything.
pub async fn expire_mileage(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ExpireMileageRequest>,
) -> ApiResult<Json<ExpireMileageResponse>> {
    let auth = state.auth.authenticate(&headers)?;
    require_admin(&state, &auth, "expire_mileage").await?;

    let as_of = body.as_of.unwrap_or_else(Utc::now);
    let dry_run = body.dry_run.unwrap_or(false);

    let (transactions, users_affected) = state.mileage.expire_due(as_of, dry_run).await?;
    let total_amount: Decimal = transactions.iter().map(|tx| tx.amount).sum();

    if !dry_run {
        state
            .audit
            .log(
                AuditLogEntry::new(AuditEventType::MileageExpired, "expire_mileage", true)
                    .with_auth(&auth)
                    .with_metadata("usersAffected", json!(users_affected))
                    .with_metadata("totalAmount", json!(total_amount)),
            )
            .await;
    }

    Ok(Json(ExpireMileageResponse {
        dry_run,
        users_affected,
        transaction_count: transactions.len() as i64,
        total_amount,
        transactions: transactions.into_iter().map(TransactionView::from).collect(),
    }))
}
