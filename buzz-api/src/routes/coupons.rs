//! Coupon catalog, issuance, listing, and redemption

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use buzz_core::coupon::{
    CouponIssue, CouponRepository, CouponStatus, CouponTemplate, DiscountKind, RedemptionAttempt,
    UserCoupon,
};
use buzz_core::Error as CoreError;

use crate::error::{ApiError, ApiResult};
use crate::middleware::audit::{AuditEventType, AuditLogEntry};
use crate::middleware::auth::Role;
use crate::notify::{Notification, NotificationEvent};
use crate::routes::{pagination, require_admin};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponView {
    pub id: Uuid,
    pub template_id: Uuid,
    pub template_name: Option<String>,
    pub status: CouponStatus,
    pub qr_code: String,
    pub issued_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub used_business_id: Option<Uuid>,
    pub used_amount: Option<Decimal>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CouponListQuery {
    /// Status filter: active, used, expired
    pub status: Option<String>,
    pub page: Option<i32>,
    pub limit: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponsResponse {
    pub coupons: Vec<CouponView>,
    pub page: i32,
    pub limit: i32,
    pub total_count: i64,
}

/// `GET /v1/coupons`
///
/// Lists the caller's own coupons, newest first.
pub async fn list_coupons(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CouponListQuery>,
) -> ApiResult<Json<CouponsResponse>> {
    let auth = state.auth.authenticate(&headers)?;

    let status = match &query.status {
        Some(raw) => Some(raw.parse::<CouponStatus>()?),
        None => None,
    };
    let (page, limit) = pagination(query.page, query.limit);

    let (coupons, total_count) = state
        .coupons
        .list_coupons(&auth.user_id, status, page, limit)
        .await?;

    // One template lookup per distinct template on the page
    let mut template_names: HashMap<Uuid, String> = HashMap::new();
    for coupon in &coupons {
        if !template_names.contains_key(&coupon.template_id) {
            if let Some(template) = state.coupons.get_template(&coupon.template_id).await? {
                template_names.insert(coupon.template_id, template.name);
            }
        }
    }

    let coupons = coupons
        .into_iter()
        .map(|coupon: UserCoupon| CouponView {
            template_name: template_names.get(&coupon.template_id).cloned(),
            id: coupon.id,
            template_id: coupon.template_id,
            status: coupon.status,
            qr_code: coupon.qr_code_data,
            issued_at: coupon.issued_at,
            used_at: coupon.used_at,
            used_business_id: coupon.used_business_id,
            used_amount: coupon.used_amount,
            expires_at: coupon.expires_at,
        })
        .collect();

    Ok(Json(CouponsResponse {
        coupons,
        page,
        limit,
        total_count,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UseCouponRequest {
    pub qr_code: String,
    pub purchase_amount: Decimal,
    pub business_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UseCouponResponse {
    pub discount_amount: Decimal,
    pub final_amount: Decimal,
    pub business_name: String,
    pub coupon_name: String,
    pub message: String,
}

/// `POST /v1/coupons/use`
///
/// Redeems the coupon named by the QR token against a purchase. User
/// callers may only redeem coupons they own; business callers may only
/// redeem at their own business.
pub async fn use_coupon(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<UseCouponRequest>,
) -> ApiResult<Json<UseCouponResponse>> {
    let auth = state.auth.authenticate(&headers)?;
    let coupon_id = state.qr.verify_coupon(&body.qr_code)?;

    let expected_user = match auth.role {
        Role::User => Some(auth.user_id),
        Role::Business => {
            let own = auth.require_business()?;
            if own != body.business_id {
                return Err(ApiError::Forbidden(
                    "businessId does not match the authenticated business".to_string(),
                ));
            }
            None
        }
        Role::Admin => None,
    };

    let attempt = RedemptionAttempt {
        coupon_id,
        business_id: body.business_id,
        purchase_amount: body.purchase_amount,
        expected_user,
    };
    let redemption = state.coupons.redeem(&attempt, Utc::now()).await?;

    state
        .audit
        .log(
            AuditLogEntry::new(AuditEventType::CouponRedeemed, "use_coupon", true)
                .with_auth(&auth)
                .with_user(redemption.coupon.user_id)
                .with_business(body.business_id)
                .with_resource(coupon_id.to_string())
                .with_metadata("discount", json!(redemption.discount_amount)),
        )
        .await;
    state
        .notifier
        .send(
            Notification::new(
                NotificationEvent::CouponRedeemed,
                format!(
                    "Coupon '{}' redeemed at {}",
                    redemption.template_name, redemption.business_name
                ),
            )
            .for_user(redemption.coupon.user_id)
            .for_business(body.business_id),
        )
        .await;

    Ok(Json(UseCouponResponse {
        discount_amount: redemption.discount_amount,
        final_amount: redemption.final_amount,
        business_name: redemption.business_name,
        coupon_name: redemption.template_name,
        message: "Coupon redeemed".to_string(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateView {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub discount_type: DiscountKind,
    pub discount_value: Decimal,
    pub min_purchase_amount: Decimal,
    pub max_discount_amount: Option<Decimal>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub validity_days: Option<i32>,
    pub total_quantity: Option<i32>,
    pub used_quantity: i32,
    pub applicable_businesses: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<CouponTemplate> for TemplateView {
    fn from(template: CouponTemplate) -> Self {
        Self {
            id: template.id,
            name: template.name,
            description: template.description,
            discount_type: template.discount_kind,
            discount_value: template.discount_value,
            min_purchase_amount: template.min_purchase_amount,
            max_discount_amount: template.max_discount_amount,
            valid_from: template.valid_from,
            valid_until: template.valid_until,
            validity_days: template.validity_days,
            total_quantity: template.total_quantity,
            used_quantity: template.used_quantity,
            applicable_businesses: template.applicable_businesses,
            created_at: template.created_at,
            updated_at: template.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplateRequest {
    pub name: String,
    pub description: Option<String>,
    /// fixed or percentage
    pub discount_type: String,
    pub discount_value: Decimal,
    pub min_purchase_amount: Option<Decimal>,
    pub max_discount_amount: Option<Decimal>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub validity_days: Option<i32>,
    pub total_quantity: Option<i32>,
    pub applicable_businesses: Option<Vec<Uuid>>,
}

/// `POST /v1/admin/coupon-templates`
pub async fn create_template(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateTemplateRequest>,
) -> ApiResult<Json<TemplateView>> {
    let auth = state.auth.authenticate(&headers)?;
    require_admin(&state, &auth, "create_template").await?;

    if body.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    let discount_kind: DiscountKind = body.discount_type.parse()?;
    if body.discount_value <= Decimal::ZERO {
        return Err(ApiError::BadRequest(
            "discountValue must be positive".to_string(),
        ));
    }
    if discount_kind == DiscountKind::Percentage && body.discount_value > Decimal::from(100) {
        return Err(ApiError::BadRequest(
            "percentage discount cannot exceed 100".to_string(),
        ));
    }
    if body.valid_from >= body.valid_until {
        return Err(ApiError::BadRequest(
            "validFrom must be before validUntil".to_string(),
        ));
    }
    if let Some(min) = body.min_purchase_amount {
        if min < Decimal::ZERO {
            return Err(ApiError::BadRequest(
                "minPurchaseAmount cannot be negative".to_string(),
            ));
        }
    }
    if let Some(max) = body.max_discount_amount {
        if max <= Decimal::ZERO {
            return Err(ApiError::BadRequest(
                "maxDiscountAmount must be positive".to_string(),
            ));
        }
    }
    if let Some(quantity) = body.total_quantity {
        if quantity <= 0 {
            return Err(ApiError::BadRequest(
                "totalQuantity must be positive".to_string(),
            ));
        }
    }
    if let Some(days) = body.validity_days {
        if days <= 0 {
            return Err(ApiError::BadRequest(
                "validityDays must be positive".to_string(),
            ));
        }
    }

    let now = Utc::now();
    let template = CouponTemplate {
        id: Uuid::new_v4(),
        name: body.name,
        description: body.description,
        discount_kind,
        discount_value: body.discount_value,
        min_purchase_amount: body.min_purchase_amount.unwrap_or(Decimal::ZERO),
        max_discount_amount: body.max_discount_amount,
        valid_from: body.valid_from,
        valid_until: body.valid_until,
        validity_days: body.validity_days,
        total_quantity: body.total_quantity,
        used_quantity: 0,
        applicable_businesses: body.applicable_businesses.unwrap_or_default(),
        created_at: now,
        updated_at: now,
    };
    let created = state.coupons.create_template(&template).await?;

    state
        .audit
        .log(
            AuditLogEntry::new(AuditEventType::CouponTemplateCreated, "create_template", true)
                .with_auth(&auth)
                .with_resource(created.id.to_string()),
        )
        .await;

    Ok(Json(TemplateView::from(created)))
}

#[derive(Debug, Deserialize)]
pub struct TemplateListQuery {
    pub page: Option<i32>,
    pub limit: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplatesResponse {
    pub templates: Vec<TemplateView>,
    pub page: i32,
    pub limit: i32,
    pub total_count: i64,
}

/// `GET /v1/admin/coupon-templates`
pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<TemplateListQuery>,
) -> ApiResult<Json<TemplatesResponse>> {
    let auth = state.auth.authenticate(&headers)?;
    require_admin(&state, &auth, "list_templates").await?;

    let (page, limit) = pagination(query.page, query.limit);
    let (templates, total_count) = state.coupons.list_templates(page, limit).await?;

    Ok(Json(TemplatesResponse {
        templates: templates.into_iter().map(TemplateView::from).collect(),
        page,
        limit,
        total_count,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantCouponRequest {
    pub user_id: Uuid,
    pub template_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantCouponResponse {
    pub coupon_id: Uuid,
    pub user_id: Uuid,
    pub template_id: Uuid,
    pub template_name: String,
    pub qr_code: String,
    pub status: CouponStatus,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// `POST /v1/admin/coupons/grant`
///
/// Issues one coupon from a template to a user. The quantity cap and
/// the validity window are re-checked atomically by the repository.
pub async fn grant_coupon(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<GrantCouponRequest>,
) -> ApiResult<Json<GrantCouponResponse>> {
    let auth = state.auth.authenticate(&headers)?;
    require_admin(&state, &auth, "grant_coupon").await?;

    let template = state
        .coupons
        .get_template(&body.template_id)
        .await?
        .ok_or_else(|| CoreError::NotFound("Coupon template".to_string()))?;

    let now = Utc::now();
    let coupon_id = Uuid::new_v4();
    let qr_code_data = state.qr.issue_coupon(&coupon_id)?;
    let issue = CouponIssue {
        id: coupon_id,
        user_id: body.user_id,
        template_id: template.id,
        qr_code_data,
        expires_at: template.coupon_expiry(now),
    };
    let coupon = state.coupons.issue(&issue, now).await?;

    state
        .audit
        .log(
            AuditLogEntry::new(AuditEventType::CouponGranted, "grant_coupon", true)
                .with_auth(&auth)
                .with_user(body.user_id)
                .with_resource(coupon.id.to_string()),
        )
        .await;
    state
        .notifier
        .send(
            Notification::new(
                NotificationEvent::CouponIssued,
                format!("Coupon '{}' issued", template.name),
            )
            .for_user(body.user_id),
        )
        .await;

    Ok(Json(GrantCouponResponse {
        coupon_id: coupon.id,
        user_id: coupon.user_id,
        template_id: coupon.template_id,
        template_name: template.name,
        qr_code: coupon.qr_code_data,
        status: coupon.status,
        issued_at: coupon.issued_at,
        expires_at: coupon.expires_at,
    }))
}
