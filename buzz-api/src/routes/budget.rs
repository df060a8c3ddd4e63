//! Advisory budget monitor endpoints

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use buzz_core::budget::{
    BudgetCategory, BudgetPolicy, BudgetPolicyStore, BudgetThresholds, BudgetUsage, CategoryLimits,
};
use buzz_core::coupon::CouponRepository;
use buzz_core::mileage::MileageRepository;
use buzz_core::settlement::{SettlementRepository, SettlementStatus};

use crate::error::{ApiError, ApiResult};
use crate::middleware::audit::{AuditEventType, AuditLogEntry};
use crate::routes::require_admin;
use crate::state::AppState;

/// Settlement statuses counted as committed spend
const SPEND_STATUSES: [SettlementStatus; 2] = [SettlementStatus::Pending, SettlementStatus::Paid];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetStatusResponse {
    pub emergency_mode: bool,
    pub restricted_categories: Vec<BudgetCategory>,
    pub thresholds: BudgetThresholds,
    pub monthly: Vec<BudgetUsage>,
    pub daily: Vec<BudgetUsage>,
    pub updated_at: DateTime<Utc>,
}

/// `GET /v1/admin/budget/status`
///
/// Month-to-date and day-to-date spend per category, classified against
/// the configured limits. Purely advisory: nothing here gates issuance
/// or redemption.
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<Json<BudgetStatusResponse>> {
    let auth = state.auth.authenticate(&headers)?;
    require_admin(&state, &auth, "budget_status").await?;

    let policy = state.budget.get().await?;

    let now = Utc::now();
    let today = now.date_naive();
    let month_start = today - Duration::days((today.day() - 1) as i64);
    let month_from = month_start.and_time(NaiveTime::MIN).and_utc();
    let day_from = today.and_time(NaiveTime::MIN).and_utc();
    let tomorrow = today + Duration::days(1);

    let mileage_month = state.mileage.earned_total(month_from, now).await?;
    let coupon_month = state.coupons.redeemed_total(month_from, now).await?;
    let settlement_month = state
        .settlements
        .amount_in_period(&SPEND_STATUSES, month_start, tomorrow)
        .await?;

    let mileage_day = state.mileage.earned_total(day_from, now).await?;
    let coupon_day = state.coupons.redeemed_total(day_from, now).await?;
    let settlement_day = state
        .settlements
        .amount_in_period(&SPEND_STATUSES, today, tomorrow)
        .await?;

    let monthly = vec![
        policy.evaluate_monthly(BudgetCategory::Mileage, mileage_month),
        policy.evaluate_monthly(BudgetCategory::Coupon, coupon_month),
        policy.evaluate_monthly(BudgetCategory::Settlement, settlement_month),
    ];
    let daily = vec![
        policy.evaluate_daily(BudgetCategory::Mileage, mileage_day),
        policy.evaluate_daily(BudgetCategory::Coupon, coupon_day),
        policy.evaluate_daily(BudgetCategory::Settlement, settlement_day),
    ];

    Ok(Json(BudgetStatusResponse {
        emergency_mode: policy.emergency_mode,
        restricted_categories: policy.restricted_categories.clone(),
        thresholds: policy.thresholds.clone(),
        monthly,
        daily,
        updated_at: policy.updated_at,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyView {
    pub monthly_limits: CategoryLimits,
    pub daily_limits: CategoryLimits,
    pub thresholds: BudgetThresholds,
    pub emergency_mode: bool,
    pub restricted_categories: Vec<BudgetCategory>,
    pub updated_at: DateTime<Utc>,
}

impl From<BudgetPolicy> for PolicyView {
    fn from(policy: BudgetPolicy) -> Self {
        Self {
            monthly_limits: policy.monthly_limits,
            daily_limits: policy.daily_limits,
            thresholds: policy.thresholds,
            emergency_mode: policy.emergency_mode,
            restricted_categories: policy.restricted_categories,
            updated_at: policy.updated_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LimitsBody {
    pub mileage: Option<Decimal>,
    pub coupon: Option<Decimal>,
    pub settlement: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdsBody {
    pub caution: Decimal,
    pub warning: Decimal,
    pub critical: Decimal,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PutPolicyRequest {
    pub monthly_limits: Option<LimitsBody>,
    pub daily_limits: Option<LimitsBody>,
    pub thresholds: Option<ThresholdsBody>,
    pub emergency_mode: Option<bool>,
    pub restricted_categories: Option<Vec<String>>,
}

fn limits_from(body: LimitsBody) -> ApiResult<CategoryLimits> {
    for value in [body.mileage, body.coupon, body.settlement].iter().flatten() {
        if *value < Decimal::ZERO {
            return Err(ApiError::BadRequest(
                "budget limits cannot be negative".to_string(),
            ));
        }
    }
    Ok(CategoryLimits {
        mileage: body.mileage,
        coupon: body.coupon,
        settlement: body.settlement,
    })
}

fn thresholds_from(body: ThresholdsBody) -> ApiResult<BudgetThresholds> {
    let ThresholdsBody {
        caution,
        warning,
        critical,
    } = body;
    if caution <= Decimal::ZERO
        || critical > Decimal::from(100)
        || caution >= warning
        || warning >= critical
    {
        return Err(ApiError::BadRequest(
            "thresholds must satisfy 0 < caution < warning < critical <= 100".to_string(),
        ));
    }
    Ok(BudgetThresholds {
        caution,
        warning,
        critical,
    })
}

fn categories_from(raw: Option<Vec<String>>) -> ApiResult<Vec<BudgetCategory>> {
    match raw {
        Some(names) => {
            let mut categories = Vec::with_capacity(names.len());
            for name in &names {
                categories.push(name.parse::<BudgetCategory>()?);
            }
            Ok(categories)
        }
        None => Ok(Vec::new()),
    }
}

/// `PUT /v1/admin/budget/policy`
///
/// Replaces the policy wholesale; omitted sections fall back to their
/// defaults rather than keeping the previous values.
pub async fn put_policy(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PutPolicyRequest>,
) -> ApiResult<Json<PolicyView>> {
    let auth = state.auth.authenticate(&headers)?;
    require_admin(&state, &auth, "update_budget_policy").await?;

    let policy = BudgetPolicy {
        monthly_limits: match body.monthly_limits {
            Some(limits) => limits_from(limits)?,
            None => CategoryLimits::default(),
        },
        daily_limits: match body.daily_limits {
            Some(limits) => limits_from(limits)?,
            None => CategoryLimits::default(),
        },
        thresholds: match body.thresholds {
            Some(thresholds) => thresholds_from(thresholds)?,
            None => BudgetThresholds::default(),
        },
        emergency_mode: body.emergency_mode.unwrap_or(false),
        restricted_categories: categories_from(body.restricted_categories)?,
        updated_at: Utc::now(),
    };
    let stored = state.budget.put(&policy).await?;

    state
        .audit
        .log(
            AuditLogEntry::new(AuditEventType::BudgetPolicyUpdated, "update_budget_policy", true)
                .with_auth(&auth),
        )
        .await;

    Ok(Json(PolicyView::from(stored)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyRequest {
    pub enabled: bool,
    pub restricted_categories: Option<Vec<String>>,
}

/// `POST /v1/admin/budget/emergency`
///
/// Flips the advisory emergency flag. An empty category list restricts
/// every category.
pub async fn set_emergency(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<EmergencyRequest>,
) -> ApiResult<Json<PolicyView>> {
    let auth = state.auth.authenticate(&headers)?;
    require_admin(&state, &auth, "set_emergency_mode").await?;

    let mut policy = state.budget.get().await?;
    policy.emergency_mode = body.enabled;
    policy.restricted_categories = categories_from(body.restricted_categories)?;
    policy.updated_at = Utc::now();
    let stored = state.budget.put(&policy).await?;

    state
        .audit
        .log(
            AuditLogEntry::new(AuditEventType::EmergencyModeChanged, "set_emergency_mode", true)
                .with_auth(&auth)
                .with_metadata("enabled", json!(body.enabled)),
        )
        .await;

    Ok(Json(PolicyView::from(stored)))
}
