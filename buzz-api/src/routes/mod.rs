//! HTTP route handlers
//!
//! Every handler resolves the bearer token itself, performs its role
//! check, and talks to the engine through the repository traits on
//! [`AppState`]. Pagination is 1-based with a page size clamped to 100.

use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::ApiResult;
use crate::middleware::auth::AuthContext;
use crate::state::AppState;

pub mod budget;
pub mod businesses;
pub mod coupons;
pub mod health;
pub mod mileage;
pub mod settlements;

#[cfg(test)]
pub mod businesses_test;
#[cfg(test)]
pub mod coupons_test;

/// Assemble the full application router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        // User-facing mileage endpoints
        .route("/v1/mileage/balance", get(mileage::get_balance))
        .route("/v1/mileage/history", get(mileage::get_history))
        .route("/v1/mileage/qr", post(mileage::create_qr))
        .route("/v1/mileage/use", post(mileage::use_mileage))
        // User-facing coupon endpoints
        .route("/v1/coupons", get(coupons::list_coupons))
        .route("/v1/coupons/use", post(coupons::use_coupon))
        // Business-facing settlement endpoints
        .route(
            "/v1/settlements",
            post(settlements::create_settlement).get(settlements::list_settlements),
        )
        .route("/v1/settlements/:id", get(settlements::get_settlement))
        .route("/v1/settlements/:id/cancel", post(settlements::cancel_settlement))
        // Admin: mileage operations
        .route("/v1/admin/mileage/grant", post(mileage::grant_mileage))
        .route("/v1/admin/mileage/expire", post(mileage::expire_mileage))
        // Admin: coupon catalog and issuance
        .route(
            "/v1/admin/coupon-templates",
            post(coupons::create_template).get(coupons::list_templates),
        )
        .route("/v1/admin/coupons/grant", post(coupons::grant_coupon))
        // Admin: settlement review
        .route("/v1/admin/settlements", get(settlements::list_all_settlements))
        .route(
            "/v1/admin/settlements/:id/approve",
            post(settlements::approve_settlement),
        )
        .route(
            "/v1/admin/settlements/:id/reject",
            post(settlements::reject_settlement),
        )
        .route("/v1/admin/settlements/:id/paid", post(settlements::mark_paid))
        // Admin: budget monitor
        .route("/v1/admin/budget/status", get(budget::get_status))
        .route("/v1/admin/budget/policy", put(budget::put_policy))
        .route("/v1/admin/budget/emergency", post(budget::set_emergency))
        // Admin: business directory
        .route(
            "/v1/admin/businesses",
            post(businesses::register_business).get(businesses::list_businesses),
        )
        .route(
            "/v1/admin/businesses/:id/status",
            post(businesses::set_business_status),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Admin gate shared by the `/v1/admin` handlers: denials land in the
/// audit log before the request is rejected.
pub(crate) async fn require_admin(
    state: &AppState,
    auth: &AuthContext,
    method: &str,
) -> ApiResult<()> {
    if let Err(err) = auth.require_admin() {
        state
            .audit
            .log_permission_denied(auth, method, "admin role required")
            .await;
        return Err(err);
    }
    Ok(())
}

/// Normalize 1-based pagination parameters
pub(crate) fn pagination(page: Option<i32>, limit: Option<i32>) -> (i32, i32) {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(20).clamp(1, 100);
    (page, limit)
}
