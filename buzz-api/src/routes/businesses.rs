//! Admin business directory endpoints

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use buzz_core::business::{Business, BusinessDirectory, BusinessStatus};

use crate::error::{ApiError, ApiResult};
use crate::middleware::audit::{AuditEventType, AuditLogEntry};
use crate::routes::{pagination, require_admin};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessView {
    pub id: Uuid,
    pub name: String,
    pub category: Option<String>,
    pub status: BusinessStatus,
    pub scan_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Business> for BusinessView {
    fn from(business: Business) -> Self {
        Self {
            id: business.id,
            name: business.name,
            category: business.category,
            status: business.status,
            scan_count: business.scan_count,
            created_at: business.created_at,
            updated_at: business.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterBusinessRequest {
    pub name: String,
    pub category: Option<String>,
}

/// `POST /v1/admin/businesses`
pub async fn register_business(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RegisterBusinessRequest>,
) -> ApiResult<Json<BusinessView>> {
    let auth = state.auth.authenticate(&headers)?;
    require_admin(&state, &auth, "register_business").await?;

    if body.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }

    let business = Business::new(body.name, body.category);
    let created = state.businesses.register(&business).await?;

    state
        .audit
        .log(
            AuditLogEntry::new(AuditEventType::BusinessRegistered, "register_business", true)
                .with_auth(&auth)
                .with_business(created.id)
                .with_resource(created.id.to_string()),
        )
        .await;

    Ok(Json(BusinessView::from(created)))
}

#[derive(Debug, Deserialize)]
pub struct BusinessListQuery {
    /// Status filter: active, suspended
    pub status: Option<String>,
    pub page: Option<i32>,
    pub limit: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessesResponse {
    pub businesses: Vec<BusinessView>,
    pub page: i32,
    pub limit: i32,
    pub total_count: i64,
}

/// `GET /v1/admin/businesses`
pub async fn list_businesses(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BusinessListQuery>,
) -> ApiResult<Json<BusinessesResponse>> {
    let auth = state.auth.authenticate(&headers)?;
    require_admin(&state, &auth, "list_businesses").await?;

    let status = match &query.status {
        Some(raw) => Some(raw.parse::<BusinessStatus>()?),
        None => None,
    };
    let (page, limit) = pagination(query.page, query.limit);

    let (businesses, total_count) = state.businesses.list(status, page, limit).await?;

    Ok(Json(BusinessesResponse {
        businesses: businesses.into_iter().map(BusinessView::from).collect(),
        page,
        limit,
        total_count,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBusinessStatusRequest {
    /// active or suspended
    pub status: String,
}

/// `POST /v1/admin/businesses/:id/status`
pub async fn set_business_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(body): Json<SetBusinessStatusRequest>,
) -> ApiResult<Json<BusinessView>> {
    let auth = state.auth.authenticate(&headers)?;
    require_admin(&state, &auth, "set_business_status").await?;

    let status: BusinessStatus = body.status.parse()?;
    let updated = state.businesses.set_status(&id, status).await?;

    state
        .audit
        .log(
            AuditLogEntry::new(AuditEventType::BusinessStatusChanged, "set_business_status", true)
                .with_auth(&auth)
                .with_business(updated.id)
                .with_resource(updated.id.to_string())
                .with_metadata("status", json!(status.as_str())),
        )
        .await;

    Ok(Json(BusinessView::from(updated)))
}
