//! Audit logging for ledger-affecting operations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::auth::AuthContext;

/// Audit event types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuditEventType {
    Authentication,
    PermissionDenied,
    // Mileage events
    MileageGranted,
    MileageUsed,
    MileageExpired,
    // Coupon events
    CouponTemplateCreated,
    CouponGranted,
    CouponRedeemed,
    // Settlement events
    SettlementRequested,
    SettlementCancelled,
    SettlementApproved,
    SettlementRejected,
    SettlementPaid,
    // Budget events
    BudgetPolicyUpdated,
    EmergencyModeChanged,
    // Business directory events
    BusinessRegistered,
    BusinessStatusChanged,
}

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub user_id: Option<String>,
    pub business_id: Option<String>,
    pub method: String,
    pub resource: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub request_id: String,
    pub metadata: serde_json::Value,
}

impl AuditLogEntry {
    pub fn new(event_type: AuditEventType, method: impl Into<String>, success: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            user_id: None,
            business_id: None,
            method: method.into(),
            resource: None,
            success,
            error_message: None,
            request_id: Uuid::new_v4().to_string(),
            metadata: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_auth(mut self, auth: &AuthContext) -> Self {
        self.user_id = Some(auth.user_id.to_string());
        self.business_id = auth.business_id.map(|id| id.to_string());
        self
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn with_business(mut self, business_id: Uuid) -> Self {
        self.business_id = Some(business_id.to_string());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error_message = Some(error.to_string());
        self.success = false;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        if let serde_json::Value::Object(ref mut map) = self.metadata {
            map.insert(key.to_string(), value);
        }
        self
    }
}

/// Audit logger service
///
/// Emits structured tracing records; a log aggregation pipeline turns
/// them into the durable audit trail.
#[derive(Debug, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    /// Log an audit event
    pub async fn log(&self, entry: AuditLogEntry) {
        match entry.event_type {
            AuditEventType::PermissionDenied => {
                tracing::warn!(
                    audit_event = ?entry.event_type,
                    user_id = entry.user_id,
                    business_id = entry.business_id,
                    method = entry.method,
                    error = entry.error_message,
                    "Security audit event"
                );
            }
            _ => {
                tracing::info!(
                    audit_event = ?entry.event_type,
                    user_id = entry.user_id,
                    business_id = entry.business_id,
                    method = entry.method,
                    resource = entry.resource,
                    success = entry.success,
                    metadata = %entry.metadata,
                    "Audit event"
                );
            }
        }
    }

    /// Log a denied authorization check
    pub async fn log_permission_denied(&self, auth: &AuthContext, method: &str, error: &str) {
        let entry = AuditLogEntry::new(AuditEventType::PermissionDenied, method, false)
            .with_auth(auth)
            .with_error(error);
        self.log(entry).await;
    }
}
