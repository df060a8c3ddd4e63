//! Fire-and-forget user notifications
//!
//! Delivery is best-effort: failures are logged and dropped, never
//! retried, and never roll back the operation that triggered them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notification event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    MileageEarned,
    MileageUsed,
    CouponIssued,
    CouponRedeemed,
    SettlementApproved,
    SettlementRejected,
    SettlementPaid,
}

/// Outbound notification payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub event: NotificationEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_id: Option<Uuid>,
    pub message: String,
}

impl Notification {
    pub fn new(event: NotificationEvent, message: impl Into<String>) -> Self {
        Self {
            event,
            user_id: None,
            business_id: None,
            message: message.into(),
        }
    }

    pub fn for_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn for_business(mut self, business_id: Uuid) -> Self {
        self.business_id = Some(business_id);
        self
    }
}

/// Notification delivery backend
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Deliver a notification, best-effort
    async fn send(&self, notification: Notification);
}

/// Sender that only writes the notification to the log
///
/// Used when no webhook endpoint is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSender for LogNotifier {
    async fn send(&self, notification: Notification) {
        tracing::info!(
            event = ?notification.event,
            user_id = ?notification.user_id,
            business_id = ?notification.business_id,
            message = %notification.message,
            "Notification (log only)"
        );
    }
}

/// Sender that POSTs the notification as JSON to a webhook endpoint
pub struct WebhookNotifier {
    /// HTTP client
    client: reqwest::Client,
    /// Webhook endpoint URL
    endpoint: String,
}

impl WebhookNotifier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl NotificationSender for WebhookNotifier {
    async fn send(&self, notification: Notification) {
        let result = self
            .client
            .post(&self.endpoint)
            .json(&notification)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(event = ?notification.event, "Notification delivered");
            }
            Ok(response) => {
                tracing::warn!(
                    event = ?notification.event,
                    status = %response.status(),
                    "Notification endpoint returned an error"
                );
            }
            Err(e) => {
                tracing::warn!(
                    event = ?notification.event,
                    error = %e,
                    "Failed to deliver notification: {}", e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case_and_skips_empty_ids() {
        let user_id = Uuid::new_v4();
        let notification =
            Notification::new(NotificationEvent::MileageEarned, "1000 miles earned")
                .for_user(user_id);

        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["event"], "mileage_earned");
        assert_eq!(json["userId"], user_id.to_string());
        assert_eq!(json["message"], "1000 miles earned");
        assert!(json.get("businessId").is_none());
    }

    #[tokio::test]
    async fn log_notifier_accepts_anything() {
        let notifier = LogNotifier;
        notifier
            .send(Notification::new(
                NotificationEvent::SettlementPaid,
                "Settlement paid",
            ))
            .await;
    }
}
