//! API server configuration

/// Runtime configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Address the HTTP server binds to
    pub listen_addr: String,
    /// Key used to sign mileage and coupon QR payloads
    pub qr_signing_key: String,
    /// Days between a settlement request and its estimated payout
    pub payout_lead_days: i64,
    /// Webhook endpoint for redemption/settlement notifications
    pub notify_webhook_url: Option<String>,
}

impl ApiConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let listen_addr = std::env::var("API_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let qr_signing_key = std::env::var("QR_SIGNING_KEY")
            .unwrap_or_else(|_| "default_qr_key_change_in_production".to_string());

        let payout_lead_days = std::env::var("SETTLEMENT_PAYOUT_LEAD_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse()
            .unwrap_or(7);

        let notify_webhook_url = std::env::var("NOTIFY_WEBHOOK_URL").ok();

        Self {
            listen_addr,
            qr_signing_key,
            payout_lead_days,
            notify_webhook_url,
        }
    }
}
