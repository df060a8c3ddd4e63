//! Application state management

use std::sync::Arc;

use buzz_core::budget::{BudgetPolicyStore, InMemoryBudgetPolicyStore};
use buzz_core::business::{BusinessDirectory, InMemoryBusinessDirectory};
use buzz_core::coupon::{CouponRepository, InMemoryCouponRepository};
use buzz_core::mileage::{InMemoryMileageRepository, MileageRepository};
use buzz_core::qr::QrSigner;
use buzz_core::settlement::{InMemorySettlementRepository, SettlementRepository};

use crate::config::ApiConfig;
use crate::database::connection::DatabasePool;
use crate::database::repositories::{
    SqlxBudgetPolicyStore, SqlxBusinessDirectory, SqlxCouponRepository, SqlxMileageRepository,
    SqlxSettlementRepository,
};
use crate::middleware::audit::AuditLogger;
use crate::middleware::auth::AuthService;
use crate::notify::{LogNotifier, NotificationSender, WebhookNotifier};

/// Application state shared across route handlers
pub struct AppState {
    /// Service configuration
    pub config: ApiConfig,
    /// Mileage accounts and transaction ledger
    pub mileage: Arc<dyn MileageRepository>,
    /// Coupon templates and issued coupons
    pub coupons: Arc<dyn CouponRepository>,
    /// Settlement requests
    pub settlements: Arc<dyn SettlementRepository>,
    /// Business directory
    pub businesses: Arc<dyn BusinessDirectory>,
    /// Budget policy storage
    pub budget: Arc<dyn BudgetPolicyStore>,
    /// QR payload signer
    pub qr: QrSigner,
    /// JWT authentication service
    pub auth: AuthService,
    /// Audit logger
    pub audit: AuditLogger,
    /// Notification sender
    pub notifier: Arc<dyn NotificationSender>,
    /// Database pool, present when running against Postgres
    pub database: Option<DatabasePool>,
}

impl AppState {
    /// Create state backed by in-memory repositories
    ///
    /// Used by tests and by local runs without a `DATABASE_URL`.
    pub fn in_memory(config: ApiConfig) -> Self {
        let businesses = Arc::new(InMemoryBusinessDirectory::default());
        let coupons: Arc<dyn CouponRepository> =
            Arc::new(InMemoryCouponRepository::new(businesses.clone()));

        let qr = QrSigner::new(config.qr_signing_key.as_bytes());
        let notifier = Self::build_notifier(&config);

        Self {
            config,
            mileage: Arc::new(InMemoryMileageRepository::default()),
            coupons,
            settlements: Arc::new(InMemorySettlementRepository::default()),
            businesses,
            budget: Arc::new(InMemoryBudgetPolicyStore::default()),
            qr,
            auth: AuthService::new(),
            audit: AuditLogger::new(),
            notifier,
            database: None,
        }
    }

    /// Create state backed by Postgres repositories
    pub fn postgres(config: ApiConfig, pool: DatabasePool) -> Self {
        let qr = QrSigner::new(config.qr_signing_key.as_bytes());
        let notifier = Self::build_notifier(&config);

        Self {
            config,
            mileage: Arc::new(SqlxMileageRepository::new(pool.clone())),
            coupons: Arc::new(SqlxCouponRepository::new(pool.clone())),
            settlements: Arc::new(SqlxSettlementRepository::new(pool.clone())),
            businesses: Arc::new(SqlxBusinessDirectory::new(pool.clone())),
            budget: Arc::new(SqlxBudgetPolicyStore::new(pool.clone())),
            qr,
            auth: AuthService::new(),
            audit: AuditLogger::new(),
            notifier,
            database: Some(pool),
        }
    }

    fn build_notifier(config: &ApiConfig) -> Arc<dyn NotificationSender> {
        match &config.notify_webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
            None => Arc::new(LogNotifier),
        }
    }
}
