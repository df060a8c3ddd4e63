//! Mileage accounts and the append-only transaction ledger

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

pub mod memory;

pub use memory::InMemoryMileageRepository;

/// Ledger transaction types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Earn,       // Points granted
    Use,        // Points spent at a business
    Expire,     // Points lapsed past their expiry date
    Cancel,     // Earn reversal (order cancelled)
    Refund,     // Use reversal (purchase refunded)
}

impl TransactionKind {
    /// Credits increase the balance, debits decrease it.
    pub fn is_credit(&self) -> bool {
        matches!(self, TransactionKind::Earn | TransactionKind::Refund)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Earn => "earn",
            TransactionKind::Use => "use",
            TransactionKind::Expire => "expire",
            TransactionKind::Cancel => "cancel",
            TransactionKind::Refund => "refund",
        }
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "earn" => Ok(TransactionKind::Earn),
            "use" => Ok(TransactionKind::Use),
            "expire" => Ok(TransactionKind::Expire),
            "cancel" => Ok(TransactionKind::Cancel),
            "refund" => Ok(TransactionKind::Refund),
            other => Err(Error::Validation(format!(
                "unknown transaction type '{}'",
                other
            ))),
        }
    }
}

/// Mileage account, one per user
///
/// The balance and the lifetime counters are bound by the accounting
/// identity `balance = total_earned - total_used - total_expired`; every
/// mutation goes through [`MileageAccount::apply`] so the identity cannot
/// drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MileageAccount {
    pub user_id: Uuid,
    pub balance: Decimal,
    pub total_earned: Decimal,
    pub total_used: Decimal,
    pub total_expired: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl MileageAccount {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            balance: Decimal::ZERO,
            total_earned: Decimal::ZERO,
            total_used: Decimal::ZERO,
            total_expired: Decimal::ZERO,
            updated_at: Utc::now(),
        }
    }

    /// True when the accounting identity holds and the balance is
    /// non-negative.
    pub fn is_consistent(&self) -> bool {
        self.balance == self.total_earned - self.total_used - self.total_expired
            && self.balance >= Decimal::ZERO
    }

    /// Apply one ledger event to the account and return the
    /// `(balance_before, balance_after)` snapshot pair.
    ///
    /// Debits fail with `InsufficientBalance` when the balance cannot
    /// cover the amount; the account is left untouched on any error.
    /// Credits accrue to `total_earned`, debits to `total_used` except
    /// for expiry which accrues to `total_expired`, so the lifetime
    /// counters only ever grow.
    pub fn apply(
        &mut self,
        kind: TransactionKind,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(Decimal, Decimal)> {
        if amount <= Decimal::ZERO {
            return Err(Error::Validation(
                "transaction amount must be positive".to_string(),
            ));
        }

        let before = self.balance;
        let after = if kind.is_credit() {
            self.total_earned += amount;
            before + amount
        } else {
            if before < amount {
                return Err(Error::InsufficientBalance {
                    balance: before,
                    requested: amount,
                });
            }
            match kind {
                TransactionKind::Expire => self.total_expired += amount,
                _ => self.total_used += amount,
            }
            before - amount
        };

        self.balance = after;
        self.updated_at = now;
        Ok((before, after))
    }
}

/// One ledger event, immutable once written
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MileageTransaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub description: Option<String>,

    // Free-form link to the originating entity (review, referral,
    // qr_payment, mileage_earn for expiry sweeps)
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,

    // Business the points were spent at, for settlement aggregation
    pub business_id: Option<Uuid>,

    // Only meaningful for earn transactions
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Context accompanying a ledger event
#[derive(Debug, Clone, Default)]
pub struct TransactionContext {
    pub description: Option<String>,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub business_id: Option<Uuid>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Reference type written on expiry sweep transactions, pointing back at
/// the earn row they consumed.
pub const EXPIRY_REFERENCE_TYPE: &str = "mileage_earn";

/// Repository trait for mileage operations
///
/// `record` is the serialization point required by the ledger: the
/// balance read, the ledger insert and the account update form one
/// atomic unit, and concurrent units touching the same account must not
/// observe each other's intermediate state (no lost updates).
#[async_trait::async_trait]
pub trait MileageRepository: Send + Sync {
    /// Fetch the account, creating an empty one on first access.
    async fn get_or_create_account(&self, user_id: &Uuid) -> Result<MileageAccount>;

    /// Atomically append one ledger row and update the account.
    async fn record(
        &self,
        user_id: &Uuid,
        kind: TransactionKind,
        amount: Decimal,
        context: &TransactionContext,
    ) -> Result<MileageTransaction>;

    /// Transaction history, newest first. `page` is 1-based.
    async fn list_transactions(
        &self,
        user_id: &Uuid,
        kind: Option<TransactionKind>,
        page: i32,
        page_size: i32,
    ) -> Result<(Vec<MileageTransaction>, i64)>;

    /// Sum of earn amounts whose expiry falls within `(from, to]` and
    /// which have not already lapsed.
    async fn expiring_amount(
        &self,
        user_id: &Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Decimal>;

    /// Sweep earn rows whose expiry has passed, writing clamped expire
    /// transactions. With `dry_run` the affected rows are reported
    /// without mutating anything. Returns the expire transactions
    /// (written or projected) and the number of users affected.
    async fn expire_due(
        &self,
        as_of: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<(Vec<MileageTransaction>, i64)>;

    /// Count and sum of `use` transactions for a business within
    /// `[from, to)`, for settlement aggregation.
    async fn used_total_for_business(
        &self,
        business_id: &Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<(i64, Decimal)>;

    /// Sum of earn amounts within `[from, to)`, for budget monitoring.
    async fn earned_total(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Decimal>;
}
