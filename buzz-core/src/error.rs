//! Error types for the ledger and reward engine

use rust_decimal::Decimal;
use thiserror::Error;

/// Custom error type for engine operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Invalid QR code: {0}")]
    InvalidQrCode(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Insufficient balance: requested {requested}, available {balance}")]
    InsufficientBalance { balance: Decimal, requested: Decimal },

    #[error("Coupon has expired")]
    CouponExpired,

    #[error("Coupon is not active: {0}")]
    CouponNotActive(String),

    #[error("Coupon cannot be used at this business")]
    CouponNotApplicable,

    #[error("Minimum purchase amount not met: requires {min}, got {got}")]
    MinPurchaseNotMet { min: Decimal, got: Decimal },

    #[error("Coupon quantity exhausted")]
    QuantityExhausted,

    #[error("Coupon is outside its validity period")]
    OutsideValidity,

    #[error("Invalid settlement date: {0}")]
    InvalidSettlementDate(String),

    #[error("No transactions found for the requested settlement date")]
    NoTransactions,

    #[error("A pending settlement request already exists for this business")]
    PendingSettlementExists,

    #[error("A settlement request already exists for this date")]
    DuplicateSettlementDate,

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Business is suspended")]
    BusinessSuspended,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable machine-readable code used in API responses and audit records.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION",
            Error::InvalidQrCode(_) => "INVALID_QR_CODE",
            Error::Signing(_) => "SIGNING",
            Error::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Error::CouponExpired => "COUPON_EXPIRED",
            Error::CouponNotActive(_) => "COUPON_NOT_ACTIVE",
            Error::CouponNotApplicable => "COUPON_NOT_APPLICABLE",
            Error::MinPurchaseNotMet { .. } => "MIN_PURCHASE_NOT_MET",
            Error::QuantityExhausted => "QUANTITY_EXHAUSTED",
            Error::OutsideValidity => "OUTSIDE_VALIDITY",
            Error::InvalidSettlementDate(_) => "INVALID_SETTLEMENT_DATE",
            Error::NoTransactions => "NO_TRANSACTIONS",
            Error::PendingSettlementExists => "PENDING_SETTLEMENT_EXISTS",
            Error::DuplicateSettlementDate => "DUPLICATE_SETTLEMENT_DATE",
            Error::InvalidTransition { .. } => "INVALID_TRANSITION",
            Error::BusinessSuspended => "BUSINESS_SUSPENDED",
            Error::NotFound(_) => "NOT_FOUND",
            Error::PermissionDenied(_) => "PERMISSION_DENIED",
            Error::Storage(_) => "STORAGE",
        }
    }
}
