//! Error handling for HTTP route handlers
//!
//! Maps engine errors onto HTTP statuses in one place so every route
//! reports failures the same way: validation 400, state conflicts 409,
//! unknown or unowned resources 404, storage failures 500 with a
//! generic body outside debug builds.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use buzz_core::Error as CoreError;

/// Error returned by route handlers
#[derive(Debug)]
pub enum ApiError {
    /// Domain error from the engine
    Core(CoreError),
    /// Missing or unverifiable bearer token
    Unauthorized(String),
    /// Authenticated but not allowed
    Forbidden(String),
    /// Malformed request rejected before reaching the engine
    BadRequest(String),
}

/// Result type for route handlers
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// JSON body attached to every error response
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Core(err) => core_status(err),
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Core(err) => err.code(),
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "PERMISSION_DENIED",
            ApiError::BadRequest(_) => "VALIDATION",
        }
    }
}

fn core_status(err: &CoreError) -> StatusCode {
    match err {
        CoreError::Validation(_)
        | CoreError::InvalidQrCode(_)
        | CoreError::InsufficientBalance { .. }
        | CoreError::CouponExpired
        | CoreError::CouponNotActive(_)
        | CoreError::CouponNotApplicable
        | CoreError::MinPurchaseNotMet { .. }
        | CoreError::OutsideValidity
        | CoreError::InvalidSettlementDate(_)
        | CoreError::NoTransactions => StatusCode::BAD_REQUEST,
        CoreError::QuantityExhausted
        | CoreError::PendingSettlementExists
        | CoreError::DuplicateSettlementDate
        | CoreError::InvalidTransition { .. }
        | CoreError::BusinessSuspended => StatusCode::CONFLICT,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        CoreError::Signing(_) | CoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let message = match &self {
            ApiError::Core(err) if status == StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(code = code, error = %err, "internal error");
                if cfg!(debug_assertions) {
                    err.to_string()
                } else {
                    "Internal server error".to_string()
                }
            }
            ApiError::Core(err) => err.to_string(),
            ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::BadRequest(msg) => msg.clone(),
        };

        (status, Json(ErrorBody { code, message })).into_response()
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError::Core(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn statuses_follow_the_taxonomy() {
        let cases = [
            (
                ApiError::Core(CoreError::InsufficientBalance {
                    balance: Decimal::ZERO,
                    requested: Decimal::ONE,
                }),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::Core(CoreError::PendingSettlementExists),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::Core(CoreError::NotFound("Coupon".to_string())),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::Core(CoreError::Storage("boom".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                ApiError::Unauthorized("no token".to_string()),
                StatusCode::UNAUTHORIZED,
            ),
            (
                ApiError::Forbidden("admin only".to_string()),
                StatusCode::FORBIDDEN,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(err.status(), expected);
        }
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            ApiError::Core(CoreError::CouponExpired).code(),
            "COUPON_EXPIRED"
        );
        assert_eq!(
            ApiError::Unauthorized("x".to_string()).code(),
            "UNAUTHORIZED"
        );
    }
}
