//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use courtside_billing::{BillingError, GatewayError};
use serde_json::json;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Email already registered")]
    EmailAlreadyExists,
    #[error("Username already taken")]
    UsernameAlreadyExists,
    #[error("Authentication required")]
    Unauthorized,
    #[error("Insufficient permissions")]
    Forbidden,

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Resource errors
    #[error("Resource not found")]
    NotFound,
    #[error("Resource already exists: {0}")]
    Conflict(String),

    // Billing errors
    #[error("{0}")]
    PaymentDeclined(String),
    #[error("{0}")]
    PaymentProvider(String),
    #[error("No active subscription")]
    NoSubscription,

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
    #[error("Service unavailable")]
    ServiceUnavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Authentication
            ApiError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS", self.to_string())
            }
            ApiError::EmailAlreadyExists => {
                (StatusCode::CONFLICT, "EMAIL_EXISTS", self.to_string())
            }
            ApiError::UsernameAlreadyExists => {
                (StatusCode::CONFLICT, "USERNAME_EXISTS", self.to_string())
            }
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", self.to_string()),

            // Validation
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            // Resources
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),

            // Billing
            ApiError::PaymentDeclined(msg) => {
                (StatusCode::PAYMENT_REQUIRED, "PAYMENT_DECLINED", msg.clone())
            }
            ApiError::PaymentProvider(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "PAYMENT_PROVIDER", msg.clone())
            }
            ApiError::NoSubscription => {
                (StatusCode::NOT_FOUND, "NO_SUBSCRIPTION", self.to_string())
            }

            // Internal
            ApiError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "Database error".to_string(),
            ),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", self.to_string()),
            ApiError::ServiceUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", self.to_string())
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            sqlx::Error::Database(db_err) => {
                // PostgreSQL unique violation
                if db_err.code().as_deref() == Some("23505") {
                    ApiError::Conflict("Resource already exists".to_string())
                } else {
                    ApiError::Database(db_err.to_string())
                }
            }
            other => ApiError::Database(other.to_string()),
        }
    }
}

/// Translate billing failures into user-facing responses
///
/// Gateway errors reach this boundary uncaught; each class gets its own
/// message rather than a raw 500.
impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::MissingPaymentToken => ApiError::Validation(
                "Please enable JavaScript in your browser and try again".to_string(),
            ),
            BillingError::Gateway(GatewayError::CardDeclined(msg)) => {
                ApiError::PaymentDeclined(format!("Your card was declined: {}", msg))
            }
            BillingError::Gateway(GatewayError::Connectivity(_)) => ApiError::PaymentProvider(
                "We could not reach our payment processor. Please try again shortly".to_string(),
            ),
            BillingError::Gateway(e) => {
                tracing::error!(error = %e, "Gateway request failed");
                ApiError::PaymentProvider(
                    "Our payment processor rejected the request. Please contact support"
                        .to_string(),
                )
            }
            BillingError::SubscriptionNotFound(_) => ApiError::NoSubscription,
            BillingError::CustomerNotFound(_)
            | BillingError::CardNotFound(_)
            | BillingError::UserNotFound(_) => ApiError::NotFound,
            BillingError::InvalidPlan(plan) => {
                ApiError::BadRequest(format!("Unknown plan: {}", plan))
            }
            BillingError::InvalidEvent(msg) => ApiError::BadRequest(msg),
            BillingError::Database(msg) => ApiError::Database(msg),
            BillingError::Config(msg) => {
                tracing::error!(error = %msg, "Billing misconfigured");
                ApiError::ServiceUnavailable
            }
            BillingError::Internal(msg) => {
                tracing::error!(error = %msg, "Billing internal error");
                ApiError::Internal
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_token_maps_to_validation() {
        let err = ApiError::from(BillingError::MissingPaymentToken);
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn test_decline_maps_to_payment_declined() {
        let err = ApiError::from(BillingError::Gateway(GatewayError::CardDeclined(
            "insufficient funds".to_string(),
        )));
        match err {
            ApiError::PaymentDeclined(msg) => assert!(msg.contains("insufficient funds")),
            other => panic!("unexpected mapping: {:?}", other),
        }
    }

    #[test]
    fn test_connectivity_maps_to_provider_error() {
        let err = ApiError::from(BillingError::Gateway(GatewayError::Connectivity(
            "timed out".to_string(),
        )));
        assert!(matches!(err, ApiError::PaymentProvider(_)));
    }
}
