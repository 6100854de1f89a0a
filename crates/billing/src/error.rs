//! Billing error types

use thiserror::Error;

/// Gateway failure taxonomy
///
/// Every network call to the payment gateway resolves to exactly one of
/// these variants. Callers above the billing layer translate them into
/// user-facing messages; nothing here is rendered directly.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Card declined: {0}")]
    CardDeclined(String),

    #[error("Invalid gateway request: {0}")]
    InvalidRequest(String),

    #[error("Gateway authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Gateway connection failed: {0}")]
    Connectivity(String),

    #[error("Gateway error: {0}")]
    Gateway(String),
}

impl From<stripe::StripeError> for GatewayError {
    fn from(err: stripe::StripeError) -> Self {
        match err {
            stripe::StripeError::Stripe(req) => {
                let message = req
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("HTTP {}", req.http_status));
                if req.http_status == 401 {
                    return GatewayError::AuthenticationFailed(message);
                }
                match req.error_type {
                    stripe::ErrorType::Card => GatewayError::CardDeclined(message),
                    stripe::ErrorType::InvalidRequest => GatewayError::InvalidRequest(message),
                    _ => GatewayError::Gateway(message),
                }
            }
            // Transport, timeout, and client-side serialization failures
            other => GatewayError::Connectivity(other.to_string()),
        }
    }
}

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// An empty payment token guarantees gateway rejection, so it is
    /// refused before any network call is made
    #[error("Missing payment token")]
    MissingPaymentToken,

    #[error("Customer not found: {0}")]
    CustomerNotFound(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Card not found for user: {0}")]
    CardNotFound(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Invalid gateway event: {0}")]
    InvalidEvent(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl BillingError {
    /// True when the error came back from the payment gateway rather
    /// than from local validation or persistence
    pub fn is_gateway(&self) -> bool {
        matches!(self, BillingError::Gateway(_))
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
pub type BillingResult<T> = Result<T, BillingError>;
