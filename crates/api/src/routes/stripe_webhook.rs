//! Gateway webhook endpoints
//!
//! Inbound bodies are untrusted: the event is looked up by ID directly
//! with the gateway before anything acts on it, which stands in for a
//! signature check. Response policy:
//! - unverifiable event (non-JSON body, missing id, gateway lookup
//!   failure) -> 422, final, the gateway should stop retrying;
//! - processing failure after verification -> 200 with an `error` field,
//!   so redelivery cannot duplicate side effects;
//! - success -> 200 `{"success": true}`.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use courtside_billing::{BillingResult, GatewayEvent, PaymentGateway};

use crate::state::AppState;

/// Pull the event ID out of a webhook body
///
/// Errors describe why the envelope is unusable; they become 422s.
fn parse_event_id(body: &str) -> Result<String, String> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|_| "Request body is not valid JSON".to_string())?;

    value
        .get("id")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| "Invalid gateway event".to_string())
}

fn unverifiable(message: String) -> Response {
    (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "error": message }))).into_response()
}

/// Verify the event by fetching it back from the gateway by ID
async fn verify_event(state: &AppState, body: &str) -> Result<GatewayEvent, Response> {
    let event_id = parse_event_id(body).map_err(unverifiable)?;

    state
        .billing
        .gateway
        .retrieve_event(&event_id)
        .await
        .map_err(|e| {
            tracing::warn!(event_id = %event_id, error = %e, "Webhook event failed verification");
            unverifiable(e.to_string())
        })
}

/// Map a reconciler outcome onto the webhook response policy
fn respond(event_id: &str, result: BillingResult<()>) -> Response {
    match result {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))).into_response(),
        Err(e) => {
            // Acknowledged so the gateway stops redelivering; the state
            // it refers to is not going to come back on retry
            tracing::error!(
                event_id = %event_id,
                error = %e,
                "Webhook processing failed, acknowledging to stop retries"
            );
            (StatusCode::OK, Json(json!({ "error": e.to_string() }))).into_response()
        }
    }
}

/// Event: `invoice.payment_succeeded` — record the invoice locally
pub async fn invoice_payment_succeeded(State(state): State<AppState>, body: String) -> Response {
    let event = match verify_event(&state, &body).await {
        Ok(event) => event,
        Err(response) => return response,
    };

    let result = state.billing.reconciler.invoice_payment_succeeded(&event).await;
    respond(&event.id, result)
}

/// Event: `invoice.payment_failed` — cancel the delinquent subscription
pub async fn invoice_payment_failed(State(state): State<AppState>, body: String) -> Response {
    let event = match verify_event(&state, &body).await {
        Ok(event) => event,
        Err(response) => return response,
    };

    let result = state.billing.reconciler.invoice_payment_failed(&event).await;
    respond(&event.id, result)
}

/// Event: `customer.subscription.updated` — reconcile a renewal
pub async fn subscription_updated(State(state): State<AppState>, body: String) -> Response {
    let event = match verify_event(&state, &body).await {
        Ok(event) => event,
        Err(response) => return response,
    };

    let result = state.billing.reconciler.subscription_updated(&event).await;
    respond(&event.id, result)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use courtside_billing::BillingError;

    #[test]
    fn test_parse_event_id() {
        assert_eq!(parse_event_id(r#"{"id": "evt_1"}"#).unwrap(), "evt_1");
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(parse_event_id("<xml/>").is_err());
    }

    #[test]
    fn test_parse_rejects_missing_or_non_string_id() {
        assert!(parse_event_id(r#"{"type": "invoice.payment_succeeded"}"#).is_err());
        assert!(parse_event_id(r#"{"id": 42}"#).is_err());
    }

    #[test]
    fn test_processing_failure_is_acknowledged_with_200() {
        let response = respond(
            "evt_1",
            Err(BillingError::SubscriptionNotFound("sub_1".to_string())),
        );
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_success_is_200() {
        let response = respond("evt_1", Ok(()));
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_unverifiable_is_422() {
        let response = unverifiable("bad".to_string());
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
