//! API routes

pub mod auth;
pub mod billing;
pub mod health;
pub mod stripe_webhook;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::require_auth;
use crate::state::AppState;

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness));

    // Public API routes (no auth required) - under /api/v1
    let public_api_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/billing/plans", get(billing::list_plans));

    // Protected API routes - under /api/v1
    let protected_api_routes = Router::new()
        .route("/billing/subscribe", post(billing::subscribe))
        .route("/billing/plan", post(billing::change_plan))
        .route("/billing/cancel", post(billing::cancel))
        .route("/billing/payment-method", post(billing::update_payment_method))
        .route("/billing/subscription", get(billing::get_subscription))
        .route("/billing/upcoming", get(billing::upcoming))
        .route("/billing/history", get(billing::history))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // Gateway webhooks: no bearer auth; each event is verified by
    // fetching it back from the gateway by ID
    let webhook_routes = Router::new()
        .route(
            "/invoice_payment_succeeded",
            post(stripe_webhook::invoice_payment_succeeded),
        )
        .route(
            "/invoice_payment_failed",
            post(stripe_webhook::invoice_payment_failed),
        )
        .route(
            "/subscription_updated",
            post(stripe_webhook::subscription_updated),
        );

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", public_api_routes.merge(protected_api_routes))
        .nest("/stripe_webhook", webhook_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
