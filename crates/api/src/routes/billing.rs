//! Billing routes: subscription lifecycle and billing history

use axum::{
    extract::{Extension, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use courtside_billing::UpcomingBill;
use courtside_shared::types::{Invoice, Subscription, User};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Request to create a subscription
#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub plan_id: String,
    pub billing_name: String,
    /// Card token minted by the gateway's JS on the client
    #[serde(default)]
    pub payment_token: String,
}

/// Request to stage a plan change for the next renewal
#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub plan_id: String,
}

/// Request to replace the default payment method
#[derive(Debug, Deserialize)]
pub struct UpdatePaymentMethodRequest {
    pub billing_name: String,
    #[serde(default)]
    pub payment_token: String,
}

/// Subscription info response
#[derive(Debug, Serialize)]
pub struct SubscriptionInfo {
    pub plan_id: String,
    pub plan_name: String,
    /// Plan taking effect at the next renewal (same as `plan_id` when no
    /// change is pending)
    pub new_plan_id: String,
    pub new_plan_name: String,
    pub pending_change: bool,
    pub current_period_start: String,
    pub current_period_end: String,
}

/// A plan available for subscription
#[derive(Debug, Serialize)]
pub struct PlanInfo {
    pub id: String,
    pub name: String,
    pub amount: i64,
    pub currency: String,
}

/// One row of billing history
#[derive(Debug, Serialize)]
pub struct InvoiceInfo {
    pub plan_name: String,
    pub description: String,
    pub period_start_on: String,
    pub period_end_on: String,
    pub currency: String,
    pub total: i64,
    pub brand: String,
    pub last4: String,
    pub download_url: Option<String>,
    pub created_at: String,
}

/// Card response after a payment-method update
#[derive(Debug, Serialize)]
pub struct CardInfo {
    pub brand: String,
    pub last4: String,
    pub exp_date: String,
    pub is_expiring: bool,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

async fn load_user(state: &AppState, id: Uuid) -> ApiResult<User> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.pool)
        .await?;
    user.ok_or(ApiError::NotFound)
}

async fn find_subscription(state: &AppState, user_id: Uuid) -> ApiResult<Option<Subscription>> {
    let subscription: Option<Subscription> =
        sqlx::query_as("SELECT * FROM subscriptions WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&state.pool)
            .await?;
    Ok(subscription)
}

fn subscription_info(state: &AppState, subscription: &Subscription) -> SubscriptionInfo {
    let plans = &state.billing.plans;
    SubscriptionInfo {
        plan_id: subscription.plan_id.clone(),
        plan_name: plans.name_for(&subscription.plan_id),
        new_plan_id: subscription.new_plan_id.clone(),
        new_plan_name: plans.name_for(&subscription.new_plan_id),
        pending_change: subscription.has_pending_change(),
        current_period_start: subscription
            .current_period_start
            .format(&Rfc3339)
            .unwrap_or_default(),
        current_period_end: subscription
            .current_period_end
            .format(&Rfc3339)
            .unwrap_or_default(),
    }
}

/// List the subscribable plans
pub async fn list_plans(State(state): State<AppState>) -> Json<Vec<PlanInfo>> {
    let plans = state
        .billing
        .plans
        .all()
        .iter()
        .map(|p| PlanInfo {
            id: p.id.clone(),
            name: p.name.clone(),
            amount: p.amount,
            currency: p.currency.clone(),
        })
        .collect();
    Json(plans)
}

/// Create a subscription for the authenticated user
pub async fn subscribe(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<SubscribeRequest>,
) -> ApiResult<Json<SubscriptionInfo>> {
    if state.billing.plans.by_id(&req.plan_id).is_none() {
        return Err(ApiError::BadRequest(format!("Unknown plan: {}", req.plan_id)));
    }

    let user = load_user(&state, auth_user.id).await?;

    if find_subscription(&state, user.id).await?.is_some() {
        return Err(ApiError::Conflict(
            "You already have an active subscription".to_string(),
        ));
    }

    let subscription = state
        .billing
        .subscriptions
        .create(&user, &req.billing_name, &req.plan_id, &req.payment_token)
        .await?;

    Ok(Json(subscription_info(&state, &subscription)))
}

/// Stage a plan change; it takes effect at the next renewal
pub async fn change_plan(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<ChangePlanRequest>,
) -> ApiResult<Json<SubscriptionInfo>> {
    if state.billing.plans.by_id(&req.plan_id).is_none() {
        return Err(ApiError::BadRequest(format!("Unknown plan: {}", req.plan_id)));
    }

    let user = load_user(&state, auth_user.id).await?;

    let current = find_subscription(&state, user.id)
        .await?
        .ok_or(ApiError::NoSubscription)?;
    if current.new_plan_id == req.plan_id {
        return Err(ApiError::BadRequest(
            "You are already on this plan".to_string(),
        ));
    }

    let subscription = state
        .billing
        .subscriptions
        .change_plan(&user, &req.plan_id)
        .await?;

    Ok(Json(subscription_info(&state, &subscription)))
}

/// Cancel the authenticated user's subscription
pub async fn cancel(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<serde_json::Value>> {
    let user = load_user(&state, auth_user.id).await?;

    find_subscription(&state, user.id)
        .await?
        .ok_or(ApiError::NoSubscription)?;

    state.billing.subscriptions.cancel(&user).await?;

    Ok(Json(serde_json::json!({ "status": "cancelled" })))
}

/// Replace the default payment method
pub async fn update_payment_method(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<UpdatePaymentMethodRequest>,
) -> ApiResult<Json<CardInfo>> {
    let user = load_user(&state, auth_user.id).await?;

    let existing: Option<courtside_shared::types::Card> =
        sqlx::query_as("SELECT * FROM cards WHERE user_id = $1")
            .bind(user.id)
            .fetch_optional(&state.pool)
            .await?;
    if existing.is_none() {
        return Err(ApiError::BadRequest(
            "You do not have a payment method on file".to_string(),
        ));
    }

    let card = state
        .billing
        .subscriptions
        .update_payment_method(&user, &req.billing_name, &req.payment_token)
        .await?;

    Ok(Json(CardInfo {
        brand: card.brand,
        last4: card.last4,
        exp_date: card.exp_date.to_string(),
        is_expiring: card.is_expiring,
    }))
}

/// Current subscription details
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<SubscriptionInfo>> {
    let subscription = find_subscription(&state, auth_user.id)
        .await?
        .ok_or(ApiError::NoSubscription)?;

    Ok(Json(subscription_info(&state, &subscription)))
}

/// Preview of the next bill
pub async fn upcoming(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<UpcomingBill>> {
    let user = load_user(&state, auth_user.id).await?;
    let customer_id = user.payment_id.as_deref().ok_or(ApiError::NoSubscription)?;

    let bill = state.billing.invoices.upcoming(customer_id).await?;

    Ok(Json(bill))
}

/// Billing history, newest first
pub async fn history(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<InvoiceInfo>>> {
    // Default to the last 12 billing periods
    let limit = query.limit.unwrap_or(12).clamp(1, 100);

    let invoices = state
        .billing
        .invoices
        .billing_history(auth_user.id, limit)
        .await?;

    Ok(Json(invoices.iter().map(invoice_info).collect()))
}

fn invoice_info(invoice: &Invoice) -> InvoiceInfo {
    InvoiceInfo {
        plan_name: invoice.plan_name.clone(),
        description: invoice.description.clone(),
        period_start_on: invoice.period_start_on.to_string(),
        period_end_on: invoice.period_end_on.to_string(),
        currency: invoice.currency.clone(),
        total: invoice.total,
        brand: invoice.brand.clone(),
        last4: invoice.last4.clone(),
        download_url: invoice.download_url.clone(),
        created_at: invoice.created_at.format(&Rfc3339).unwrap_or_default(),
    }
}
