//! Integration tests for the subscription lifecycle and webhook
//! reconciliation, driven through the mock gateway.
//!
//! ## Running
//! ```bash
//! export DATABASE_URL="postgres://localhost/courtside_test"
//! cargo test -p courtside-billing -- --ignored --test-threads=1
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used)]

use courtside_billing::gateway::mock::MockGateway;
use courtside_billing::{
    BillingEmailService, EmailConfig, GatewayEvent, InvoiceService, Plan, PlanCatalog,
    PlanInterval, SubscriptionService, WebhookReconciler,
};
use courtside_shared::types::{Card, Subscription, User};
use sqlx::PgPool;
use uuid::Uuid;

const MONTHLY: &str = "price_monthly";
const YEARLY: &str = "price_yearly";

// 2024-01-01 .. 2024-02-01 .. 2024-03-01
const JAN_1: i64 = 1_704_067_200;
const FEB_1: i64 = 1_706_745_600;
const MAR_1: i64 = 1_709_251_200;

fn catalog() -> PlanCatalog {
    PlanCatalog::new(vec![
        Plan {
            id: MONTHLY.to_string(),
            name: "Monthly".to_string(),
            amount: 245,
            currency: "usd".to_string(),
            interval: PlanInterval::Month,
            statement_descriptor: "courtside plan".to_string(),
        },
        Plan {
            id: YEARLY.to_string(),
            name: "Yearly".to_string(),
            amount: 2495,
            currency: "usd".to_string(),
            interval: PlanInterval::Year,
            statement_descriptor: "courtside plan".to_string(),
        },
    ])
}

fn email() -> BillingEmailService {
    // Empty API key disables sending
    BillingEmailService::new(EmailConfig {
        resend_api_key: String::new(),
        email_from: "test@example.com".to_string(),
        app_name: "Courtside".to_string(),
        support_email: "support@example.com".to_string(),
        dashboard_url: "http://localhost:3000".to_string(),
    })
}

async fn setup_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for these tests");
    let pool = PgPool::connect(&url).await.expect("Failed to connect");
    courtside_shared::db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

async fn create_test_user(pool: &PgPool) -> User {
    let id = Uuid::new_v4();
    sqlx::query_as(
        r#"
        INSERT INTO users (id, username, email, password_hash)
        VALUES ($1, $2, $3, 'TEST_HASH')
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(format!("user-{}", id))
    .bind(format!("user-{}@example.com", id))
    .fetch_one(pool)
    .await
    .expect("Failed to create test user")
}

async fn reload_user(pool: &PgPool, id: Uuid) -> User {
    sqlx::query_as("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .expect("Failed to reload user")
}

async fn find_subscription(pool: &PgPool, user_id: Uuid) -> Option<Subscription> {
    sqlx::query_as("SELECT * FROM subscriptions WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .expect("Failed to query subscription")
}

async fn find_card(pool: &PgPool, user_id: Uuid) -> Option<Card> {
    sqlx::query_as("SELECT * FROM cards WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .expect("Failed to query card")
}

fn subscription_updated_event(subscription: &Subscription, start: i64, end: i64) -> GatewayEvent {
    GatewayEvent {
        id: format!("evt_{}", Uuid::new_v4()),
        event_type: "customer.subscription.updated".to_string(),
        object: serde_json::json!({
            "id": subscription.subscription_id,
            "customer": "cus_0",
            "current_period_start": start,
            "current_period_end": end,
        }),
    }
}

#[tokio::test]
#[ignore] // Requires database
async fn test_create_sets_plan_and_clears_cancellation() {
    let pool = setup_pool().await;
    let gateway = MockGateway::new();
    gateway.set_next_period(JAN_1, FEB_1);
    let service = SubscriptionService::new(gateway, pool.clone(), catalog(), email());

    let user = create_test_user(&pool).await;
    let subscription = service
        .create(&user, "Ann Example", MONTHLY, "tok_visa")
        .await
        .expect("create failed");

    assert_eq!(subscription.plan_id, MONTHLY);
    assert_eq!(subscription.new_plan_id, MONTHLY);
    assert!(subscription.subscription_schedule_id.is_none());
    assert!(subscription.current_period_start < subscription.current_period_end);

    let user = reload_user(&pool, user.id).await;
    assert!(user.payment_id.is_some());
    assert_eq!(user.billing_name.as_deref(), Some("Ann Example"));
    assert!(user.cancelled_subscription_on.is_none());

    let card = find_card(&pool, user.id).await.expect("card missing");
    assert_eq!(card.last4, "4242");
}

#[tokio::test]
#[ignore] // Requires database
async fn test_change_plan_stages_pending_change() {
    let pool = setup_pool().await;
    let gateway = MockGateway::new();
    gateway.set_next_period(JAN_1, FEB_1);
    let service = SubscriptionService::new(gateway, pool.clone(), catalog(), email());

    let user = create_test_user(&pool).await;
    service
        .create(&user, "Ann Example", MONTHLY, "tok_visa")
        .await
        .expect("create failed");
    let user = reload_user(&pool, user.id).await;

    let updated = service
        .change_plan(&user, YEARLY)
        .await
        .expect("change_plan failed");

    // The switch is deferred: active plan untouched, pending plan and
    // schedule recorded
    assert_eq!(updated.plan_id, MONTHLY);
    assert_eq!(updated.new_plan_id, YEARLY);
    assert!(updated.subscription_schedule_id.is_some());
}

#[tokio::test]
#[ignore] // Requires database
async fn test_renewal_webhook_promotes_pending_plan_idempotently() {
    let pool = setup_pool().await;
    let gateway = MockGateway::new();
    gateway.set_next_period(JAN_1, FEB_1);
    let service = SubscriptionService::new(gateway.clone(), pool.clone(), catalog(), email());
    let reconciler = WebhookReconciler::new(gateway.clone(), pool.clone(), catalog(), email(), false);

    let user = create_test_user(&pool).await;
    service
        .create(&user, "Ann Example", MONTHLY, "tok_visa")
        .await
        .expect("create failed");
    let user = reload_user(&pool, user.id).await;
    let staged = service
        .change_plan(&user, YEARLY)
        .await
        .expect("change_plan failed");

    // Renewal rolls the period from Jan..Feb to Feb..Mar
    let event = subscription_updated_event(&staged, FEB_1, MAR_1);
    reconciler
        .subscription_updated(&event)
        .await
        .expect("reconcile failed");

    let subscription = find_subscription(&pool, user.id).await.expect("gone");
    assert_eq!(subscription.plan_id, YEARLY);
    assert_eq!(subscription.new_plan_id, YEARLY);
    assert!(subscription.subscription_schedule_id.is_none());
    assert_eq!(subscription.current_period_start.unix_timestamp(), FEB_1);
    assert_eq!(subscription.current_period_end.unix_timestamp(), MAR_1);
    assert_eq!(gateway.release_calls(), 1);

    // Redelivery finds matching bounds and does nothing further
    reconciler
        .subscription_updated(&event)
        .await
        .expect("redelivery failed");
    let after = find_subscription(&pool, user.id).await.expect("gone");
    assert_eq!(after.plan_id, YEARLY);
    assert_eq!(after.updated_at, subscription.updated_at);
    assert_eq!(gateway.release_calls(), 1);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_same_cycle_update_is_a_no_op() {
    let pool = setup_pool().await;
    let gateway = MockGateway::new();
    gateway.set_next_period(JAN_1, FEB_1);
    let service = SubscriptionService::new(gateway.clone(), pool.clone(), catalog(), email());
    let reconciler = WebhookReconciler::new(gateway.clone(), pool.clone(), catalog(), email(), false);

    let user = create_test_user(&pool).await;
    let created = service
        .create(&user, "Ann Example", MONTHLY, "tok_visa")
        .await
        .expect("create failed");

    // Same bounds as stored: a metadata-only update
    let event = subscription_updated_event(&created, JAN_1, FEB_1);
    reconciler
        .subscription_updated(&event)
        .await
        .expect("reconcile failed");

    let subscription = find_subscription(&pool, user.id).await.expect("gone");
    assert_eq!(subscription.plan_id, MONTHLY);
    assert_eq!(subscription.updated_at, created.updated_at);
    assert_eq!(gateway.release_calls(), 0);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_cancel_round_trip() {
    let pool = setup_pool().await;
    let gateway = MockGateway::new();
    gateway.set_next_period(JAN_1, FEB_1);
    let service = SubscriptionService::new(gateway, pool.clone(), catalog(), email());

    let user = create_test_user(&pool).await;
    service
        .create(&user, "Ann Example", MONTHLY, "tok_visa")
        .await
        .expect("create failed");
    let user = reload_user(&pool, user.id).await;

    let before = time::OffsetDateTime::now_utc();
    service.cancel(&user).await.expect("cancel failed");
    let after = time::OffsetDateTime::now_utc();

    assert!(find_subscription(&pool, user.id).await.is_none());
    assert!(find_card(&pool, user.id).await.is_none());

    let user = reload_user(&pool, user.id).await;
    let cancelled_on = user
        .cancelled_subscription_on
        .expect("cancellation timestamp missing");
    assert!(cancelled_on >= before && cancelled_on <= after);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_payment_failed_cancels_even_without_card() {
    let pool = setup_pool().await;
    let gateway = MockGateway::new();
    gateway.set_next_period(JAN_1, FEB_1);
    let service = SubscriptionService::new(gateway.clone(), pool.clone(), catalog(), email());
    let reconciler = WebhookReconciler::new(gateway.clone(), pool.clone(), catalog(), email(), false);

    let user = create_test_user(&pool).await;
    let created = service
        .create(&user, "Ann Example", MONTHLY, "tok_visa")
        .await
        .expect("create failed");

    // Card presence is only checked on the payment_succeeded path
    sqlx::query("DELETE FROM cards WHERE user_id = $1")
        .bind(user.id)
        .execute(&pool)
        .await
        .expect("card delete failed");

    let event = GatewayEvent {
        id: format!("evt_{}", Uuid::new_v4()),
        event_type: "invoice.payment_failed".to_string(),
        object: serde_json::json!({
            "subscription": created.subscription_id,
        }),
    };
    reconciler
        .invoice_payment_failed(&event)
        .await
        .expect("payment_failed handling failed");

    assert!(find_subscription(&pool, user.id).await.is_none());
    assert_eq!(gateway.cancel_subscription_calls(), 1);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_payment_succeeded_records_invoice_with_card_snapshot() {
    let pool = setup_pool().await;
    let gateway = MockGateway::new();
    gateway.set_next_period(JAN_1, FEB_1);
    let service = SubscriptionService::new(gateway.clone(), pool.clone(), catalog(), email());
    let reconciler = WebhookReconciler::new(gateway.clone(), pool.clone(), catalog(), email(), false);

    let user = create_test_user(&pool).await;
    service
        .create(&user, "Ann Example", MONTHLY, "tok_visa")
        .await
        .expect("create failed");
    let user = reload_user(&pool, user.id).await;

    let event = GatewayEvent {
        id: format!("evt_{}", Uuid::new_v4()),
        event_type: "invoice.payment_succeeded".to_string(),
        object: serde_json::json!({
            "customer": user.payment_id,
            "hosted_invoice_url": "https://pay.example.com/inv_1",
            "number": "INV-0001",
            "receipt_number": "R-0001",
            "currency": "usd",
            "total": 245,
            "lines": {
                "data": [{
                    "plan": {"id": MONTHLY},
                    "period": {"start": JAN_1, "end": FEB_1}
                }]
            }
        }),
    };
    reconciler
        .invoice_payment_succeeded(&event)
        .await
        .expect("payment_succeeded handling failed");

    let invoices = InvoiceService::new(gateway, pool.clone(), catalog())
        .billing_history(user.id, 12)
        .await
        .expect("history failed");
    assert_eq!(invoices.len(), 1);
    let invoice = &invoices[0];
    assert_eq!(invoice.plan_name, "Monthly");
    assert_eq!(invoice.total, 245);
    // Card snapshot denormalized at billing time
    assert_eq!(invoice.last4, "4242");
}

#[tokio::test]
#[ignore] // Requires database
async fn test_payment_succeeded_without_card_records_nothing() {
    let pool = setup_pool().await;
    let gateway = MockGateway::new();
    gateway.set_next_period(JAN_1, FEB_1);
    let service = SubscriptionService::new(gateway.clone(), pool.clone(), catalog(), email());
    let reconciler = WebhookReconciler::new(gateway.clone(), pool.clone(), catalog(), email(), false);

    let user = create_test_user(&pool).await;
    service
        .create(&user, "Ann Example", MONTHLY, "tok_visa")
        .await
        .expect("create failed");
    let user = reload_user(&pool, user.id).await;

    sqlx::query("DELETE FROM cards WHERE user_id = $1")
        .bind(user.id)
        .execute(&pool)
        .await
        .expect("card delete failed");

    let event = GatewayEvent {
        id: format!("evt_{}", Uuid::new_v4()),
        event_type: "invoice.payment_succeeded".to_string(),
        object: serde_json::json!({
            "customer": user.payment_id,
            "currency": "usd",
            "total": 245,
            "lines": {
                "data": [{
                    "plan": {"id": MONTHLY},
                    "period": {"start": JAN_1, "end": FEB_1}
                }]
            }
        }),
    };
    reconciler
        .invoice_payment_succeeded(&event)
        .await
        .expect("payment_succeeded handling failed");

    let invoices = InvoiceService::new(gateway, pool.clone(), catalog())
        .billing_history(user.id, 12)
        .await
        .expect("history failed");
    assert!(invoices.is_empty());
}

#[tokio::test]
#[ignore] // Requires database
async fn test_mark_expiring_cards() {
    let pool = setup_pool().await;
    let gateway = MockGateway::new();
    gateway.set_next_period(JAN_1, FEB_1);
    let service = SubscriptionService::new(gateway, pool.clone(), catalog(), email());

    let user = create_test_user(&pool).await;
    service
        .create(&user, "Ann Example", MONTHLY, "tok_visa")
        .await
        .expect("create failed");

    // Mock cards expire in 2100; compare from just before to flag them
    let compare = time::Date::from_calendar_date(2099, time::Month::December, 1).unwrap();
    let flagged = courtside_billing::mark_expiring_cards(&pool, compare)
        .await
        .expect("mark failed");
    assert!(flagged >= 1);

    let card = find_card(&pool, user.id).await.expect("card missing");
    assert!(card.is_expiring);
}
