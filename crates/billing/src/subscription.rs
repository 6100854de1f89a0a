//! Subscription lifecycle
//!
//! Orchestrates create / plan-change / cancel / payment-method operations
//! against the gateway and the local database. Ordering invariant: every
//! gateway call happens before the first local write, and all local
//! writes for one operation commit in a single transaction. A local
//! write that fails after the gateway succeeded is a state inconsistency
//! that is logged for manual reconciliation; there is no compensating
//! transaction.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use courtside_shared::types::{Subscription, User};

use crate::card::CardParams;
use crate::client::PlanCatalog;
use crate::email::BillingEmailService;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{datetime_from_unix, unix_from_datetime, GatewaySubscription, PaymentGateway};

/// Subscription lifecycle service
#[derive(Clone)]
pub struct SubscriptionService<G> {
    gateway: G,
    pool: PgPool,
    plans: PlanCatalog,
    email: BillingEmailService,
}

impl<G: PaymentGateway + Clone> SubscriptionService<G> {
    pub fn new(gateway: G, pool: PgPool, plans: PlanCatalog, email: BillingEmailService) -> Self {
        Self {
            gateway,
            pool,
            plans,
            email,
        }
    }

    /// Create a recurring subscription for a user
    ///
    /// Reuses the user's gateway customer when one exists (overwriting its
    /// default card with the new token), otherwise creates one. Persists
    /// the subscription, refreshes the user's billing fields, and snapshots
    /// the card, all in one transaction.
    pub async fn create(
        &self,
        user: &User,
        billing_name: &str,
        plan_id: &str,
        payment_token: &str,
    ) -> BillingResult<Subscription> {
        // An empty token is guaranteed to be rejected by the gateway, so
        // fail before making any network call
        if payment_token.is_empty() {
            return Err(BillingError::MissingPaymentToken);
        }

        let customer = match user.payment_id.as_deref() {
            Some(customer_id) => {
                // Existing customer: overwrite the default card with the
                // new token, then re-fetch for the card snapshot
                self.gateway
                    .update_default_card(customer_id, billing_name, payment_token)
                    .await?;
                self.gateway.retrieve_customer(customer_id).await?
            }
            None => {
                let customer = self
                    .gateway
                    .create_customer(billing_name, &user.email, payment_token)
                    .await?;
                tracing::debug!(
                    user_id = %user.id,
                    customer_id = %customer.id,
                    "Created new gateway customer"
                );
                customer
            }
        };

        let gateway_sub = self
            .gateway
            .create_subscription(&customer.id, plan_id)
            .await?;

        let gateway_card = customer
            .default_card
            .as_ref()
            .ok_or_else(|| BillingError::CardNotFound(user.id.to_string()))?;
        let card = CardParams::from_gateway(gateway_card, OffsetDateTime::now_utc().date())?;

        let subscription = match self
            .persist_create(user, billing_name, &customer.id, plan_id, &gateway_sub, &card)
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::error!(
                    user_id = %user.id,
                    customer_id = %customer.id,
                    subscription_id = %gateway_sub.id,
                    error = %e,
                    "RECONCILIATION NEEDED: gateway subscription created but local state was not persisted"
                );
                return Err(e);
            }
        };

        tracing::info!(
            user_id = %user.id,
            subscription_id = %subscription.subscription_id,
            plan_id = %plan_id,
            "Subscription created"
        );

        self.notify_created(&user.email, plan_id);

        Ok(subscription)
    }

    async fn persist_create(
        &self,
        user: &User,
        billing_name: &str,
        customer_id: &str,
        plan_id: &str,
        gateway_sub: &GatewaySubscription,
        card: &CardParams,
    ) -> BillingResult<Subscription> {
        let period_start = datetime_from_unix(gateway_sub.current_period_start)?;
        let period_end = datetime_from_unix(gateway_sub.current_period_end)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE users
            SET payment_id = $1,
                billing_name = $2,
                cancelled_subscription_on = NULL,
                updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(customer_id)
        .bind(billing_name)
        .bind(user.id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO cards (id, user_id, brand, last4, exp_date, is_expiring)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id) DO UPDATE SET
                brand = EXCLUDED.brand,
                last4 = EXCLUDED.last4,
                exp_date = EXCLUDED.exp_date,
                is_expiring = EXCLUDED.is_expiring,
                updated_at = NOW()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.id)
        .bind(&card.brand)
        .bind(&card.last4)
        .bind(card.exp_date)
        .bind(card.is_expiring)
        .execute(&mut *tx)
        .await?;

        let subscription: Subscription = sqlx::query_as(
            r#"
            INSERT INTO subscriptions
                (id, user_id, plan_id, new_plan_id, subscription_id,
                 subscription_schedule_id, current_period_start, current_period_end)
            VALUES ($1, $2, $3, $3, $4, NULL, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.id)
        .bind(plan_id)
        .bind(&gateway_sub.id)
        .bind(period_start)
        .bind(period_end)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(subscription)
    }

    /// Stage a plan change for the next renewal
    ///
    /// Configures a two-phase gateway schedule (current plan until period
    /// end, new plan after) and records the pending change locally.
    /// `plan_id` stays untouched; the switch is reconciled by the webhook
    /// handler when the renewal event arrives. No proration is applied.
    pub async fn change_plan(&self, user: &User, new_plan_id: &str) -> BillingResult<Subscription> {
        let customer_id = user
            .payment_id
            .as_deref()
            .ok_or_else(|| BillingError::CustomerNotFound(user.id.to_string()))?;

        // Row lock serializes this against a concurrently arriving
        // renewal webhook for the same user
        let mut tx = self.pool.begin().await?;

        let subscription: Subscription =
            sqlx::query_as("SELECT * FROM subscriptions WHERE user_id = $1 FOR UPDATE")
                .bind(user.id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| BillingError::SubscriptionNotFound(user.id.to_string()))?;

        tracing::debug!(
            user_id = %user.id,
            from = %self.plans.name_for(&subscription.plan_id),
            to = %self.plans.name_for(new_plan_id),
            "Changing plans"
        );

        let schedule = self
            .gateway
            .create_or_update_schedule(
                customer_id,
                subscription.subscription_schedule_id.as_deref(),
                new_plan_id,
                &subscription.plan_id,
                unix_from_datetime(subscription.current_period_start),
                unix_from_datetime(subscription.current_period_end),
            )
            .await?;

        let updated: Subscription = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET new_plan_id = $1, subscription_schedule_id = $2, updated_at = NOW()
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(new_plan_id)
        .bind(&schedule.id)
        .bind(subscription.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %user.id,
            schedule_id = %schedule.id,
            new_plan_id = %new_plan_id,
            "Plan change staged for next renewal"
        );

        Ok(updated)
    }

    /// Cancel the user's subscription
    ///
    /// Cancels on the gateway, stamps the cancellation on the user, and
    /// deletes the local subscription and card rows in one transaction.
    /// The card delete is explicit: its foreign key hangs off the user,
    /// so nothing cascades here, and sites that prefer to keep a card on
    /// file after cancellation can skip that statement.
    pub async fn cancel(&self, user: &User) -> BillingResult<()> {
        let customer_id = user
            .payment_id
            .as_deref()
            .ok_or_else(|| BillingError::CustomerNotFound(user.id.to_string()))?;

        let cancelled = self.gateway.cancel_subscription(customer_id).await?;

        if let Err(e) = self.persist_cancel(user.id).await {
            tracing::error!(
                user_id = %user.id,
                subscription_id = %cancelled.id,
                error = %e,
                "RECONCILIATION NEEDED: gateway subscription cancelled but local state was not cleaned up"
            );
            return Err(e);
        }

        tracing::info!(
            user_id = %user.id,
            subscription_id = %cancelled.id,
            "Subscription cancelled"
        );

        self.notify_cancelled(&user.email);

        Ok(())
    }

    async fn persist_cancel(&self, user_id: Uuid) -> BillingResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE users SET cancelled_subscription_on = NOW(), updated_at = NOW() WHERE id = $1",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM subscriptions WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM cards WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    /// Replace the default payment method and refresh the card snapshot
    pub async fn update_payment_method(
        &self,
        user: &User,
        billing_name: &str,
        payment_token: &str,
    ) -> BillingResult<CardParams> {
        if payment_token.is_empty() {
            return Err(BillingError::MissingPaymentToken);
        }

        let customer_id = user
            .payment_id
            .as_deref()
            .ok_or_else(|| BillingError::CustomerNotFound(user.id.to_string()))?;

        self.gateway
            .update_default_card(customer_id, billing_name, payment_token)
            .await?;

        // Re-fetch the customer so the snapshot reflects the new default
        let customer = self.gateway.retrieve_customer(customer_id).await?;
        let gateway_card = customer
            .default_card
            .as_ref()
            .ok_or_else(|| BillingError::CardNotFound(user.id.to_string()))?;
        let card = CardParams::from_gateway(gateway_card, OffsetDateTime::now_utc().date())?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE users SET billing_name = $1, updated_at = NOW() WHERE id = $2")
            .bind(billing_name)
            .bind(user.id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO cards (id, user_id, brand, last4, exp_date, is_expiring)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id) DO UPDATE SET
                brand = EXCLUDED.brand,
                last4 = EXCLUDED.last4,
                exp_date = EXCLUDED.exp_date,
                is_expiring = EXCLUDED.is_expiring,
                updated_at = NOW()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.id)
        .bind(&card.brand)
        .bind(&card.last4)
        .bind(card.exp_date)
        .bind(card.is_expiring)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(user_id = %user.id, last4 = %card.last4, "Payment method updated");

        Ok(card)
    }

    fn notify_created(&self, to: &str, plan_id: &str) {
        let email = self.email.clone();
        let to = to.to_string();
        let plan_name = self.plans.name_for(plan_id);
        tokio::spawn(async move {
            if let Err(e) = email.send_subscription_created(&to, &plan_name).await {
                tracing::warn!(error = %e, "Failed to send subscription created email");
            }
        });
    }

    fn notify_cancelled(&self, to: &str) {
        let email = self.email.clone();
        let to = to.to_string();
        tokio::spawn(async move {
            if let Err(e) = email.send_subscription_cancelled(&to).await {
                tracing::warn!(error = %e, "Failed to send subscription cancelled email");
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::client::{Plan, PlanInterval};
    use crate::email::EmailConfig;
    use crate::gateway::mock::MockGateway;
    use courtside_shared::types::UserRole;

    fn test_catalog() -> PlanCatalog {
        PlanCatalog::new(vec![
            Plan {
                id: "price_monthly".to_string(),
                name: "Monthly".to_string(),
                amount: 245,
                currency: "usd".to_string(),
                interval: PlanInterval::Month,
                statement_descriptor: "courtside plan".to_string(),
            },
            Plan {
                id: "price_yearly".to_string(),
                name: "Yearly".to_string(),
                amount: 2495,
                currency: "usd".to_string(),
                interval: PlanInterval::Year,
                statement_descriptor: "courtside plan".to_string(),
            },
        ])
    }

    fn disabled_email() -> BillingEmailService {
        BillingEmailService::new(EmailConfig {
            resend_api_key: String::new(),
            email_from: "test@example.com".to_string(),
            app_name: "Courtside".to_string(),
            support_email: "support@example.com".to_string(),
            dashboard_url: "http://localhost:3000".to_string(),
        })
    }

    fn test_user(payment_id: Option<&str>) -> User {
        let now = OffsetDateTime::now_utc();
        User {
            id: Uuid::new_v4(),
            username: "ann".to_string(),
            email: "ann@example.com".to_string(),
            password_hash: "hash".to_string(),
            role: UserRole::Member,
            locale: "en".to_string(),
            billing_name: None,
            payment_id: payment_id.map(|s| s.to_string()),
            cancelled_subscription_on: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn test_service(gateway: MockGateway) -> SubscriptionService<MockGateway> {
        // Lazy pool: never connects unless a query actually runs
        let pool = PgPool::connect_lazy("postgres://localhost/courtside_test")
            .expect("lazy pool construction cannot fail");
        SubscriptionService::new(gateway, pool, test_catalog(), disabled_email())
    }

    #[tokio::test]
    async fn test_create_with_empty_token_makes_no_gateway_call() {
        let gateway = MockGateway::new();
        let service = test_service(gateway.clone());
        let user = test_user(None);

        let err = service
            .create(&user, "Ann Example", "price_monthly", "")
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::MissingPaymentToken));
        assert_eq!(gateway.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_update_payment_method_with_empty_token_makes_no_gateway_call() {
        let gateway = MockGateway::new();
        let service = test_service(gateway.clone());
        let user = test_user(Some("cus_1"));

        let err = service
            .update_payment_method(&user, "Ann Example", "")
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::MissingPaymentToken));
        assert_eq!(gateway.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_without_customer_makes_no_gateway_call() {
        let gateway = MockGateway::new();
        let service = test_service(gateway.clone());
        let user = test_user(None);

        let err = service.cancel(&user).await.unwrap_err();

        assert!(matches!(err, BillingError::CustomerNotFound(_)));
        assert_eq!(gateway.cancel_subscription_calls(), 0);
    }

    #[tokio::test]
    async fn test_create_surfaces_card_decline() {
        let gateway = MockGateway::new();
        gateway.decline_cards("Your card was declined");
        let service = test_service(gateway.clone());
        let user = test_user(None);

        let err = service
            .create(&user, "Ann Example", "price_monthly", "tok_chargeDeclined")
            .await
            .unwrap_err();

        assert!(err.is_gateway());
        assert_eq!(gateway.create_customer_calls(), 1);
        // Declined before any subscription was attempted
        assert_eq!(gateway.create_subscription_calls(), 0);
    }
}
