//! Webhook reconciliation
//!
//! Consumes verified gateway events and converges local subscription
//! state with the gateway's. Events arrive at-least-once and possibly
//! out of order; the renewal handler's period-bound comparison is the
//! idempotency guard, so redelivery of an already-applied event finds no
//! diff and mutates nothing.

use serde_json::Value;
use sqlx::PgPool;
use time::OffsetDateTime;

use courtside_shared::types::{Subscription, User};

use crate::client::PlanCatalog;
use crate::email::BillingEmailService;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{datetime_from_unix, GatewayEvent, PaymentGateway};
use crate::invoice::{parse_from_event, InvoiceService};
use crate::subscription::SubscriptionService;

/// True when the event's period bounds differ from the stored ones,
/// which marks a gateway-driven transition into a new billing period
pub fn is_renewal(
    stored_start: OffsetDateTime,
    stored_end: OffsetDateTime,
    event_start: OffsetDateTime,
    event_end: OffsetDateTime,
) -> bool {
    stored_start != event_start || stored_end != event_end
}

/// Webhook reconciler for gateway lifecycle events
#[derive(Clone)]
pub struct WebhookReconciler<G> {
    gateway: G,
    pool: PgPool,
    plans: PlanCatalog,
    email: BillingEmailService,
    /// Retry schedule release until it succeeds; test clocks can ignore
    /// the first attempts, so debug environments loop
    debug_release_retry: bool,
}

impl<G: PaymentGateway + Clone> WebhookReconciler<G> {
    pub fn new(
        gateway: G,
        pool: PgPool,
        plans: PlanCatalog,
        email: BillingEmailService,
        debug_release_retry: bool,
    ) -> Self {
        Self {
            gateway,
            pool,
            plans,
            email,
            debug_release_retry,
        }
    }

    /// `invoice.payment_succeeded`: record the billed period locally
    ///
    /// Skips silently when the paying customer has no local user or no
    /// card on file.
    pub async fn invoice_payment_succeeded(&self, event: &GatewayEvent) -> BillingResult<()> {
        let parsed = parse_from_event(&event.object, &self.plans)?;

        let invoices =
            InvoiceService::new(self.gateway.clone(), self.pool.clone(), self.plans.clone());
        let recorded = invoices.record_payment(&parsed).await?;

        if let Some(invoice) = recorded {
            let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
                .bind(invoice.user_id)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(user) = user {
                let email = self.email.clone();
                let to = user.email.clone();
                let plan_name = invoice.plan_name.clone();
                let currency = invoice.currency.clone();
                let total = invoice.total;
                tokio::spawn(async move {
                    if let Err(e) = email
                        .send_payment_receipt(&to, &plan_name, total, &currency)
                        .await
                    {
                        tracing::warn!(error = %e, "Failed to send payment receipt email");
                    }
                });
            }
        }

        Ok(())
    }

    /// `invoice.payment_failed`: cancel the delinquent subscription
    ///
    /// First failure is terminal; no retry or grace-period state is
    /// tracked. Cancellation runs the same path as a user-initiated
    /// cancel, including the gateway-side delete and local cleanup.
    pub async fn invoice_payment_failed(&self, event: &GatewayEvent) -> BillingResult<()> {
        let subscription_id = event
            .object
            .get("subscription")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BillingError::InvalidEvent("payment_failed event missing subscription".to_string())
            })?;

        let subscription: Subscription =
            sqlx::query_as("SELECT * FROM subscriptions WHERE subscription_id = $1")
                .bind(subscription_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| BillingError::SubscriptionNotFound(subscription_id.to_string()))?;

        let user: User = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(subscription.user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| BillingError::UserNotFound(subscription.user_id.to_string()))?;

        tracing::warn!(
            user_id = %user.id,
            subscription_id = %subscription_id,
            "Payment failed, cancelling subscription"
        );

        let subscriptions = SubscriptionService::new(
            self.gateway.clone(),
            self.pool.clone(),
            self.plans.clone(),
            self.email.clone(),
        );
        subscriptions.cancel(&user).await
    }

    /// `customer.subscription.updated`: reconcile a renewal
    ///
    /// A change in period bounds means the gateway rolled into a new
    /// billing cycle: promote the pending plan, store the new bounds, and
    /// release the staging schedule if one was attached. Unchanged bounds
    /// are a same-cycle metadata update and a no-op here.
    pub async fn subscription_updated(&self, event: &GatewayEvent) -> BillingResult<()> {
        let subscription_id = event
            .object
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BillingError::InvalidEvent("subscription event missing id".to_string())
            })?;

        let event_start = event
            .object
            .get("current_period_start")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                BillingError::InvalidEvent("subscription event missing period start".to_string())
            })?;
        let event_end = event
            .object
            .get("current_period_end")
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                BillingError::InvalidEvent("subscription event missing period end".to_string())
            })?;

        let event_start = datetime_from_unix(event_start)?;
        let event_end = datetime_from_unix(event_end)?;

        // Row lock serializes this against a concurrent user-initiated
        // plan change for the same subscription
        let mut tx = self.pool.begin().await?;

        let subscription: Subscription =
            sqlx::query_as("SELECT * FROM subscriptions WHERE subscription_id = $1 FOR UPDATE")
                .bind(subscription_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| BillingError::SubscriptionNotFound(subscription_id.to_string()))?;

        if !is_renewal(
            subscription.current_period_start,
            subscription.current_period_end,
            event_start,
            event_end,
        ) {
            tracing::debug!(
                subscription_id = %subscription_id,
                "Same-cycle update, keeping stored period bounds"
            );
            return Ok(());
        }

        tracing::info!(
            subscription_id = %subscription_id,
            plan_id = %subscription.new_plan_id,
            period_start = %event_start,
            period_end = %event_end,
            "Renewal detected, promoting pending plan"
        );

        // The schedule staged the plan change that just took effect;
        // detach it so the subscription keeps running on its own
        if let Some(schedule_id) = subscription.subscription_schedule_id.as_deref() {
            self.release_schedule(schedule_id).await?;
        }

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET plan_id = new_plan_id,
                current_period_start = $1,
                current_period_end = $2,
                subscription_schedule_id = NULL,
                updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(event_start)
        .bind(event_end)
        .bind(subscription.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn release_schedule(&self, schedule_id: &str) -> BillingResult<()> {
        if self.debug_release_retry {
            // Test clocks can drop the release while advancing; keep
            // trying until the gateway accepts it
            loop {
                match self.gateway.release_schedule(schedule_id).await {
                    Ok(_) => break,
                    Err(e) => {
                        tracing::debug!(
                            schedule_id = %schedule_id,
                            error = %e,
                            "Schedule release failed, retrying"
                        );
                        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                    }
                }
            }
        } else {
            self.gateway.release_schedule(schedule_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn dt(ts: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(ts).unwrap()
    }

    #[test]
    fn test_matching_bounds_are_not_a_renewal() {
        let start = dt(1_704_067_200);
        let end = dt(1_706_745_600);
        assert!(!is_renewal(start, end, start, end));
    }

    #[test]
    fn test_shifted_bounds_are_a_renewal() {
        let start = dt(1_704_067_200);
        let end = dt(1_706_745_600);
        let next_end = dt(1_709_251_200);
        assert!(is_renewal(start, end, end, next_end));
        // Either bound moving alone counts
        assert!(is_renewal(start, end, start, next_end));
        assert!(is_renewal(start, end, end, end));
    }
}
