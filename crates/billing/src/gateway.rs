//! Payment gateway contract and its Stripe implementation
//!
//! Lifecycle and reconciliation code never touches the Stripe SDK
//! directly; everything goes through [`PaymentGateway`] so tests can
//! substitute an in-memory mock. The production implementation wraps
//! `async-stripe`, falling back to direct endpoint calls where the
//! generated API lags the parts of the billing surface we use
//! (subscription schedules, legacy card sources).

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult, GatewayError, GatewayResult};

/// Default bound on any single gateway call
const GATEWAY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Customer snapshot as returned by the gateway
#[derive(Debug, Clone)]
pub struct GatewayCustomer {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    /// The default payment method, if one is on file
    pub default_card: Option<GatewayCard>,
}

/// Default payment method details
#[derive(Debug, Clone)]
pub struct GatewayCard {
    pub id: String,
    pub brand: String,
    pub last4: String,
    pub exp_month: u8,
    pub exp_year: i32,
}

/// Subscription snapshot with billing period bounds as epoch seconds
#[derive(Debug, Clone)]
pub struct GatewaySubscription {
    pub id: String,
    pub current_period_start: i64,
    pub current_period_end: i64,
    /// Price ID of the first subscription item
    pub plan_id: Option<String>,
}

/// Subscription schedule reference
#[derive(Debug, Clone)]
pub struct GatewaySchedule {
    pub id: String,
}

/// Preview of the next bill for a customer
#[derive(Debug, Clone)]
pub struct GatewayUpcomingInvoice {
    pub plan_id: Option<String>,
    pub amount_due: i64,
    pub currency: String,
    pub next_payment_attempt: Option<i64>,
}

/// A gateway event fetched back from the gateway by ID
///
/// Webhook bodies are never trusted directly; the reconciler only sees
/// events that have been round-tripped through
/// [`PaymentGateway::retrieve_event`] with our own API key.
#[derive(Debug, Clone)]
pub struct GatewayEvent {
    pub id: String,
    pub event_type: String,
    /// The event's `data.object` payload
    pub object: serde_json::Value,
}

/// Contract over the remote subscription billing API
///
/// Each operation is a network call liable to fail or time out; failures
/// surface as [`GatewayError`] and are never caught below the request
/// boundary.
#[allow(async_fn_in_trait)]
pub trait PaymentGateway: Send + Sync {
    /// Create a customer with a card from `payment_token` as its default
    /// payment method
    async fn create_customer(
        &self,
        name: &str,
        email: &str,
        payment_token: &str,
    ) -> GatewayResult<GatewayCustomer>;

    async fn retrieve_customer(&self, customer_id: &str) -> GatewayResult<GatewayCustomer>;

    /// Attach a new card from `payment_token` and make it the default,
    /// updating the billing name at the same time
    async fn update_default_card(
        &self,
        customer_id: &str,
        name: &str,
        payment_token: &str,
    ) -> GatewayResult<GatewayCard>;

    async fn create_subscription(
        &self,
        customer_id: &str,
        plan_id: &str,
    ) -> GatewayResult<GatewaySubscription>;

    /// Retrieve the customer's subscription
    ///
    /// A customer is expected to hold at most one subscription; if the
    /// gateway ever returns several, the first in list order is used.
    async fn retrieve_subscription(&self, customer_id: &str) -> GatewayResult<GatewaySubscription>;

    /// Look up the customer's subscription and delete it
    async fn cancel_subscription(&self, customer_id: &str) -> GatewayResult<GatewaySubscription>;

    /// Create or reconfigure the two-phase schedule staging a plan change
    ///
    /// Phase 1 keeps `old_plan_id` over `[period_start, period_end)` with
    /// no proration; phase 2 starts `new_plan_id` at `period_end` with an
    /// open end. The schedule releases itself once phase 2 begins.
    async fn create_or_update_schedule(
        &self,
        customer_id: &str,
        schedule_id: Option<&str>,
        new_plan_id: &str,
        old_plan_id: &str,
        period_start: i64,
        period_end: i64,
    ) -> GatewayResult<GatewaySchedule>;

    /// Detach a schedule from its subscription, leaving the subscription
    /// running on whatever plan is currently active
    async fn release_schedule(&self, schedule_id: &str) -> GatewayResult<GatewaySchedule>;

    async fn upcoming_invoice(&self, customer_id: &str) -> GatewayResult<GatewayUpcomingInvoice>;

    /// Fetch an event by ID directly from the gateway
    async fn retrieve_event(&self, event_id: &str) -> GatewayResult<GatewayEvent>;
}

/// Convert a gateway epoch timestamp into a timezone-aware datetime
pub fn datetime_from_unix(ts: i64) -> BillingResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(ts)
        .map_err(|e| BillingError::InvalidEvent(format!("bad timestamp {}: {}", ts, e)))
}

/// Convert a timezone-aware datetime back to a gateway epoch timestamp
pub fn unix_from_datetime(dt: OffsetDateTime) -> i64 {
    dt.unix_timestamp()
}

// ---------------------------------------------------------------------------
// Stripe implementation
// ---------------------------------------------------------------------------

/// Raw card object as returned by the card-source endpoints
#[derive(Debug, Deserialize)]
struct SourceCard {
    id: String,
    #[serde(default)]
    brand: String,
    #[serde(default)]
    last4: String,
    exp_month: u8,
    exp_year: i32,
}

impl From<SourceCard> for GatewayCard {
    fn from(card: SourceCard) -> Self {
        GatewayCard {
            id: card.id,
            brand: card.brand,
            last4: card.last4,
            exp_month: card.exp_month,
            exp_year: card.exp_year,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawSchedule {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawUpcomingInvoice {
    amount_due: i64,
    currency: String,
    next_payment_attempt: Option<i64>,
    #[serde(default)]
    lines: RawInvoiceLines,
}

#[derive(Debug, Default, Deserialize)]
struct RawInvoiceLines {
    #[serde(default)]
    data: Vec<RawInvoiceLine>,
}

#[derive(Debug, Deserialize)]
struct RawInvoiceLine {
    #[serde(default)]
    plan: Option<RawPlanRef>,
    #[serde(default)]
    price: Option<RawPlanRef>,
}

#[derive(Debug, Deserialize)]
struct RawPlanRef {
    id: String,
}

#[derive(Serialize)]
struct CreateCustomerForm<'a> {
    name: &'a str,
    email: &'a str,
    source: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    test_clock: Option<&'a str>,
}

#[derive(Serialize)]
struct CreateCardSourceForm<'a> {
    source: &'a str,
}

#[derive(Serialize)]
struct SetDefaultCardForm<'a> {
    name: &'a str,
    default_source: &'a str,
}

#[derive(Serialize)]
struct SchedulePhaseItemForm<'a> {
    price: &'a str,
}

#[derive(Serialize)]
struct SchedulePhaseForm<'a> {
    items: Vec<SchedulePhaseItemForm<'a>>,
    start_date: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_date: Option<i64>,
}

#[derive(Serialize)]
struct UpdateScheduleForm<'a> {
    proration_behavior: &'a str,
    end_behavior: &'a str,
    phases: Vec<SchedulePhaseForm<'a>>,
}

#[derive(Serialize)]
struct CreateScheduleForm<'a> {
    from_subscription: &'a str,
}

#[derive(Serialize)]
struct UpcomingInvoiceQuery<'a> {
    customer: &'a str,
}

/// Production [`PaymentGateway`] backed by the Stripe API
#[derive(Clone)]
pub struct StripeGateway {
    stripe: StripeClient,
    timeout: std::time::Duration,
}

impl StripeGateway {
    pub fn new(stripe: StripeClient) -> Self {
        Self {
            stripe,
            timeout: GATEWAY_TIMEOUT,
        }
    }

    /// Bound a gateway call and fold timeouts into the connectivity class
    async fn bounded<T, F>(&self, fut: F) -> GatewayResult<T>
    where
        F: std::future::Future<Output = Result<T, stripe::StripeError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(GatewayError::from),
            Err(_) => Err(GatewayError::Connectivity(format!(
                "gateway call timed out after {:?}",
                self.timeout
            ))),
        }
    }

    fn parse_customer_id(customer_id: &str) -> GatewayResult<stripe::CustomerId> {
        customer_id
            .parse::<stripe::CustomerId>()
            .map_err(|e| GatewayError::InvalidRequest(format!("Invalid customer ID: {}", e)))
    }

    /// Fetch the customer's default card, if one is set
    async fn fetch_default_card(
        &self,
        customer: &stripe::Customer,
    ) -> GatewayResult<Option<GatewayCard>> {
        let card_id = match &customer.default_source {
            Some(stripe::Expandable::Id(id)) => id.to_string(),
            Some(stripe::Expandable::Object(obj)) => {
                use stripe::Object;
                obj.id().to_string()
            }
            None => return Ok(None),
        };

        let card: SourceCard = self
            .bounded(
                self.stripe
                    .inner()
                    .get(&format!("/customers/{}/sources/{}", customer.id, card_id)),
            )
            .await?;

        Ok(Some(card.into()))
    }

    fn customer_snapshot(
        customer: &stripe::Customer,
        default_card: Option<GatewayCard>,
    ) -> GatewayCustomer {
        GatewayCustomer {
            id: customer.id.to_string(),
            email: customer.email.clone(),
            name: customer.name.clone(),
            default_card,
        }
    }

    fn subscription_snapshot(subscription: &stripe::Subscription) -> GatewaySubscription {
        GatewaySubscription {
            id: subscription.id.to_string(),
            current_period_start: subscription.current_period_start,
            current_period_end: subscription.current_period_end,
            plan_id: subscription
                .items
                .data
                .first()
                .and_then(|item| item.price.as_ref())
                .map(|price| price.id.to_string()),
        }
    }
}

impl PaymentGateway for StripeGateway {
    async fn create_customer(
        &self,
        name: &str,
        email: &str,
        payment_token: &str,
    ) -> GatewayResult<GatewayCustomer> {
        let test_clock = self.stripe.config().test_clock.as_deref();
        if let Some(clock) = test_clock {
            tracing::debug!(test_clock = %clock, "Attaching test clock to new customer");
        }

        // The generated create params don't carry legacy card tokens, so
        // post the form directly
        let form = CreateCustomerForm {
            name,
            email,
            source: payment_token,
            test_clock,
        };
        let customer: stripe::Customer = self
            .bounded(self.stripe.inner().post_form("/customers", &form))
            .await?;

        let default_card = self.fetch_default_card(&customer).await?;

        tracing::info!(customer_id = %customer.id, "Created gateway customer");

        Ok(Self::customer_snapshot(&customer, default_card))
    }

    async fn retrieve_customer(&self, customer_id: &str) -> GatewayResult<GatewayCustomer> {
        let id = Self::parse_customer_id(customer_id)?;
        let customer = self
            .bounded(stripe::Customer::retrieve(self.stripe.inner(), &id, &[]))
            .await?;

        let default_card = self.fetch_default_card(&customer).await?;

        Ok(Self::customer_snapshot(&customer, default_card))
    }

    async fn update_default_card(
        &self,
        customer_id: &str,
        name: &str,
        payment_token: &str,
    ) -> GatewayResult<GatewayCard> {
        // Create the new card from the token, then promote it to default
        // while updating the billing name
        let card: SourceCard = self
            .bounded(self.stripe.inner().post_form(
                &format!("/customers/{}/sources", customer_id),
                &CreateCardSourceForm {
                    source: payment_token,
                },
            ))
            .await?;

        let _customer: stripe::Customer = self
            .bounded(self.stripe.inner().post_form(
                &format!("/customers/{}", customer_id),
                &SetDefaultCardForm {
                    name,
                    default_source: &card.id,
                },
            ))
            .await?;

        tracing::info!(customer_id = %customer_id, card_id = %card.id, "Updated default card");

        Ok(card.into())
    }

    async fn create_subscription(
        &self,
        customer_id: &str,
        plan_id: &str,
    ) -> GatewayResult<GatewaySubscription> {
        let id = Self::parse_customer_id(customer_id)?;

        let mut params = stripe::CreateSubscription::new(id);
        params.items = Some(vec![stripe::CreateSubscriptionItems {
            price: Some(plan_id.to_string()),
            ..Default::default()
        }]);

        let subscription = self
            .bounded(stripe::Subscription::create(self.stripe.inner(), params))
            .await?;

        tracing::info!(
            customer_id = %customer_id,
            subscription_id = %subscription.id,
            plan_id = %plan_id,
            "Created gateway subscription"
        );

        Ok(Self::subscription_snapshot(&subscription))
    }

    async fn retrieve_subscription(&self, customer_id: &str) -> GatewayResult<GatewaySubscription> {
        let id = Self::parse_customer_id(customer_id)?;

        let mut params = stripe::ListSubscriptions::new();
        params.customer = Some(id);

        let subscriptions = self
            .bounded(stripe::Subscription::list(self.stripe.inner(), &params))
            .await?;

        // First in list order; a customer is not expected to hold more
        // than one
        let subscription = subscriptions.data.first().ok_or_else(|| {
            GatewayError::InvalidRequest(format!(
                "customer {} has no subscription",
                customer_id
            ))
        })?;

        Ok(Self::subscription_snapshot(subscription))
    }

    async fn cancel_subscription(&self, customer_id: &str) -> GatewayResult<GatewaySubscription> {
        let subscription = self.retrieve_subscription(customer_id).await?;

        let sub_id = subscription
            .id
            .parse::<stripe::SubscriptionId>()
            .map_err(|e| GatewayError::InvalidRequest(format!("Invalid subscription ID: {}", e)))?;

        let cancelled = self
            .bounded(stripe::Subscription::cancel(
                self.stripe.inner(),
                &sub_id,
                stripe::CancelSubscription::default(),
            ))
            .await?;

        tracing::info!(
            customer_id = %customer_id,
            subscription_id = %cancelled.id,
            "Cancelled gateway subscription"
        );

        Ok(Self::subscription_snapshot(&cancelled))
    }

    async fn create_or_update_schedule(
        &self,
        customer_id: &str,
        schedule_id: Option<&str>,
        new_plan_id: &str,
        old_plan_id: &str,
        period_start: i64,
        period_end: i64,
    ) -> GatewayResult<GatewaySchedule> {
        // Without an existing schedule, create one from the live
        // subscription first
        let schedule_id = match schedule_id {
            Some(id) => id.to_string(),
            None => {
                let subscription = self.retrieve_subscription(customer_id).await?;
                let created: RawSchedule = self
                    .bounded(self.stripe.inner().post_form(
                        "/subscription_schedules",
                        &CreateScheduleForm {
                            from_subscription: &subscription.id,
                        },
                    ))
                    .await?;
                tracing::info!(
                    customer_id = %customer_id,
                    schedule_id = %created.id,
                    "Created subscription schedule"
                );
                created.id
            }
        };

        // Phase 1 bills the current plan in full until period end, phase 2
        // starts the new plan there; release lets the subscription keep
        // running after phase 2 begins
        let form = UpdateScheduleForm {
            proration_behavior: "none",
            end_behavior: "release",
            phases: vec![
                SchedulePhaseForm {
                    items: vec![SchedulePhaseItemForm { price: old_plan_id }],
                    start_date: period_start,
                    end_date: Some(period_end),
                },
                SchedulePhaseForm {
                    items: vec![SchedulePhaseItemForm { price: new_plan_id }],
                    start_date: period_end,
                    end_date: None,
                },
            ],
        };

        let schedule: RawSchedule = self
            .bounded(
                self.stripe
                    .inner()
                    .post_form(&format!("/subscription_schedules/{}", schedule_id), &form),
            )
            .await?;

        tracing::info!(
            customer_id = %customer_id,
            schedule_id = %schedule.id,
            old_plan_id = %old_plan_id,
            new_plan_id = %new_plan_id,
            "Configured schedule phases"
        );

        Ok(GatewaySchedule { id: schedule.id })
    }

    async fn release_schedule(&self, schedule_id: &str) -> GatewayResult<GatewaySchedule> {
        let schedule: RawSchedule = self
            .bounded(
                self.stripe
                    .inner()
                    .post(&format!("/subscription_schedules/{}/release", schedule_id)),
            )
            .await?;

        tracing::info!(schedule_id = %schedule.id, "Released subscription schedule");

        Ok(GatewaySchedule { id: schedule.id })
    }

    async fn upcoming_invoice(&self, customer_id: &str) -> GatewayResult<GatewayUpcomingInvoice> {
        let invoice: RawUpcomingInvoice = self
            .bounded(self.stripe.inner().get_query(
                "/invoices/upcoming",
                &UpcomingInvoiceQuery {
                    customer: customer_id,
                },
            ))
            .await?;

        let plan_id = invoice
            .lines
            .data
            .first()
            .and_then(|line| line.plan.as_ref().or(line.price.as_ref()))
            .map(|p| p.id.clone());

        Ok(GatewayUpcomingInvoice {
            plan_id,
            amount_due: invoice.amount_due,
            currency: invoice.currency,
            next_payment_attempt: invoice.next_payment_attempt,
        })
    }

    async fn retrieve_event(&self, event_id: &str) -> GatewayResult<GatewayEvent> {
        let event: RawEvent = self
            .bounded(self.stripe.inner().get(&format!("/events/{}", event_id)))
            .await?;

        Ok(GatewayEvent {
            id: event.id,
            event_type: event.event_type,
            object: event.data.object,
        })
    }
}

// ---------------------------------------------------------------------------
// Mock
// ---------------------------------------------------------------------------

/// In-memory [`PaymentGateway`] for tests
///
/// Records call counts per operation and hands out scripted responses.
#[cfg(any(test, feature = "mock-gateway"))]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, RwLock};

    #[derive(Default)]
    struct MockState {
        create_customer_calls: AtomicU64,
        retrieve_customer_calls: AtomicU64,
        update_card_calls: AtomicU64,
        create_subscription_calls: AtomicU64,
        cancel_subscription_calls: AtomicU64,
        schedule_calls: AtomicU64,
        release_calls: AtomicU64,
        counter: AtomicU64,
        /// Period bounds handed to the next created subscription
        next_period: RwLock<Option<(i64, i64)>>,
        /// Events retrievable by ID
        events: RwLock<HashMap<String, GatewayEvent>>,
        /// Remaining number of release calls to fail before succeeding
        fail_releases: AtomicU64,
        /// When set, card-bearing calls fail with this decline message
        decline: RwLock<Option<String>>,
    }

    /// Clone-shared mock gateway
    #[derive(Clone, Default)]
    pub struct MockGateway {
        state: Arc<MockState>,
    }

    impl MockGateway {
        pub fn new() -> Self {
            Self::default()
        }

        fn next_id(&self, prefix: &str) -> String {
            format!("{}_{}", prefix, self.state.counter.fetch_add(1, Ordering::SeqCst))
        }

        fn mock_card(&self) -> GatewayCard {
            GatewayCard {
                id: self.next_id("card"),
                brand: "Visa".to_string(),
                last4: "4242".to_string(),
                exp_month: 1,
                exp_year: 2100,
            }
        }

        fn period(&self) -> (i64, i64) {
            self.state
                .next_period
                .read()
                .ok()
                .and_then(|p| *p)
                // 2024-01-01 .. 2024-02-01
                .unwrap_or((1_704_067_200, 1_706_745_600))
        }

        /// Script the period bounds of the next created subscription
        pub fn set_next_period(&self, start: i64, end: i64) {
            if let Ok(mut period) = self.state.next_period.write() {
                *period = Some((start, end));
            }
        }

        /// Register an event retrievable by its ID
        pub fn add_event(&self, event: GatewayEvent) {
            if let Ok(mut events) = self.state.events.write() {
                events.insert(event.id.clone(), event);
            }
        }

        /// Make the next `n` release calls fail with a connectivity error
        pub fn fail_next_releases(&self, n: u64) {
            self.state.fail_releases.store(n, Ordering::SeqCst);
        }

        /// Decline every card-bearing call with the given message
        pub fn decline_cards(&self, message: &str) {
            if let Ok(mut decline) = self.state.decline.write() {
                *decline = Some(message.to_string());
            }
        }

        fn check_decline(&self) -> GatewayResult<()> {
            if let Ok(decline) = self.state.decline.read() {
                if let Some(message) = decline.as_ref() {
                    return Err(GatewayError::CardDeclined(message.clone()));
                }
            }
            Ok(())
        }

        pub fn create_customer_calls(&self) -> u64 {
            self.state.create_customer_calls.load(Ordering::SeqCst)
        }

        pub fn update_card_calls(&self) -> u64 {
            self.state.update_card_calls.load(Ordering::SeqCst)
        }

        pub fn create_subscription_calls(&self) -> u64 {
            self.state.create_subscription_calls.load(Ordering::SeqCst)
        }

        pub fn cancel_subscription_calls(&self) -> u64 {
            self.state.cancel_subscription_calls.load(Ordering::SeqCst)
        }

        pub fn schedule_calls(&self) -> u64 {
            self.state.schedule_calls.load(Ordering::SeqCst)
        }

        pub fn release_calls(&self) -> u64 {
            self.state.release_calls.load(Ordering::SeqCst)
        }

        pub fn total_calls(&self) -> u64 {
            self.create_customer_calls()
                + self.state.retrieve_customer_calls.load(Ordering::SeqCst)
                + self.update_card_calls()
                + self.create_subscription_calls()
                + self.cancel_subscription_calls()
                + self.schedule_calls()
                + self.release_calls()
        }
    }

    impl PaymentGateway for MockGateway {
        async fn create_customer(
            &self,
            name: &str,
            email: &str,
            _payment_token: &str,
        ) -> GatewayResult<GatewayCustomer> {
            self.state.create_customer_calls.fetch_add(1, Ordering::SeqCst);
            self.check_decline()?;
            Ok(GatewayCustomer {
                id: self.next_id("cus"),
                email: Some(email.to_string()),
                name: Some(name.to_string()),
                default_card: Some(self.mock_card()),
            })
        }

        async fn retrieve_customer(&self, customer_id: &str) -> GatewayResult<GatewayCustomer> {
            self.state.retrieve_customer_calls.fetch_add(1, Ordering::SeqCst);
            Ok(GatewayCustomer {
                id: customer_id.to_string(),
                email: Some("mock@example.com".to_string()),
                name: Some("Mock Customer".to_string()),
                default_card: Some(self.mock_card()),
            })
        }

        async fn update_default_card(
            &self,
            _customer_id: &str,
            _name: &str,
            _payment_token: &str,
        ) -> GatewayResult<GatewayCard> {
            self.state.update_card_calls.fetch_add(1, Ordering::SeqCst);
            self.check_decline()?;
            Ok(self.mock_card())
        }

        async fn create_subscription(
            &self,
            _customer_id: &str,
            plan_id: &str,
        ) -> GatewayResult<GatewaySubscription> {
            self.state.create_subscription_calls.fetch_add(1, Ordering::SeqCst);
            self.check_decline()?;
            let (start, end) = self.period();
            Ok(GatewaySubscription {
                id: self.next_id("sub"),
                current_period_start: start,
                current_period_end: end,
                plan_id: Some(plan_id.to_string()),
            })
        }

        async fn retrieve_subscription(
            &self,
            _customer_id: &str,
        ) -> GatewayResult<GatewaySubscription> {
            let (start, end) = self.period();
            Ok(GatewaySubscription {
                id: "sub_mock".to_string(),
                current_period_start: start,
                current_period_end: end,
                plan_id: None,
            })
        }

        async fn cancel_subscription(
            &self,
            customer_id: &str,
        ) -> GatewayResult<GatewaySubscription> {
            self.state.cancel_subscription_calls.fetch_add(1, Ordering::SeqCst);
            self.retrieve_subscription(customer_id).await
        }

        async fn create_or_update_schedule(
            &self,
            _customer_id: &str,
            schedule_id: Option<&str>,
            _new_plan_id: &str,
            _old_plan_id: &str,
            _period_start: i64,
            _period_end: i64,
        ) -> GatewayResult<GatewaySchedule> {
            self.state.schedule_calls.fetch_add(1, Ordering::SeqCst);
            Ok(GatewaySchedule {
                id: schedule_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| self.next_id("sched")),
            })
        }

        async fn release_schedule(&self, schedule_id: &str) -> GatewayResult<GatewaySchedule> {
            self.state.release_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.state.fail_releases.load(Ordering::SeqCst);
            if remaining > 0 {
                self.state.fail_releases.store(remaining - 1, Ordering::SeqCst);
                return Err(GatewayError::Connectivity("mock release failure".to_string()));
            }
            Ok(GatewaySchedule {
                id: schedule_id.to_string(),
            })
        }

        async fn upcoming_invoice(
            &self,
            _customer_id: &str,
        ) -> GatewayResult<GatewayUpcomingInvoice> {
            let (_, end) = self.period();
            Ok(GatewayUpcomingInvoice {
                plan_id: Some("price_monthly".to_string()),
                amount_due: 245,
                currency: "usd".to_string(),
                next_payment_attempt: Some(end),
            })
        }

        async fn retrieve_event(&self, event_id: &str) -> GatewayResult<GatewayEvent> {
            self.state
                .events
                .read()
                .ok()
                .and_then(|events| events.get(event_id).cloned())
                .ok_or_else(|| {
                    GatewayError::InvalidRequest(format!("No such event: {}", event_id))
                })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_datetime_round_trip() {
        let ts = 1_704_067_200; // 2024-01-01T00:00:00Z
        let dt = datetime_from_unix(ts).unwrap();
        assert_eq!(dt.year(), 2024);
        assert_eq!(unix_from_datetime(dt), ts);
    }

    #[test]
    fn test_datetime_rejects_out_of_range() {
        assert!(datetime_from_unix(i64::MAX).is_err());
    }

    #[tokio::test]
    async fn test_mock_counts_calls() {
        use mock::MockGateway;

        let gateway = MockGateway::new();
        let customer = gateway
            .create_customer("Ann", "ann@example.com", "tok_visa")
            .await
            .unwrap();
        let _sub = gateway
            .create_subscription(&customer.id, "price_monthly")
            .await
            .unwrap();

        assert_eq!(gateway.create_customer_calls(), 1);
        assert_eq!(gateway.create_subscription_calls(), 1);
        assert_eq!(gateway.cancel_subscription_calls(), 0);
    }

    #[tokio::test]
    async fn test_mock_retrieve_event_unknown() {
        use mock::MockGateway;

        let gateway = MockGateway::new();
        let err = gateway.retrieve_event("evt_missing").await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidRequest(_)));
    }
}
