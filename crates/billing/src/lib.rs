//! Courtside Billing
//!
//! Subscription lifecycle, card/invoice records, and webhook
//! reconciliation against the Stripe billing gateway.
//!
//! The synchronous path (user-driven create / plan change / cancel /
//! payment-method update) and the asynchronous path (gateway webhooks)
//! both run through the [`gateway::PaymentGateway`] contract and converge
//! on the same local rows; the reconciler's period-bound comparison keeps
//! redelivered events idempotent.

pub mod card;
pub mod client;
pub mod email;
pub mod error;
pub mod gateway;
pub mod invoice;
pub mod subscription;
pub mod webhook;

pub use card::{mark_expiring_cards, CardParams, IS_EXPIRING_THRESHOLD_MONTHS};
pub use client::{Plan, PlanCatalog, PlanInterval, PriceIds, StripeClient, StripeConfig};
pub use email::{BillingEmailService, EmailConfig};
pub use error::{BillingError, BillingResult, GatewayError, GatewayResult};
pub use gateway::{
    GatewayCard, GatewayCustomer, GatewayEvent, GatewaySchedule, GatewaySubscription,
    GatewayUpcomingInvoice, PaymentGateway, StripeGateway,
};
pub use invoice::{InvoiceService, ParsedInvoice, UpcomingBill};
pub use subscription::SubscriptionService;
pub use webhook::WebhookReconciler;
