//! Shared application state

use std::sync::Arc;

use courtside_billing::{
    BillingEmailService, BillingResult, InvoiceService, PlanCatalog, StripeClient, StripeGateway,
    SubscriptionService, WebhookReconciler,
};
use sqlx::PgPool;

use crate::auth::JwtManager;
use crate::config::Config;

/// Billing service bundle
#[derive(Clone)]
pub struct Billing {
    pub plans: PlanCatalog,
    pub gateway: StripeGateway,
    pub subscriptions: SubscriptionService<StripeGateway>,
    pub invoices: InvoiceService<StripeGateway>,
    pub reconciler: WebhookReconciler<StripeGateway>,
}

impl Billing {
    /// Wire the billing services from environment configuration
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        let plans = PlanCatalog::from_config(stripe.config());
        // Test clocks can swallow schedule releases; retry in that case
        let debug_release_retry = stripe.config().test_clock.is_some();
        let gateway = StripeGateway::new(stripe);
        let email = BillingEmailService::from_env();

        Ok(Self {
            plans: plans.clone(),
            gateway: gateway.clone(),
            subscriptions: SubscriptionService::new(
                gateway.clone(),
                pool.clone(),
                plans.clone(),
                email.clone(),
            ),
            invoices: InvoiceService::new(gateway.clone(), pool.clone(), plans.clone()),
            reconciler: WebhookReconciler::new(
                gateway,
                pool,
                plans,
                email,
                debug_release_retry,
            ),
        })
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub jwt: JwtManager,
    pub billing: Arc<Billing>,
}

impl AppState {
    pub fn new(config: Config, pool: PgPool) -> BillingResult<Self> {
        let jwt = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);
        let billing = Arc::new(Billing::from_env(pool.clone())?);

        Ok(Self {
            pool,
            config: Arc::new(config),
            jwt,
            billing,
        })
    }
}
