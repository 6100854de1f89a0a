//! Stripe client configuration and plan catalog

use serde::Serialize;
use stripe::Client;

use crate::error::{BillingError, BillingResult};

/// Configuration for Stripe billing
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Price IDs for the recurring plans
    pub price_ids: PriceIds,
    /// Test clock to attach to new customers (debug environments only)
    pub test_clock: Option<String>,
    /// Base URL for user-facing links in notification emails
    pub app_base_url: String,
}

/// Stripe price IDs for the two recurring plans
#[derive(Debug, Clone)]
pub struct PriceIds {
    pub monthly: String,
    pub yearly: String,
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            price_ids: PriceIds {
                monthly: std::env::var("STRIPE_PRICE_MONTHLY")
                    .map_err(|_| BillingError::Config("STRIPE_PRICE_MONTHLY not set".to_string()))?,
                yearly: std::env::var("STRIPE_PRICE_YEARLY")
                    .map_err(|_| BillingError::Config("STRIPE_PRICE_YEARLY not set".to_string()))?,
            },
            test_clock: std::env::var("STRIPE_TEST_CLOCK").ok().filter(|v| !v.is_empty()),
            app_base_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        })
    }
}

/// Billing interval of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanInterval {
    Month,
    Year,
}

/// A subscribable plan
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    /// Stripe price ID
    pub id: String,
    /// Display name ("Monthly", "Yearly")
    pub name: String,
    /// Price in the currency's minor unit
    pub amount: i64,
    pub currency: String,
    pub interval: PlanInterval,
    /// Appears on card statements and invoice descriptions
    pub statement_descriptor: String,
}

/// The set of plans a user can subscribe to, keyed by Stripe price ID
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
}

impl PlanCatalog {
    /// Build the catalog from configured price IDs
    pub fn from_config(config: &StripeConfig) -> Self {
        Self {
            plans: vec![
                Plan {
                    id: config.price_ids.monthly.clone(),
                    name: "Monthly".to_string(),
                    amount: 245,
                    currency: "usd".to_string(),
                    interval: PlanInterval::Month,
                    statement_descriptor: "courtside plan".to_string(),
                },
                Plan {
                    id: config.price_ids.yearly.clone(),
                    name: "Yearly".to_string(),
                    amount: 2495,
                    currency: "usd".to_string(),
                    interval: PlanInterval::Year,
                    statement_descriptor: "courtside plan".to_string(),
                },
            ],
        }
    }

    /// Build a catalog from explicit plans (tests, seeds)
    pub fn new(plans: Vec<Plan>) -> Self {
        Self { plans }
    }

    /// Look up a plan by its price ID
    pub fn by_id(&self, plan_id: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.id == plan_id)
    }

    /// Display name for a price ID, empty if unknown
    pub fn name_for(&self, plan_id: &str) -> String {
        self.by_id(plan_id).map(|p| p.name.clone()).unwrap_or_default()
    }

    /// Statement descriptor for a price ID, empty if unknown
    pub fn description_for(&self, plan_id: &str) -> String {
        self.by_id(plan_id)
            .map(|p| p.statement_descriptor.clone())
            .unwrap_or_default()
    }

    /// All plans, in display order
    pub fn all(&self) -> &[Plan] {
        &self.plans
    }
}

/// Stripe billing client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    /// Create a new Stripe client from config
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::new(&config.secret_key);
        Self { client, config }
    }

    /// Create a new Stripe client from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::new(config))
    }

    /// Get the inner Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the config
    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn test_config() -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test_123".to_string(),
            price_ids: PriceIds {
                monthly: "price_monthly".to_string(),
                yearly: "price_yearly".to_string(),
            },
            test_clock: None,
            app_base_url: "http://localhost:3000".to_string(),
        }
    }

    #[test]
    fn test_catalog_lookup() {
        let catalog = PlanCatalog::from_config(&test_config());
        assert_eq!(catalog.name_for("price_monthly"), "Monthly");
        assert_eq!(catalog.name_for("price_yearly"), "Yearly");
        assert_eq!(catalog.name_for("price_unknown"), "");
        assert!(catalog.by_id("price_yearly").is_some());
        assert_eq!(catalog.all().len(), 2);
    }

    #[test]
    fn test_catalog_amounts() {
        let catalog = PlanCatalog::from_config(&test_config());
        let monthly = catalog.by_id("price_monthly").unwrap();
        let yearly = catalog.by_id("price_yearly").unwrap();
        assert!(monthly.amount < yearly.amount);
        assert_eq!(monthly.interval, PlanInterval::Month);
        assert_eq!(yearly.interval, PlanInterval::Year);
    }
}
