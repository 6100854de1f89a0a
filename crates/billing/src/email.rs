//! Email notifications for billing events
//!
//! Sends transactional emails via Resend API. Callers dispatch these
//! fire-and-forget; a failed send is logged and never fails the request
//! that triggered it.

use crate::error::BillingResult;

/// Email configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Resend API key
    pub resend_api_key: String,
    /// From address for emails
    pub email_from: String,
    /// App name for branding
    pub app_name: String,
    /// Support email
    pub support_email: String,
    /// Dashboard URL
    pub dashboard_url: String,
}

impl EmailConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self {
            resend_api_key: std::env::var("RESEND_API_KEY").unwrap_or_default(),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Courtside <noreply@courtside.tv>".to_string()),
            app_name: std::env::var("APP_NAME").unwrap_or_else(|_| "Courtside".to_string()),
            support_email: std::env::var("SUPPORT_EMAIL")
                .unwrap_or_else(|_| "support@courtside.tv".to_string()),
            dashboard_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "https://courtside.tv".to_string()),
        }
    }

    /// Check if email sending is enabled
    pub fn is_enabled(&self) -> bool {
        !self.resend_api_key.is_empty()
    }
}

/// Billing email notification service
#[derive(Clone)]
pub struct BillingEmailService {
    config: EmailConfig,
    client: reqwest::Client,
}

impl BillingEmailService {
    /// Create a new email service
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Self {
        Self::new(EmailConfig::from_env())
    }

    /// Send an email via Resend API
    ///
    /// Returns `Ok(true)` if the email was sent, `Ok(false)` if sending
    /// failed or email is not configured (non-fatal, never propagated to
    /// the request that triggered the notification).
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> BillingResult<bool> {
        if !self.config.is_enabled() {
            tracing::warn!(
                to = %to,
                subject = %subject,
                "Email not configured, skipping"
            );
            return Ok(false);
        }

        let body = serde_json::json!({
            "from": self.config.email_from,
            "to": [to],
            "subject": subject,
            "html": html
        });

        let response = self
            .client
            .post("https://api.resend.com/emails")
            .bearer_auth(&self.config.resend_api_key)
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(to = %to, subject = %subject, "Email sent");
                Ok(true)
            }
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                tracing::error!(
                    to = %to,
                    status = %status,
                    response = %text,
                    "Email send rejected"
                );
                Ok(false)
            }
            Err(e) => {
                tracing::error!(to = %to, error = %e, "Email send failed");
                Ok(false)
            }
        }
    }

    /// Confirmation after a subscription is created
    pub async fn send_subscription_created(
        &self,
        to: &str,
        plan_name: &str,
    ) -> BillingResult<bool> {
        let subject = format!("Welcome to {} {}", self.config.app_name, plan_name);
        let html = format!(
            "<p>Your {} subscription is active.</p>\
             <p>Manage your plan any time from your <a href=\"{}/billing\">billing settings</a>.</p>\
             <p>Questions? Reach us at {}.</p>",
            plan_name, self.config.dashboard_url, self.config.support_email
        );
        self.send_email(to, &subject, &html).await
    }

    /// Confirmation after a subscription is cancelled
    pub async fn send_subscription_cancelled(&self, to: &str) -> BillingResult<bool> {
        let subject = format!("Your {} subscription has been cancelled", self.config.app_name);
        let html = format!(
            "<p>Your subscription has been cancelled and you will not be billed again.</p>\
             <p>You can re-subscribe any time at <a href=\"{}\">{}</a>.</p>",
            self.config.dashboard_url, self.config.app_name
        );
        self.send_email(to, &subject, &html).await
    }

    /// Receipt after a successful renewal payment
    pub async fn send_payment_receipt(
        &self,
        to: &str,
        plan_name: &str,
        total_cents: i64,
        currency: &str,
    ) -> BillingResult<bool> {
        let subject = format!("{} payment receipt", self.config.app_name);
        let html = format!(
            "<p>We received your payment of {:.2} {} for the {} plan.</p>\
             <p>Your full billing history is in your <a href=\"{}/billing\">billing settings</a>.</p>",
            total_cents as f64 / 100.0,
            currency.to_uppercase(),
            plan_name,
            self.config.dashboard_url
        );
        self.send_email(to, &subject, &html).await
    }

    /// Warning that the card on file is about to expire
    pub async fn send_card_expiring(&self, to: &str, last4: &str) -> BillingResult<bool> {
        let subject = format!("Your card on file with {} is expiring", self.config.app_name);
        let html = format!(
            "<p>The card ending in {} is expiring soon.</p>\
             <p>Please update your payment method in your \
             <a href=\"{}/billing\">billing settings</a> to avoid any \
             interruption.</p>",
            last4, self.config.dashboard_url
        );
        self.send_email(to, &subject, &html).await
    }
}
