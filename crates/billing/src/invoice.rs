//! Invoice records and next-bill preview
//!
//! Invoices are an append-only history of billed periods, written only by
//! the webhook reconciler on successful payment. Card details are copied
//! in at write time so history stays renderable after a card or
//! subscription disappears.

use serde_json::Value;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use courtside_shared::types::{Card, Invoice, User};

use crate::client::PlanCatalog;
use crate::error::{BillingError, BillingResult};
use crate::gateway::{datetime_from_unix, PaymentGateway};

/// Invoice fields extracted from a verified `invoice.payment_succeeded`
/// event payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInvoice {
    /// Gateway customer reference of the paying user
    pub payment_id: String,
    pub download_url: Option<String>,
    pub invoice_number: Option<String>,
    pub receipt_number: Option<String>,
    pub plan_id: String,
    pub plan_name: String,
    pub description: String,
    pub period_start_on: time::Date,
    pub period_end_on: time::Date,
    pub currency: String,
    pub total: i64,
}

/// Extract the fields we persist from an invoice event's `data.object`
///
/// Plan information comes from the first line item; the period bounds are
/// that line's billing period.
pub fn parse_from_event(object: &Value, plans: &PlanCatalog) -> BillingResult<ParsedInvoice> {
    let payment_id = object
        .get("customer")
        .and_then(Value::as_str)
        .ok_or_else(|| BillingError::InvalidEvent("invoice event missing customer".to_string()))?
        .to_string();

    let line = object
        .pointer("/lines/data/0")
        .ok_or_else(|| BillingError::InvalidEvent("invoice event has no line items".to_string()))?;

    let plan_id = line
        .pointer("/plan/id")
        .or_else(|| line.pointer("/price/id"))
        .and_then(Value::as_str)
        .ok_or_else(|| BillingError::InvalidEvent("invoice line has no plan".to_string()))?
        .to_string();

    let period_start = line
        .pointer("/period/start")
        .and_then(Value::as_i64)
        .ok_or_else(|| BillingError::InvalidEvent("invoice line missing period start".to_string()))?;
    let period_end = line
        .pointer("/period/end")
        .and_then(Value::as_i64)
        .ok_or_else(|| BillingError::InvalidEvent("invoice line missing period end".to_string()))?;

    Ok(ParsedInvoice {
        payment_id,
        download_url: object
            .get("hosted_invoice_url")
            .and_then(Value::as_str)
            .map(str::to_string),
        invoice_number: object
            .get("number")
            .and_then(Value::as_str)
            .map(str::to_string),
        receipt_number: object
            .get("receipt_number")
            .and_then(Value::as_str)
            .map(str::to_string),
        plan_name: plans.name_for(&plan_id),
        description: plans.description_for(&plan_id),
        plan_id,
        period_start_on: datetime_from_unix(period_start)?.date(),
        period_end_on: datetime_from_unix(period_end)?.date(),
        currency: object
            .get("currency")
            .and_then(Value::as_str)
            .unwrap_or("usd")
            .to_string(),
        total: object.get("total").and_then(Value::as_i64).unwrap_or(0),
    })
}

/// Preview of the next bill for display
#[derive(Debug, Clone, serde::Serialize)]
pub struct UpcomingBill {
    pub plan_name: String,
    pub amount_due: i64,
    pub currency: String,
    pub next_bill_on: Option<OffsetDateTime>,
}

/// Invoice queries and persistence
#[derive(Clone)]
pub struct InvoiceService<G> {
    gateway: G,
    pool: PgPool,
    plans: PlanCatalog,
}

impl<G: PaymentGateway + Clone> InvoiceService<G> {
    pub fn new(gateway: G, pool: PgPool, plans: PlanCatalog) -> Self {
        Self {
            gateway,
            pool,
            plans,
        }
    }

    /// Persist an invoice from a verified payment event
    ///
    /// Skips (returning `Ok(None)`) when no local user matches the paying
    /// customer or the user has no card on file: an invoice without a card
    /// to denormalize would be incomplete data.
    pub async fn record_payment(&self, parsed: &ParsedInvoice) -> BillingResult<Option<Invoice>> {
        let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE payment_id = $1")
            .bind(&parsed.payment_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(user) = user else {
            tracing::debug!(payment_id = %parsed.payment_id, "No user for paid invoice, skipping");
            return Ok(None);
        };

        let card: Option<Card> = sqlx::query_as("SELECT * FROM cards WHERE user_id = $1")
            .bind(user.id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(card) = card else {
            tracing::debug!(user_id = %user.id, "User has no card on file, skipping invoice");
            return Ok(None);
        };

        let invoice: Invoice = sqlx::query_as(
            r#"
            INSERT INTO invoices
                (id, user_id, download_url, invoice_number, receipt_number,
                 plan_id, plan_name, description, period_start_on, period_end_on,
                 currency, total, brand, last4, exp_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.id)
        .bind(&parsed.download_url)
        .bind(&parsed.invoice_number)
        .bind(&parsed.receipt_number)
        .bind(&parsed.plan_id)
        .bind(&parsed.plan_name)
        .bind(&parsed.description)
        .bind(parsed.period_start_on)
        .bind(parsed.period_end_on)
        .bind(&parsed.currency)
        .bind(parsed.total)
        .bind(&card.brand)
        .bind(&card.last4)
        .bind(card.exp_date)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            user_id = %user.id,
            invoice_id = %invoice.id,
            total = invoice.total,
            "Recorded invoice"
        );

        Ok(Some(invoice))
    }

    /// Preview the next bill for a gateway customer
    pub async fn upcoming(&self, customer_id: &str) -> BillingResult<UpcomingBill> {
        let preview = self.gateway.upcoming_invoice(customer_id).await?;

        let next_bill_on = preview
            .next_payment_attempt
            .map(datetime_from_unix)
            .transpose()?;

        Ok(UpcomingBill {
            plan_name: preview
                .plan_id
                .as_deref()
                .map(|id| self.plans.name_for(id))
                .unwrap_or_default(),
            amount_due: preview.amount_due,
            currency: preview.currency,
            next_bill_on,
        })
    }

    /// Most recent invoices for a user, newest first
    pub async fn billing_history(&self, user_id: Uuid, limit: i64) -> BillingResult<Vec<Invoice>> {
        let invoices: Vec<Invoice> = sqlx::query_as(
            r#"
            SELECT * FROM invoices
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(invoices)
    }
}
