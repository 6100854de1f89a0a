//! Common types used across Courtside

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// User role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Member,
}

impl Default for UserRole {
    fn default() -> Self {
        Self::Member
    }
}

impl UserRole {
    /// Check if this role can access the back-office
    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }

    /// Parse a role from string (case insensitive)
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "admin" => Self::Admin,
            _ => Self::Member, // Default to member for unknown roles
        }
    }
}

/// User model
///
/// `payment_id` is the gateway customer reference; it is set on first
/// subscription creation and never reused across gateway customers.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: UserRole,
    pub locale: String,
    /// Billing name as entered at checkout
    pub billing_name: Option<String>,
    /// Gateway customer reference
    pub payment_id: Option<String>,
    pub cancelled_subscription_on: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Subscription model (one per user)
///
/// `new_plan_id` equals `plan_id` unless a plan change is pending, in
/// which case `subscription_schedule_id` holds the gateway schedule that
/// will apply the change at the next renewal.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Currently active plan
    pub plan_id: String,
    /// Plan that becomes active at the next renewal
    pub new_plan_id: String,
    /// Gateway subscription reference
    pub subscription_id: String,
    /// Gateway schedule reference, present only while a change is pending
    pub subscription_schedule_id: Option<String>,
    pub current_period_start: OffsetDateTime,
    pub current_period_end: OffsetDateTime,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Subscription {
    /// True if a deferred plan change is staged for the next renewal
    pub fn has_pending_change(&self) -> bool {
        self.new_plan_id != self.plan_id
    }
}

/// Card model (one per user)
///
/// Denormalized snapshot of the gateway's default payment method,
/// recomputed whenever the gateway card changes.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Card {
    pub id: Uuid,
    pub user_id: Uuid,
    pub brand: String,
    pub last4: String,
    pub exp_date: Date,
    pub is_expiring: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Invoice model (append-only billing history)
///
/// Card details are denormalized at time of billing so history stays
/// renderable after the card or subscription is deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Invoice {
    pub id: Uuid,
    pub user_id: Uuid,
    pub download_url: Option<String>,
    pub invoice_number: Option<String>,
    pub receipt_number: Option<String>,
    pub plan_id: String,
    pub plan_name: String,
    pub description: String,
    pub period_start_on: Date,
    pub period_end_on: Date,
    pub currency: String,
    /// Total in the currency's minor unit (cents)
    pub total: i64,
    pub brand: String,
    pub last4: String,
    pub exp_date: Date,
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_str_lossy() {
        assert_eq!(UserRole::from_str_lossy("Admin"), UserRole::Admin);
        assert_eq!(UserRole::from_str_lossy("member"), UserRole::Member);
        assert_eq!(UserRole::from_str_lossy("unknown"), UserRole::Member);
    }

    #[test]
    fn test_pending_change() {
        let now = OffsetDateTime::now_utc();
        let sub = Subscription {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            plan_id: "price_monthly".to_string(),
            new_plan_id: "price_yearly".to_string(),
            subscription_id: "sub_1".to_string(),
            subscription_schedule_id: Some("sched_1".to_string()),
            current_period_start: now,
            current_period_end: now + time::Duration::days(30),
            created_at: now,
            updated_at: now,
        };
        assert!(sub.has_pending_change());
    }
}
