//! Card snapshots
//!
//! The local card row is a denormalized copy of the gateway's default
//! payment method. It is recomputed only at subscription creation,
//! payment-method update, and cancellation; never backfilled.

use sqlx::PgPool;
use time::Date;

use crate::error::{BillingError, BillingResult};
use crate::gateway::GatewayCard;

/// Threshold (in months) under which a card is flagged as expiring, used
/// for a site-wide notice to update the card
pub const IS_EXPIRING_THRESHOLD_MONTHS: u32 = 2;

/// Denormalized card fields extracted from a gateway card
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardParams {
    pub brand: String,
    pub last4: String,
    pub exp_date: Date,
    pub is_expiring: bool,
}

impl CardParams {
    /// Extract card fields from the gateway's default payment method
    ///
    /// The expiration date is pinned to the first day of its year-month.
    pub fn from_gateway(card: &GatewayCard, today: Date) -> BillingResult<Self> {
        let exp_date = exp_date_from_parts(card.exp_year, card.exp_month)?;
        Ok(Self {
            brand: card.brand.clone(),
            last4: card.last4.clone(),
            exp_date,
            is_expiring: is_expiring_soon(exp_date, today),
        })
    }
}

/// Build the expiration date (first day of the year-month) from card parts
pub fn exp_date_from_parts(exp_year: i32, exp_month: u8) -> BillingResult<Date> {
    let month = time::Month::try_from(exp_month)
        .map_err(|e| BillingError::Internal(format!("bad expiration month {}: {}", exp_month, e)))?;
    Date::from_calendar_date(exp_year, month, 1)
        .map_err(|e| BillingError::Internal(format!("bad expiration date: {}", e)))
}

/// True if the card expires within the threshold of `compare_date`
pub fn is_expiring_soon(exp_date: Date, compare_date: Date) -> bool {
    exp_date <= add_months(compare_date, IS_EXPIRING_THRESHOLD_MONTHS)
}

/// Add whole months to a date, clamping the day to the target month's length
fn add_months(date: Date, months: u32) -> Date {
    let total = (date.month() as u32 - 1) + months;
    let year = date.year() + (total / 12) as i32;
    let month_number = (total % 12) as u8 + 1;
    // month_number is always 1..=12 here
    let month = time::Month::try_from(month_number).unwrap_or(time::Month::January);
    let day = date.day().min(month.length(year));
    Date::from_calendar_date(year, month, day)
        .unwrap_or_else(|_| Date::from_calendar_date(year, month, 1).unwrap_or(date))
}

/// Flag every card that has expired or will expire within the threshold
///
/// Run nightly by the worker. Returns the number of cards flagged.
pub async fn mark_expiring_cards(pool: &PgPool, compare_date: Date) -> BillingResult<u64> {
    let threshold = add_months(compare_date, IS_EXPIRING_THRESHOLD_MONTHS);

    let result = sqlx::query(
        r#"
        UPDATE cards
        SET is_expiring = TRUE, updated_at = NOW()
        WHERE exp_date <= $1 AND is_expiring = FALSE
        "#,
    )
    .bind(threshold)
    .execute(pool)
    .await?;

    let flagged = result.rows_affected();
    if flagged > 0 {
        tracing::info!(flagged = flagged, threshold = %threshold, "Marked expiring cards");
    }

    Ok(flagged)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_add_months_carries_year() {
        assert_eq!(add_months(date!(2024 - 11 - 15), 2), date!(2025 - 01 - 15));
        assert_eq!(add_months(date!(2024 - 01 - 01), 2), date!(2024 - 03 - 01));
    }

    #[test]
    fn test_add_months_clamps_day() {
        // Dec 31 + 2 months lands in February
        assert_eq!(add_months(date!(2024 - 12 - 31), 2), date!(2025 - 02 - 28));
    }

    #[test]
    fn test_is_expiring_soon_within_threshold() {
        let today = date!(2024 - 01 - 15);
        assert!(is_expiring_soon(date!(2024 - 02 - 01), today));
        assert!(is_expiring_soon(date!(2024 - 03 - 01), today));
        // Already expired counts too
        assert!(is_expiring_soon(date!(2023 - 12 - 01), today));
    }

    #[test]
    fn test_is_expiring_soon_outside_threshold() {
        let today = date!(2024 - 01 - 15);
        assert!(!is_expiring_soon(date!(2024 - 04 - 01), today));
        assert!(!is_expiring_soon(date!(2026 - 01 - 01), today));
    }

    #[test]
    fn test_card_params_from_gateway() {
        let card = GatewayCard {
            id: "card_1".to_string(),
            brand: "Visa".to_string(),
            last4: "4242".to_string(),
            exp_month: 3,
            exp_year: 2024,
        };
        let params = CardParams::from_gateway(&card, date!(2024 - 01 - 15)).unwrap();
        assert_eq!(params.exp_date, date!(2024 - 03 - 01));
        assert!(params.is_expiring);

        let params = CardParams::from_gateway(&card, date!(2023 - 06 - 01)).unwrap();
        assert!(!params.is_expiring);
    }

    #[test]
    fn test_exp_date_rejects_bad_month() {
        assert!(exp_date_from_parts(2024, 13).is_err());
        assert!(exp_date_from_parts(2024, 0).is_err());
    }
}
