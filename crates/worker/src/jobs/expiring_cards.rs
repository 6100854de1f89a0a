//! Nightly card-expiry marking
//!
//! Flags cards that have expired or will expire within the warning
//! threshold so the site can prompt the user to update their payment
//! method.

use sqlx::PgPool;
use time::OffsetDateTime;

/// Run one marking pass. Logs instead of returning errors; the scheduler
/// retries on the next tick.
pub async fn run(pool: &PgPool) {
    let today = OffsetDateTime::now_utc().date();

    match courtside_billing::mark_expiring_cards(pool, today).await {
        Ok(flagged) => {
            if flagged > 0 {
                tracing::info!(flagged = flagged, "Flagged expiring cards");
            } else {
                tracing::debug!("No newly expiring cards");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to mark expiring cards");
        }
    }
}
