//! Scheduled jobs

pub mod expiring_cards;
