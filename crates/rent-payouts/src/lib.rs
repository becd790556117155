//! Payout orchestration for rental marketplace participants.
//!
//! The crate computes what brokers, owners, runners, and service providers are
//! owed, screens each disbursement for fraud, and routes transfers through
//! interchangeable bank and gateway integrations.

pub mod clock;
pub mod config;
pub mod error;
pub mod fraud;
pub mod payouts;
pub mod providers;
pub mod telemetry;
