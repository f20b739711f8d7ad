//! Gallery Billing - subscription lifecycle for the photo gallery platform
//!
//! Keeps each user's plan in step with their Stripe subscription: checkout,
//! upgrades, scheduled downgrades, cancellation and webhook reconciliation.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
