//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the billing domain to external systems:
//! - `stripe` - Payment processor gateway (plus a mock for tests and local runs)
//! - `postgres` - Repository implementations on PostgreSQL
//! - `memory` - In-memory repositories and collaborators
//! - `notifications` - Audit log and mailer backed by structured logs
//! - `http` - REST API

pub mod http;
pub mod memory;
pub mod notifications;
pub mod postgres;
pub mod stripe;
