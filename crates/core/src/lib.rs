//! Stallplass Core - Domain entities, rules, and collaborator traits.
//!
//! This crate contains the domain model for the rental-lifecycle
//! reconciliation subsystem: payments and their provider state mapping,
//! the rental state machine and conflict rule, the change-feed event model,
//! and the notification rule engine for owners and renters.
//!
//! It is storage-agnostic. The relational store, the wallet-payment provider
//! and the realtime change feed are reached through the traits defined here;
//! `memory` provides in-process implementations used by the server and tests.

pub mod conversations;
pub mod errors;
pub mod events;
pub mod memory;
pub mod notifications;
pub mod payments;
pub mod rentals;
pub mod users;

// Re-export error types
pub use errors::Error;
pub use errors::Result;
