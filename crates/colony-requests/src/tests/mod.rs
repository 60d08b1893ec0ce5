//! Cross-module tests for the request engine.
//!
//! - `scenarios.rs`: end-to-end workflows through the manager
//! - `persistence.rs`: snapshot round trips and reconciliation
//! - `determinism.rs`: same seed and inputs give the same outcome
//! - `properties.rs`: property tests for graph and assignment invariants
//! - `helpers.rs`: scripted resolvers, providers and setup utilities

mod helpers;
mod scenarios;

pub use helpers::*;
