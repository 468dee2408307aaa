// Trade ledger model
pub mod ledger;

// Mined loss patterns and feature importances
pub mod patterns;

// Guard-clause filter candidates
pub mod filters;

// Iteration history and merge results
pub mod iteration;

// Canonical metric names and improvement directions
pub mod metrics;

// Analyzable feature vocabulary
pub mod features;

// Port interfaces
pub mod ports;

// Domain-specific error types
pub mod errors;
