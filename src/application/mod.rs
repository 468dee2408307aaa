// Trade-log mining
pub mod analyzer;

// Filter candidate generation
pub mod filtering;

// Rule-language parsing and guard merging
pub mod synthesis;

// Iteration comparison and convergence
pub mod comparison;

// Search and optimization strategies
pub mod search;

// Overfitting guard
pub mod overfit;

// Walk-forward validation
pub mod walk_forward;

// The refinement loop
pub mod orchestrator;

// Console and JSON reporting
pub mod reporting;
