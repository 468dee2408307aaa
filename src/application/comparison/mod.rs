// Iteration-to-iteration metric comparison and convergence policies.

pub mod comparator;
pub mod convergence;

pub use comparator::{ComparisonResult, MetricChange, ResultComparator};
pub use convergence::{ConvergenceChecker, ConvergencePolicy, ConvergenceVerdict};
