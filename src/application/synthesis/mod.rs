// Rule synthesis: the guard DSL, candidate validation and safe merging.

pub mod builder;
pub mod expr;
pub mod validator;

pub use builder::{ConditionSynthesizer, GUARD_BLOCK_BEGIN, GUARD_BLOCK_END};
pub use expr::{parse_expression, parse_rule, Expr, Rule, DECISION_FLAG};
pub use validator::ConditionValidator;
