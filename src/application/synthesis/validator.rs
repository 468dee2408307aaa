//! Safety validation for candidate conditions and merged rules.
//!
//! A deny-list screen runs first so hostile text gets named for what it is,
//! then the language's own parser does the real work: anything the grammar
//! cannot express never reaches a merge, and every referenced identifier
//! must come from the allow-listed feature vocabulary. Numeric literals and
//! the indexed `param[i]` form are always allowed.

use std::collections::BTreeSet;

use crate::domain::errors::SynthesisError;
use crate::domain::features::FeatureCatalog;

use super::expr::{self, builtin_arity, Expr, Rule, Statement};

/// Escape-hatch tokens rejected before parsing. Case-insensitive.
const DENY_TOKENS: &[&str] = &[
    "import",
    "__",
    "eval",
    "exec",
    "compile",
    "getattr",
    "setattr",
    "globals",
    "locals",
    "open(",
    "os.",
    "sys.",
    "subprocess",
    "socket",
    "system(",
    "input(",
];

pub struct ConditionValidator {
    allowed: BTreeSet<String>,
}

impl ConditionValidator {
    pub fn new(catalog: &FeatureCatalog) -> Self {
        Self {
            allowed: catalog.allowed_identifiers(),
        }
    }

    /// Validates a single candidate condition and returns its parsed form.
    pub fn validate_condition(&self, condition: &str) -> Result<Expr, SynthesisError> {
        let trimmed = condition.trim();
        if trimmed.is_empty() {
            return Err(SynthesisError::EmptyCondition);
        }
        screen_denied(trimmed)?;
        check_balance(trimmed)?;

        let parsed = expr::parse_expression(trimmed)?;
        check_calls(&parsed)?;

        let mut referenced = BTreeSet::new();
        parsed.identifiers(&mut referenced);
        for name in &referenced {
            if !self.allowed.contains(name) {
                return Err(SynthesisError::UnknownIdentifier { name: name.clone() });
            }
        }
        Ok(parsed)
    }

    /// Validates full rule source. Locally assigned names extend the
    /// vocabulary, so rules may keep intermediate signals.
    pub fn validate_rule(&self, source: &str) -> Result<Rule, SynthesisError> {
        let rule = expr::parse_rule(source)?;

        let mut assigned: BTreeSet<String> = BTreeSet::new();
        assigned.insert(expr::DECISION_FLAG.to_string());
        for statement in &rule.statements {
            match statement {
                Statement::Assign { name, expr } | Statement::Guard { name, expr, .. } => {
                    if let Statement::Guard { condition, .. } = statement {
                        check_calls(condition)?;
                    }
                    check_calls(expr)?;
                    assigned.insert(name.clone());
                }
                Statement::Return { .. } => {}
            }
        }

        for name in rule.identifiers() {
            if !self.allowed.contains(&name) && !assigned.contains(&name) {
                return Err(SynthesisError::UnknownIdentifier { name });
            }
        }
        Ok(rule)
    }
}

fn screen_denied(text: &str) -> Result<(), SynthesisError> {
    let lowered = text.to_lowercase();
    for token in DENY_TOKENS {
        if lowered.contains(token) {
            return Err(SynthesisError::DisallowedPattern {
                token: (*token).to_string(),
            });
        }
    }
    Ok(())
}

fn check_balance(text: &str) -> Result<(), SynthesisError> {
    let mut parens: i32 = 0;
    let mut brackets: i32 = 0;
    for c in text.chars() {
        match c {
            '(' => parens += 1,
            ')' => parens -= 1,
            '[' => brackets += 1,
            ']' => brackets -= 1,
            _ => {}
        }
        if parens < 0 || brackets < 0 {
            return Err(SynthesisError::UnbalancedParens {
                condition: text.to_string(),
            });
        }
    }
    if parens != 0 || brackets != 0 {
        return Err(SynthesisError::UnbalancedParens {
            condition: text.to_string(),
        });
    }
    Ok(())
}

fn check_calls(expr: &Expr) -> Result<(), SynthesisError> {
    match expr {
        Expr::Call { name, args } => {
            let arity = builtin_arity(name).ok_or_else(|| SynthesisError::UnknownFunction {
                name: name.clone(),
            })?;
            if args.len() != arity {
                return Err(SynthesisError::BadArity {
                    name: name.clone(),
                    expected: arity,
                    got: args.len(),
                });
            }
            for arg in args {
                check_calls(arg)?;
            }
            Ok(())
        }
        Expr::Unary { operand, .. } => check_calls(operand),
        Expr::Binary { lhs, rhs, .. } => {
            check_calls(lhs)?;
            check_calls(rhs)
        }
        Expr::Number(_) | Expr::Bool(_) | Expr::Ident(_) | Expr::Param(_) => Ok(()),
    }
}
