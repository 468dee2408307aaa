use thiserror::Error;

/// Errors raised while validating or merging rule source text
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("disallowed pattern '{token}' in condition")]
    DisallowedPattern { token: String },

    #[error("unbalanced parentheses in condition: {condition}")]
    UnbalancedParens { condition: String },

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("unknown identifier '{name}' outside the allowed feature vocabulary")]
    UnknownIdentifier { name: String },

    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },

    #[error("function '{name}' expects {expected} arguments, got {got}")]
    BadArity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("condition is empty")]
    EmptyCondition,
}

/// Errors raised while configuring or running an optimizer
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid search space: {reason}")]
    InvalidSpace { reason: String },

    #[error("filter count range {min}..={max} does not fit candidate pool of {pool}")]
    FilterRange { min: usize, max: usize, pool: usize },

    #[error("optimizer backend failure: {reason}")]
    Backend { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesis_error_formatting() {
        let err = SynthesisError::DisallowedPattern {
            token: "import".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("disallowed pattern"));
        assert!(msg.contains("import"));
    }

    #[test]
    fn test_bad_arity_formatting() {
        let err = SynthesisError::BadArity {
            name: "min".to_string(),
            expected: 2,
            got: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("min"));
        assert!(msg.contains('2'));
        assert!(msg.contains('3'));
    }

    #[test]
    fn test_search_error_formatting() {
        let err = SearchError::FilterRange {
            min: 2,
            max: 4,
            pool: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("2..=4"));
        assert!(msg.contains('1'));
    }
}
