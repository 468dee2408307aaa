//! Merges accepted filter candidates into rule source as guard clauses.
//!
//! The merge is side-effect-free and all-or-nothing: on any validation or
//! syntax failure the original source comes back untouched with an error
//! message, never a partially merged rule.

use std::collections::BTreeSet;
use tracing::warn;

use crate::domain::features::FeatureCatalog;
use crate::domain::filters::FilterCandidate;
use crate::domain::iteration::BuildResult;

use super::expr::DECISION_FLAG;
use super::validator::ConditionValidator;

/// Sentinel lines wrapping every generated block. A re-merge strips the
/// previous block first, so applying the same set twice equals applying once.
pub const GUARD_BLOCK_BEGIN: &str = "# >>> generated entry guards";
pub const GUARD_BLOCK_END: &str = "# <<< generated entry guards";

pub struct ConditionSynthesizer {
    catalog: FeatureCatalog,
    validator: ConditionValidator,
}

impl ConditionSynthesizer {
    pub fn new(catalog: FeatureCatalog) -> Self {
        let validator = ConditionValidator::new(&catalog);
        Self { catalog, validator }
    }

    /// Removes any previously inserted guard block, sentinels included.
    pub fn strip_guards(source: &str) -> String {
        let mut kept = Vec::new();
        let mut inside = false;
        for line in source.lines() {
            match line.trim() {
                GUARD_BLOCK_BEGIN => inside = true,
                GUARD_BLOCK_END => inside = false,
                _ => {
                    if !inside {
                        kept.push(line);
                    }
                }
            }
        }
        let mut out = kept.join("\n");
        if source.ends_with('\n') && !out.is_empty() {
            out.push('\n');
        }
        out
    }

    /// Splits candidates into mergeable ones and rejects with reasons, so a
    /// run can continue with the survivors after a bad candidate.
    pub fn screen(&self, candidates: &[FilterCandidate]) -> (Vec<FilterCandidate>, Vec<(String, String)>) {
        let mut valid = Vec::new();
        let mut rejected = Vec::new();
        for candidate in candidates {
            match self.validator.validate_condition(&candidate.condition) {
                Ok(_) => valid.push(candidate.clone()),
                Err(e) => {
                    warn!(candidate = %candidate.name, error = %e, "dropping unmergeable candidate");
                    rejected.push((candidate.name.clone(), e.to_string()));
                }
            }
        }
        (valid, rejected)
    }

    /// Merges up to `max_filters` candidates into the rule as reject
    /// branches inserted before the final decision statement.
    pub fn build(
        &self,
        rule_source: &str,
        candidates: &[FilterCandidate],
        max_filters: usize,
    ) -> BuildResult {
        let base = Self::strip_guards(rule_source);

        let base_rule = match self.validator.validate_rule(&base) {
            Ok(rule) => rule,
            Err(e) => return BuildResult::rejected(rule_source, format!("base rule invalid: {}", e)),
        };
        let flag = base_rule.decision_flag().unwrap_or(DECISION_FLAG).to_string();

        let mut applied = Vec::new();
        let mut guard_lines = Vec::new();
        let mut referenced: BTreeSet<String> = BTreeSet::new();

        for candidate in candidates.iter().take(max_filters) {
            let desired = match self.validator.validate_condition(&candidate.condition) {
                Ok(expr) => expr,
                Err(e) => {
                    return BuildResult::rejected(
                        rule_source,
                        format!("candidate '{}' rejected: {}", candidate.name, e),
                    );
                }
            };
            desired.identifiers(&mut referenced);

            // Violating the desired condition flips the decision flag off.
            let blocking = desired.negated();
            if !candidate.description.is_empty() {
                guard_lines.push(format!("# {}: {}", candidate.name, candidate.description));
            }
            guard_lines.push(format!("if {}: {} = false", blocking, flag));
            applied.push(candidate.clone());
        }

        if applied.is_empty() {
            return BuildResult {
                success: true,
                rule: base,
                applied,
                error: None,
                referenced_vars: Vec::new(),
                preamble: Vec::new(),
            };
        }

        // Derived features referenced by the guards get their catalog
        // preamble; missing runtime inputs then degrade to neutral defaults
        // inside the evaluator instead of failing.
        let mut preamble = Vec::new();
        for name in &referenced {
            if let Some(line) = self.catalog.preamble_for(name) {
                preamble.push(line.to_string());
            }
        }

        let merged = insert_block(&base, &preamble, &guard_lines);

        if let Err(e) = self.validator.validate_rule(&merged) {
            return BuildResult::rejected(rule_source, format!("merged rule failed to parse: {}", e));
        }

        BuildResult {
            success: true,
            rule: merged,
            applied,
            error: None,
            referenced_vars: referenced.into_iter().collect(),
            preamble,
        }
    }
}

/// Inserts the guard block immediately before the final decision statement,
/// preserving its indentation; appends at the end when no decision statement
/// exists.
fn insert_block(base: &str, preamble: &[String], guards: &[String]) -> String {
    let lines: Vec<&str> = base.lines().collect();
    let return_pos = lines
        .iter()
        .rposition(|l| l.trim_start().starts_with("return"));

    let indent = return_pos
        .map(|pos| {
            let line = lines[pos];
            line[..line.len() - line.trim_start().len()].to_string()
        })
        .unwrap_or_default();

    let mut block = Vec::new();
    block.push(format!("{}{}", indent, GUARD_BLOCK_BEGIN));
    for line in preamble {
        block.push(format!("{}{}", indent, line));
    }
    for line in guards {
        block.push(format!("{}{}", indent, line));
    }
    block.push(format!("{}{}", indent, GUARD_BLOCK_END));

    let mut out: Vec<String> = Vec::with_capacity(lines.len() + block.len());
    match return_pos {
        Some(pos) => {
            for line in &lines[..pos] {
                out.push((*line).to_string());
            }
            out.append(&mut block);
            for line in &lines[pos..] {
                out.push((*line).to_string());
            }
        }
        None => {
            for line in &lines {
                out.push((*line).to_string());
            }
            // Without a decision statement the implicit flag carries the
            // verdict, so no return is added.
            out.append(&mut block);
        }
    }

    let mut text = out.join("\n");
    text.push('\n');
    text
}
