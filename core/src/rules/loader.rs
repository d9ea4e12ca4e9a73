use crate::error::{Result, ScanError};
use crate::rules::model::{RuleDef, RuleSet};
use anyhow::Context;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Built-in rule table, embedded at compile time.
pub const BUILTIN_RULES: &str = include_str!("../../rules/default.yaml");

/// Parse one rule document: a full `RuleSet`, a bare list of rules, or a single rule.
pub fn parse_rule_set(content: &str) -> Result<Vec<RuleDef>> {
    if let Ok(rule_set) = serde_yaml::from_str::<RuleSet>(content) {
        tracing::debug!(name = %rule_set.name, version = %rule_set.version, "parsed rule set");
        return Ok(rule_set.rules);
    }
    if let Ok(rules) = serde_yaml::from_str::<Vec<RuleDef>>(content) {
        return Ok(rules);
    }
    serde_yaml::from_str::<RuleDef>(content)
        .map(|rule| vec![rule])
        .map_err(|e| ScanError::RuleLoad(format!("unrecognised rule document: {}", e)))
}

/// Load every `*.yaml` / `*.yml` rule file under `path`, in file-name order.
pub fn load_rules_from_dir<P: AsRef<Path>>(path: P) -> Result<Vec<RuleDef>> {
    let mut rules = Vec::new();

    for entry in WalkDir::new(path.as_ref()).sort_by_file_name() {
        let entry = entry.map_err(|e| ScanError::RuleLoad(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let is_yaml = path
            .extension()
            .map(|ext| ext == "yaml" || ext == "yml")
            .unwrap_or(false);
        if !is_yaml {
            continue;
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read rule file: {:?}", path))
            .map_err(|e| ScanError::RuleLoad(format!("{:#}", e)))?;

        match parse_rule_set(&content) {
            Ok(mut parsed) => rules.append(&mut parsed),
            Err(e) => tracing::warn!(file = ?path, error = %e, "skipping unparsable rule file"),
        }
    }

    Ok(rules)
}
