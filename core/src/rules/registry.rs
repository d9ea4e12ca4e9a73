use crate::error::Result;
use crate::rules::loader::{load_rules_from_dir, parse_rule_set, BUILTIN_RULES};
use crate::rules::model::{Language, Rule, RuleDef, RuleDomain};
use lazy_static::lazy_static;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

lazy_static! {
    /// 进程级内置规则注册表，初始化后只读
    static ref GLOBAL: Arc<RuleRegistry> = Arc::new(RuleRegistry::builtin().unwrap_or_else(|e| {
        tracing::error!(error = %e, "built-in rule table failed to load");
        RuleRegistry::default()
    }));
}

/// Ordered, immutable collection of compiled rules.
#[derive(Debug, Default)]
pub struct RuleRegistry {
    rules: Vec<Rule>,
}

impl RuleRegistry {
    /// The shared built-in registry.
    pub fn global() -> Arc<RuleRegistry> {
        Arc::clone(&GLOBAL)
    }

    pub fn builtin() -> Result<Self> {
        Self::from_yaml_str(BUILTIN_RULES)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(Self::from_defs(parse_rule_set(content)?))
    }

    /// Compile definitions in order. Invalid or duplicate rules are logged and
    /// skipped; the remaining rules still load.
    pub fn from_defs(defs: Vec<RuleDef>) -> Self {
        let mut registry = Self::default();
        registry.extend(defs);
        registry
    }

    /// Built-in rules followed by every rule file under `dir`.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let mut defs = parse_rule_set(BUILTIN_RULES)?;
        defs.extend(load_rules_from_dir(dir)?);
        Ok(Self::from_defs(defs))
    }

    fn extend(&mut self, defs: Vec<RuleDef>) {
        let mut seen: HashSet<String> = self.rules.iter().map(|r| r.id.clone()).collect();

        for def in defs {
            if !seen.insert(def.id.clone()) {
                tracing::warn!(rule = %def.id, "duplicate rule id, keeping the first definition");
                continue;
            }
            let id = def.id.clone();
            match Rule::compile(def) {
                Ok(rule) => self.rules.push(rule),
                Err(e) => tracing::warn!(rule = %id, error = %e, "skipping invalid rule"),
            }
        }

        tracing::debug!(rules = self.rules.len(), "rule registry loaded");
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    /// Rules for `domain` in registration order. For the code domain the rules
    /// are further limited to language-agnostic ones plus those scoped to
    /// `language`; other domains ignore the language.
    pub fn rules_for(&self, domain: RuleDomain, language: Option<Language>) -> Vec<&Rule> {
        self.rules
            .iter()
            .filter(|rule| rule.domain == domain)
            .filter(|rule| domain != RuleDomain::Code || rule.applies_to(language))
            .collect()
    }

    /// String-keyed variant of [`rules_for`](Self::rules_for).
    pub fn rules_for_name(&self, domain: &str, language: Option<&str>) -> Result<Vec<&Rule>> {
        let domain: RuleDomain = domain.parse()?;
        let language = language.map(str::parse::<Language>).transpose()?;
        Ok(self.rules_for(domain, language))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanError;

    #[test]
    fn test_global_registry_is_shared() {
        let a = RuleRegistry::global();
        let b = RuleRegistry::global();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!a.is_empty());
    }

    #[test]
    fn test_python_rules_exclude_other_languages() {
        let registry = RuleRegistry::builtin().unwrap();
        let python = registry.rules_for(RuleDomain::Code, Some(Language::Python));

        for rule in &python {
            assert!(rule.is_language_agnostic() || rule.languages.contains(&Language::Python));
        }

        let agnostic: Vec<&str> = registry
            .iter()
            .filter(|r| r.domain == RuleDomain::Code && r.is_language_agnostic())
            .map(|r| r.id.as_str())
            .collect();
        for id in agnostic {
            assert!(python.iter().any(|r| r.id == id), "missing agnostic rule {}", id);
        }
    }

    #[test]
    fn test_registration_order_is_stable() {
        let registry = RuleRegistry::builtin().unwrap();
        let first: Vec<&str> = registry
            .rules_for(RuleDomain::Log, None)
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        let second: Vec<&str> = registry
            .rules_for(RuleDomain::Log, None)
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_rules_for_name_errors() {
        let registry = RuleRegistry::builtin().unwrap();
        assert!(matches!(
            registry.rules_for_name("firmware", None),
            Err(ScanError::UnknownDomain(_))
        ));
        assert!(matches!(
            registry.rules_for_name("code", Some("fortran")),
            Err(ScanError::UnsupportedLanguage(_))
        ));
        assert!(!registry.rules_for_name("url", None).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_and_duplicate_rules_are_skipped() {
        let doc = r#"
- id: dup
  domain: code
  risk_level: low
  type: A
  description: first
  predicate: { kind: pattern, regex: 'aaa' }
- id: dup
  domain: code
  risk_level: high
  type: B
  description: second
  predicate: { kind: pattern, regex: 'bbb' }
- id: broken
  domain: code
  risk_level: low
  type: C
  description: broken
  predicate: { kind: pattern, regex: '(' }
"#;
        let registry = RuleRegistry::from_yaml_str(doc).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("dup").unwrap().description, "first");
    }
}
