use super::lines::LineIndex;
use super::{assign_ids, describe_lines, Finding, ScanRequest, ScanType, Scanner};
use crate::config::CodeConfig;
use crate::error::{Result, ScanError};
use crate::rules::model::{Language, Rule, RuleDomain};
use crate::rules::predicate::{RuleInput, RuleMatch};
use crate::rules::registry::RuleRegistry;
use async_trait::async_trait;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CodeScanOptions {
    /// Also run the costlier heuristic rules
    pub deep_scan: bool,
    /// Line data is always computed; this only controls whether it is reported
    pub include_line_numbers: bool,
    #[serde(rename = "includeCWE", alias = "includeCwe")]
    pub include_cwe: bool,
}

impl Default for CodeScanOptions {
    fn default() -> Self {
        Self {
            deep_scan: false,
            include_line_numbers: true,
            include_cwe: true,
        }
    }
}

/// 源代码分析器：按规则注册顺序匹配，每条规则最多产生一个发现
pub struct CodeAnalyzer {
    registry: Arc<RuleRegistry>,
    unknown_language_fallback: bool,
}

impl CodeAnalyzer {
    pub fn new(registry: Arc<RuleRegistry>) -> Self {
        Self {
            registry,
            unknown_language_fallback: false,
        }
    }

    pub fn with_config(registry: Arc<RuleRegistry>, config: &CodeConfig) -> Self {
        Self {
            registry,
            unknown_language_fallback: config.unknown_language_fallback,
        }
    }

    pub fn resolve_language(&self, tag: &str) -> Result<Language> {
        match tag.parse::<Language>() {
            Ok(language) => Ok(language),
            Err(ScanError::UnsupportedLanguage(tag)) if self.unknown_language_fallback => {
                tracing::warn!(language = %tag, "unknown language, using language-agnostic rules");
                Ok(Language::Generic)
            }
            Err(e) => Err(e),
        }
    }

    pub fn scan_code(
        &self,
        source: &str,
        language: &str,
        options: &CodeScanOptions,
    ) -> Result<Vec<Finding>> {
        let language = self.resolve_language(language)?;
        if source.is_empty() {
            return Ok(Vec::new());
        }

        let index = LineIndex::new(source);
        let rules: Vec<&Rule> = self
            .registry
            .rules_for(RuleDomain::Code, Some(language))
            .into_iter()
            .filter(|rule| options.deep_scan || !rule.deep)
            .collect();

        tracing::debug!(
            language = %language,
            rules = rules.len(),
            bytes = source.len(),
            "scanning code"
        );

        // par_iter + collect keeps registration order
        let mut findings: Vec<Finding> = rules
            .par_iter()
            .filter_map(|rule| evaluate_rule(rule, &index, options))
            .collect();

        assign_ids("CODE", &mut findings);
        tracing::info!(language = %language, findings = findings.len(), "code scan finished");
        Ok(findings)
    }
}

fn evaluate_rule(rule: &Rule, index: &LineIndex<'_>, options: &CodeScanOptions) -> Option<Finding> {
    let matches = match rule.predicate.evaluate(&RuleInput::Text(index)) {
        Ok(matches) => matches,
        Err(e) => {
            tracing::warn!(rule = %rule.id, error = %e, "rule evaluation failed, skipping");
            return None;
        }
    };

    let mut lines: Vec<usize> = matches
        .into_iter()
        .flat_map(|m| match m {
            RuleMatch::Lines(lines) => lines,
            _ => Vec::new(),
        })
        .collect();
    if lines.is_empty() {
        return None;
    }
    lines.sort_unstable();
    lines.dedup();

    let mut finding = Finding::from_rule(rule, None);
    if options.include_line_numbers {
        finding = finding.with_location(describe_lines(&lines)).with_lines(lines);
    }
    if !options.include_cwe {
        finding.cwe = None;
    }
    Some(finding)
}

#[async_trait]
impl Scanner for CodeAnalyzer {
    fn name(&self) -> String {
        "CodeAnalyzer".to_string()
    }

    fn scan_type(&self) -> ScanType {
        ScanType::Code
    }

    async fn scan(&self, request: &ScanRequest) -> Result<Vec<Finding>> {
        match request {
            ScanRequest::Code {
                code,
                language,
                options,
            } => self.scan_code(code, language, options),
            other => Err(ScanError::InvalidInput(format!(
                "{} cannot handle a {} request",
                self.name(),
                other.scan_type()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> CodeAnalyzer {
        CodeAnalyzer::new(RuleRegistry::global())
    }

    #[test]
    fn test_sql_concatenation() {
        let code = r#"const q = "SELECT * FROM users WHERE id = '" + userId + "'";"#;
        let findings = analyzer()
            .scan_code(code, "javascript", &CodeScanOptions::default())
            .unwrap();
        let sqli = findings
            .iter()
            .find(|f| f.vuln_type == "SQL Injection")
            .expect("sql injection finding");
        assert!(sqli.risk_level >= crate::rules::model::RiskLevel::High);
        assert_eq!(sqli.line_numbers, Some(vec![1]));
        assert_eq!(sqli.cwe.as_deref(), Some("CWE-89"));
    }

    #[test]
    fn test_parameterized_line_is_not_flagged() {
        let code = "// parameterized\nq = \"SELECT * FROM t WHERE a = '\" + a // parameterized";
        let findings = analyzer()
            .scan_code(code, "javascript", &CodeScanOptions::default())
            .unwrap();
        assert!(findings.iter().all(|f| f.rule_id != "code-sqli-concat"));
    }

    #[test]
    fn test_eval_is_code_injection() {
        let findings = analyzer()
            .scan_code("eval(userInput)", "javascript", &CodeScanOptions::default())
            .unwrap();
        assert!(findings.iter().any(|f| f.vuln_type == "Code Injection"));
    }

    #[test]
    fn test_repeated_idiom_is_coalesced() {
        let code = "eval(a)\nok()\neval(b); eval(c)\n";
        let findings = analyzer()
            .scan_code(code, "python", &CodeScanOptions::default())
            .unwrap();
        let eval: Vec<&Finding> = findings.iter().filter(|f| f.rule_id == "code-eval").collect();
        assert_eq!(eval.len(), 1);
        assert_eq!(eval[0].line_numbers, Some(vec![1, 3]));
        assert_eq!(eval[0].location.as_deref(), Some("Lines 1, 3"));
    }

    #[test]
    fn test_exec_at_line_start_keeps_its_line() {
        let options = CodeScanOptions::default();
        let exec = |code: &str| {
            analyzer()
                .scan_code(code, "python", &options)
                .unwrap()
                .into_iter()
                .find(|f| f.rule_id == "code-python-exec")
        };

        let single = exec("x = 1\nexec(payload)\n").unwrap();
        assert_eq!(single.line_numbers, Some(vec![2]));
        assert_eq!(single.location.as_deref(), Some("Line 2"));

        let mixed = exec("a = 1\n exec(x)\nb = 2\nexec(y)").unwrap();
        assert_eq!(mixed.line_numbers, Some(vec![2, 4]));

        assert!(exec("self.exec(cmd)\nexecutor(x)").is_none());
    }

    #[test]
    fn test_empty_source_yields_nothing() {
        let findings = analyzer()
            .scan_code("", "python", &CodeScanOptions::default())
            .unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn test_unknown_language() {
        assert!(matches!(
            analyzer().scan_code("x", "cobol", &CodeScanOptions::default()),
            Err(ScanError::UnsupportedLanguage(_))
        ));

        let lenient = CodeAnalyzer::with_config(
            RuleRegistry::global(),
            &CodeConfig {
                unknown_language_fallback: true,
            },
        );
        let findings = lenient
            .scan_code("eval(x)", "cobol", &CodeScanOptions::default())
            .unwrap();
        assert!(findings.iter().any(|f| f.rule_id == "code-eval"));
    }

    #[test]
    fn test_options_strip_lines_and_cwe() {
        let options = CodeScanOptions {
            include_line_numbers: false,
            include_cwe: false,
            ..CodeScanOptions::default()
        };
        let findings = analyzer().scan_code("eval(x)", "go", &options).unwrap();
        assert!(!findings.is_empty());
        for finding in &findings {
            assert!(finding.line_numbers.is_none());
            assert!(finding.location.is_none());
            assert!(finding.cwe.is_none());
        }
    }

    #[test]
    fn test_deep_rules_need_deep_scan() {
        let code = "token = Math.random()";
        let shallow = analyzer()
            .scan_code(code, "javascript", &CodeScanOptions::default())
            .unwrap();
        assert!(shallow.iter().all(|f| f.rule_id != "code-insecure-random"));

        let deep = CodeScanOptions {
            deep_scan: true,
            ..CodeScanOptions::default()
        };
        let findings = analyzer().scan_code(code, "javascript", &deep).unwrap();
        assert!(findings.iter().any(|f| f.rule_id == "code-insecure-random"));
    }

    #[test]
    fn test_minified_input_resolves_to_line_one() {
        let mut code = "var a=1;".repeat(20_000);
        code.push_str("eval(payload);");
        let findings = analyzer()
            .scan_code(&code, "javascript", &CodeScanOptions::default())
            .unwrap();
        let eval = findings.iter().find(|f| f.rule_id == "code-eval").unwrap();
        assert_eq!(eval.line_numbers, Some(vec![1]));
    }

    #[test]
    fn test_ids_are_sequential() {
        let code = "eval(x)\npassword = \"hunter22\"\n";
        let findings = analyzer()
            .scan_code(code, "python", &CodeScanOptions::default())
            .unwrap();
        assert!(findings.len() >= 2);
        for (i, finding) in findings.iter().enumerate() {
            assert_eq!(finding.id, format!("CODE-{:03}", i + 1));
        }
    }
}
