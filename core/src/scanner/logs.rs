use super::{assign_ids, describe_lines, Finding, ScanRequest, ScanType, Scanner};
use crate::config::LogsConfig;
use crate::error::{Result, ScanError};
use crate::rules::model::{Rule, RuleDomain, RuleGroup};
use crate::rules::predicate::{RuleInput, RuleMatch};
use crate::rules::registry::RuleRegistry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const MAX_CONTEXT_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogScanOptions {
    pub detect_credentials: bool,
    pub detect_ips: bool,
    pub detect_pii: bool,
    pub detect_secrets: bool,
    /// Quote the matching lines in the location instead of only numbering them
    pub include_context: bool,
    pub brute_force_threshold: Option<usize>,
}

impl Default for LogScanOptions {
    fn default() -> Self {
        Self {
            detect_credentials: true,
            detect_ips: true,
            detect_pii: true,
            detect_secrets: true,
            include_context: false,
            brute_force_threshold: None,
        }
    }
}

impl LogScanOptions {
    fn allows(&self, group: RuleGroup) -> bool {
        match group {
            RuleGroup::Credentials => self.detect_credentials,
            RuleGroup::Ips => self.detect_ips,
            RuleGroup::Pii => self.detect_pii,
            RuleGroup::Secrets => self.detect_secrets,
            _ => true,
        }
    }
}

/// 日志分析器：逐行签名匹配 + 单次扫描内的关联统计
pub struct LogAnalyzer {
    registry: Arc<RuleRegistry>,
    brute_force_threshold: Option<usize>,
    max_context_lines: usize,
}

impl LogAnalyzer {
    pub fn new(registry: Arc<RuleRegistry>) -> Self {
        Self::with_config(registry, &LogsConfig::default())
    }

    pub fn with_config(registry: Arc<RuleRegistry>, config: &LogsConfig) -> Self {
        Self {
            registry,
            brute_force_threshold: config.brute_force_threshold,
            max_context_lines: config.max_context_lines,
        }
    }

    pub fn scan_logs(&self, text: &str, options: &LogScanOptions) -> Vec<Finding> {
        if text.is_empty() {
            return Vec::new();
        }

        let lines: Vec<&str> = text.lines().collect();
        let threshold_override = options.brute_force_threshold.or(self.brute_force_threshold);
        let mut findings = Vec::new();

        for rule in self.registry.rules_for(RuleDomain::Log, None) {
            if !options.allows(rule.group) {
                continue;
            }
            let threshold = if rule.group == RuleGroup::BruteForce {
                threshold_override
            } else {
                None
            };

            let input = RuleInput::Lines {
                lines: &lines,
                threshold,
            };
            let matches = match rule.predicate.evaluate(&input) {
                Ok(matches) => matches,
                Err(e) => {
                    tracing::warn!(rule = %rule.id, error = %e, "rule evaluation failed, skipping");
                    continue;
                }
            };

            for m in matches {
                match m {
                    RuleMatch::Lines(hits) => {
                        findings.push(self.finding(rule, None, hits, &lines, options));
                    }
                    RuleMatch::Correlated(hit) => {
                        let detail = format!("{} occurrences from {}", hit.lines.len(), hit.key);
                        findings.push(self.finding(
                            rule,
                            Some(&detail),
                            hit.lines,
                            &lines,
                            options,
                        ));
                    }
                    RuleMatch::Violation(_) => {}
                }
            }
        }

        assign_ids("LOG", &mut findings);
        tracing::info!(lines = lines.len(), findings = findings.len(), "log scan finished");
        findings
    }

    fn finding(
        &self,
        rule: &Rule,
        detail: Option<&str>,
        hits: Vec<usize>,
        lines: &[&str],
        options: &LogScanOptions,
    ) -> Finding {
        let location = if options.include_context {
            self.context(&hits, lines)
        } else {
            describe_lines(&hits)
        };
        Finding::from_rule(rule, detail)
            .with_location(location)
            .with_lines(hits)
    }

    /// `Line N: <text>` for the first lines, then how many were left out.
    fn context(&self, hits: &[usize], lines: &[&str]) -> String {
        let mut quoted: Vec<String> = hits
            .iter()
            .take(self.max_context_lines)
            .map(|&n| {
                let text = lines.get(n - 1).copied().unwrap_or_default().trim();
                let mut clipped: String = text.chars().take(MAX_CONTEXT_CHARS).collect();
                if text.chars().count() > MAX_CONTEXT_CHARS {
                    clipped.push_str("...");
                }
                format!("Line {}: {}", n, clipped)
            })
            .collect();
        if hits.len() > self.max_context_lines {
            quoted.push(format!("... and {} more", hits.len() - self.max_context_lines));
        }
        quoted.join("\n")
    }
}

#[async_trait]
impl Scanner for LogAnalyzer {
    fn name(&self) -> String {
        "LogAnalyzer".to_string()
    }

    fn scan_type(&self) -> ScanType {
        ScanType::Logs
    }

    async fn scan(&self, request: &ScanRequest) -> Result<Vec<Finding>> {
        match request {
            ScanRequest::Logs { logs, options } => Ok(self.scan_logs(logs, options)),
            other => Err(ScanError::InvalidInput(format!(
                "{} cannot handle a {} request",
                self.name(),
                other.scan_type()
            ))),
        }
    }
}
