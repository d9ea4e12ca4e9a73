use super::lines::LineIndex;
use super::probe::{HttpProbe, ProbeFailure, ProbeResponse};
use super::{assign_ids, Finding, ScanRequest, ScanType, Scanner};
use crate::config::HttpConfig;
use crate::error::{Result, ScanError};
use crate::rules::model::{Predicate, RiskLevel, Rule, RuleDomain, RuleGroup};
use crate::rules::predicate::{RuleInput, RuleMatch};
use crate::rules::registry::RuleRegistry;
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanDepth {
    #[default]
    Shallow,
    Deep,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UrlScanOptions {
    pub check_headers: bool,
    pub check_cookies: bool,
    pub check_csp: bool,
    pub scan_depth: ScanDepth,
}

impl Default for UrlScanOptions {
    fn default() -> Self {
        Self {
            check_headers: true,
            check_cookies: true,
            check_csp: true,
            scan_depth: ScanDepth::Shallow,
        }
    }
}

impl UrlScanOptions {
    fn allows(&self, rule: &Rule) -> bool {
        if rule.deep && self.scan_depth != ScanDepth::Deep {
            return false;
        }
        match rule.group {
            RuleGroup::Headers => self.check_headers,
            RuleGroup::Cookies => self.check_cookies,
            RuleGroup::Csp => self.check_csp,
            _ => true,
        }
    }
}

/// Parse and validate a scan target before any network activity.
pub fn parse_target(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ScanError::InvalidUrl("URL is empty".to_string()));
    }
    let url = Url::parse(raw).map_err(|e| ScanError::InvalidUrl(format!("{}: {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ScanError::InvalidUrl(format!(
            "unsupported scheme '{}', expected http or https",
            url.scheme()
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ScanError::InvalidUrl(format!("{}: missing host", raw)));
    }
    Ok(url)
}

/// 网站分析器：单次有界请求 + 响应检查清单，深度模式下并发探测外链脚本
pub struct UrlAnalyzer {
    registry: Arc<RuleRegistry>,
    probe: HttpProbe,
    max_secondary_probes: usize,
    deep_budget: Duration,
}

impl UrlAnalyzer {
    pub fn new(
        registry: Arc<RuleRegistry>,
        config: &HttpConfig,
        max_body_bytes: usize,
    ) -> Result<Self> {
        Ok(Self {
            registry,
            probe: HttpProbe::new(config, max_body_bytes)?,
            max_secondary_probes: config.max_secondary_probes,
            deep_budget: config.deep_budget(),
        })
    }

    pub async fn scan_url(&self, url: &str, options: &UrlScanOptions) -> Result<Vec<Finding>> {
        let target = parse_target(url)?;
        let rules: Vec<&Rule> = self
            .registry
            .rules_for(RuleDomain::Url, None)
            .into_iter()
            .filter(|rule| options.allows(rule))
            .collect();

        tracing::info!(
            url = %target,
            depth = ?options.scan_depth,
            rules = rules.len(),
            "scanning url"
        );

        let mut findings = match self.probe.fetch(&target).await {
            Ok(response) => {
                let mut findings = evaluate_response(&rules, &response);
                if options.scan_depth == ScanDepth::Deep {
                    findings.extend(self.probe_linked_scripts(&rules, &response).await);
                }
                findings
            }
            Err(failure) => {
                tracing::warn!(url = %target, error = %failure, "target unreachable");
                evaluate_failure(&self.registry, &target, &failure)
            }
        };

        assign_ids("URL", &mut findings);
        tracing::info!(url = %target, findings = findings.len(), "url scan finished");
        Ok(findings)
    }

    /// Fetch linked scripts concurrently and run the text-pattern rules over
    /// them. Every probe finishes, fails or is aborted before this returns.
    async fn probe_linked_scripts(&self, rules: &[&Rule], page: &ProbeResponse) -> Vec<Finding> {
        let pattern_rules: Vec<&Rule> = rules
            .iter()
            .copied()
            .filter(|rule| matches!(rule.predicate, Predicate::Pattern(_)))
            .collect();
        if pattern_rules.is_empty() {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let scripts: Vec<Url> = page
            .linked_scripts()
            .into_iter()
            .map(|script| script.url)
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .filter(|url| seen.insert(url.clone()))
            .take(self.max_secondary_probes)
            .collect();
        if scripts.is_empty() {
            return Vec::new();
        }

        let mut set = JoinSet::new();
        for (index, url) in scripts.into_iter().enumerate() {
            let probe = self.probe.clone();
            set.spawn(async move {
                let result = probe.fetch(&url).await;
                (index, url, result)
            });
        }

        let mut bodies: Vec<(usize, Url, String)> = Vec::new();
        let joined = tokio::time::timeout(self.deep_budget, async {
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((index, url, Ok(response))) => bodies.push((index, url, response.body)),
                    Ok((_, url, Err(failure))) => {
                        tracing::warn!(url = %url, error = %failure, "secondary probe failed, skipping")
                    }
                    Err(e) => tracing::warn!(error = %e, "secondary probe task failed"),
                }
            }
        })
        .await;
        if joined.is_err() {
            tracing::warn!(
                budget_secs = self.deep_budget.as_secs(),
                "deep scan budget exhausted, aborting remaining probes"
            );
            set.abort_all();
        }

        // completion order is not deterministic
        bodies.sort_by_key(|(index, _, _)| *index);

        let mut findings = Vec::new();
        for rule in pattern_rules {
            for (_, url, body) in &bodies {
                let index = LineIndex::new(body);
                match rule.predicate.evaluate(&RuleInput::Text(&index)) {
                    Ok(matches) => {
                        for m in matches {
                            if let RuleMatch::Lines(lines) = m {
                                let detail = format!("found in {}", url);
                                findings.push(
                                    Finding::from_rule(rule, Some(&detail))
                                        .with_location(url.to_string())
                                        .with_lines(lines),
                                );
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(rule = %rule.id, error = %e, "rule evaluation failed, skipping")
                    }
                }
            }
        }
        findings
    }
}

/// Run the response checklist. Text-pattern rules are reserved for linked
/// resources and are not applied to the page itself.
pub fn evaluate_response(rules: &[&Rule], response: &ProbeResponse) -> Vec<Finding> {
    let input = RuleInput::Response(response);
    let mut findings = Vec::new();

    for rule in rules {
        if matches!(rule.predicate, Predicate::Pattern(_)) {
            continue;
        }
        match rule.predicate.evaluate(&input) {
            Ok(matches) => {
                for m in matches {
                    if let RuleMatch::Violation(detail) = m {
                        findings.push(
                            Finding::from_rule(rule, Some(&detail))
                                .with_location(response.final_url.to_string()),
                        );
                    }
                }
            }
            Err(e) => tracing::warn!(rule = %rule.id, error = %e, "rule evaluation failed, skipping"),
        }
    }
    findings
}

/// Exactly one finding for a failed probe: the first matching failure rule,
/// or a generic connectivity finding when the registry has none.
fn evaluate_failure(
    registry: &RuleRegistry,
    target: &Url,
    failure: &ProbeFailure,
) -> Vec<Finding> {
    let input = RuleInput::Failure(failure);
    let matched = registry
        .rules_for(RuleDomain::Url, None)
        .into_iter()
        .filter(|rule| matches!(rule.predicate, Predicate::Probe(_)))
        .find_map(|rule| match rule.predicate.evaluate(&input) {
            Ok(matches) => matches.into_iter().find_map(|m| match m {
                RuleMatch::Violation(detail) => Some(
                    Finding::from_rule(rule, Some(&detail)).with_location(target.to_string()),
                ),
                _ => None,
            }),
            Err(_) => None,
        });

    let finding = matched.unwrap_or_else(|| Finding {
        id: String::new(),
        rule_id: "url-connectivity-error".to_string(),
        vuln_type: "Connectivity/TLS Error".to_string(),
        risk_level: RiskLevel::High,
        description: failure.to_string(),
        location: Some(target.to_string()),
        line_numbers: None,
        fix: None,
        references: Vec::new(),
        cwe: None,
    });
    vec![finding]
}

#[async_trait]
impl Scanner for UrlAnalyzer {
    fn name(&self) -> String {
        "UrlAnalyzer".to_string()
    }

    fn scan_type(&self) -> ScanType {
        ScanType::Url
    }

    async fn scan(&self, request: &ScanRequest) -> Result<Vec<Finding>> {
        match request {
            ScanRequest::Url { url, options } => self.scan_url(url, options).await,
            other => Err(ScanError::InvalidInput(format!(
                "{} cannot handle a {} request",
                self.name(),
                other.scan_type()
            ))),
        }
    }
}
