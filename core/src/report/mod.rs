pub mod render;

use crate::rules::model::RiskLevel;
use crate::scanner::{Finding, ScanType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use uuid::Uuid;

/// Finding counts per risk level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub total: usize,
}

impl Summary {
    pub fn tally(findings: &[Finding]) -> Self {
        let mut summary = Self::default();
        for finding in findings {
            match finding.risk_level {
                RiskLevel::Critical => summary.critical += 1,
                RiskLevel::High => summary.high += 1,
                RiskLevel::Medium => summary.medium += 1,
                RiskLevel::Low => summary.low += 1,
            }
            summary.total += 1;
        }
        summary
    }

    pub fn count(&self, level: RiskLevel) -> usize {
        match level {
            RiskLevel::Critical => self.critical,
            RiskLevel::High => self.high,
            RiskLevel::Medium => self.medium,
            RiskLevel::Low => self.low,
        }
    }
}

/// Output of one scan. Built once by [`aggregate`] and read-only afterwards.
/// Deserializing re-tallies the summary from the findings; a stored summary
/// is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ScanResultRecord")]
pub struct ScanResult {
    scan_id: Uuid,
    vulnerabilities: Vec<Finding>,
    scan_type: ScanType,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    summary: Summary,
}

/// Wire shape of a [`ScanResult`] without its derived summary.
#[derive(Deserialize)]
struct ScanResultRecord {
    scan_id: Uuid,
    vulnerabilities: Vec<Finding>,
    scan_type: ScanType,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    target: Option<String>,
}

impl From<ScanResultRecord> for ScanResult {
    fn from(record: ScanResultRecord) -> Self {
        Self {
            summary: Summary::tally(&record.vulnerabilities),
            scan_id: record.scan_id,
            vulnerabilities: record.vulnerabilities,
            scan_type: record.scan_type,
            timestamp: record.timestamp,
            target: record.target,
        }
    }
}

impl ScanResult {
    pub fn scan_id(&self) -> Uuid {
        self.scan_id
    }

    /// Findings in the order the analyzer produced them.
    pub fn vulnerabilities(&self) -> &[Finding] {
        &self.vulnerabilities
    }

    pub fn scan_type(&self) -> ScanType {
        self.scan_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    pub fn is_empty(&self) -> bool {
        self.vulnerabilities.is_empty()
    }

    /// Presentation order: Critical first, stable within a level.
    pub fn sorted_by_severity(&self) -> Vec<&Finding> {
        let mut findings: Vec<&Finding> = self.vulnerabilities.iter().collect();
        findings.sort_by_key(|f| Reverse(f.risk_level));
        findings
    }
}

pub fn aggregate(findings: Vec<Finding>, scan_type: ScanType) -> ScanResult {
    aggregate_with_target(findings, scan_type, None)
}

/// Stamp, tally and wrap findings without reordering them.
pub fn aggregate_with_target(
    findings: Vec<Finding>,
    scan_type: ScanType,
    target: Option<String>,
) -> ScanResult {
    let summary = Summary::tally(&findings);
    tracing::debug!(
        scan_type = %scan_type,
        total = summary.total,
        critical = summary.critical,
        high = summary.high,
        "scan aggregated"
    );

    ScanResult {
        scan_id: Uuid::new_v4(),
        vulnerabilities: findings,
        scan_type,
        timestamp: Utc::now(),
        target,
        summary,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn finding(id: &str, level: RiskLevel) -> Finding {
        Finding {
            id: id.to_string(),
            rule_id: format!("rule-{}", id),
            vuln_type: format!("Type {}", id),
            risk_level: level,
            description: format!("description {}", id),
            location: None,
            line_numbers: None,
            fix: None,
            references: Vec::new(),
            cwe: None,
        }
    }

    #[test]
    fn test_summary_invariants() {
        let result = aggregate(
            vec![
                finding("1", RiskLevel::Low),
                finding("2", RiskLevel::Critical),
                finding("3", RiskLevel::Low),
                finding("4", RiskLevel::Medium),
            ],
            ScanType::Code,
        );
        let s = result.summary();
        assert_eq!(s.total, result.vulnerabilities().len());
        assert_eq!(s.critical + s.high + s.medium + s.low, s.total);
        assert_eq!(s.count(RiskLevel::Low), 2);
    }

    #[test]
    fn test_aggregate_keeps_order() {
        let result = aggregate(
            vec![finding("a", RiskLevel::Low), finding("b", RiskLevel::Critical)],
            ScanType::Logs,
        );
        let ids: Vec<&str> = result.vulnerabilities().iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_sorted_by_severity_is_stable() {
        let result = aggregate(
            vec![
                finding("a", RiskLevel::Medium),
                finding("b", RiskLevel::Critical),
                finding("c", RiskLevel::Medium),
                finding("d", RiskLevel::High),
            ],
            ScanType::Url,
        );
        let ids: Vec<&str> = result
            .sorted_by_severity()
            .iter()
            .map(|f| f.id.as_str())
            .collect();
        assert_eq!(ids, vec!["b", "d", "a", "c"]);
        assert_eq!(result.vulnerabilities()[0].id, "a");
    }

    #[test]
    fn test_deserialize_recomputes_summary() {
        let result = aggregate(
            vec![finding("a", RiskLevel::High), finding("b", RiskLevel::Low)],
            ScanType::Code,
        );
        let mut value = serde_json::to_value(&result).unwrap();
        value["summary"] = serde_json::json!({
            "critical": 7, "high": 0, "medium": 0, "low": 0, "total": 7
        });

        let restored: ScanResult = serde_json::from_value(value).unwrap();
        assert_eq!(restored.summary().total, 2);
        assert_eq!(restored.summary().high, 1);
        assert_eq!(restored.summary().critical, 0);
        assert_eq!(restored, result);
    }

    #[test]
    fn test_json_field_names() {
        let mut f = finding("x", RiskLevel::High);
        f.cwe = Some("CWE-79".into());
        let result = aggregate(vec![f], ScanType::Url);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["scan_type"], "url");
        assert_eq!(value["vulnerabilities"][0]["type"], "Type x");
        assert_eq!(value["vulnerabilities"][0]["risk_level"], "High");
        assert_eq!(value["summary"]["high"], 1);
        assert!(value["vulnerabilities"][0].get("fix").is_none());
    }
}
