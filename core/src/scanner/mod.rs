// Scanner module - 扫描器模块
// 定义扫描器的核心接口和类型

pub mod code;
pub mod lines;
pub mod logs;
pub mod manager;
pub mod probe;
pub mod url;

use crate::error::Result;
use crate::rules::model::{RiskLevel, Rule};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use self::code::CodeScanOptions;
use self::logs::LogScanOptions;
use self::url::UrlScanOptions;

/// 漏洞发现结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Unique within one scan only, e.g. `CODE-001`.
    pub id: String,
    pub rule_id: String,
    #[serde(rename = "type")]
    pub vuln_type: String,
    pub risk_level: RiskLevel,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_numbers: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwe: Option<String>,
}

impl Finding {
    /// Finding carrying the rule's metadata. `detail` is appended to the rule
    /// description when the predicate reported how it fired.
    pub(crate) fn from_rule(rule: &Rule, detail: Option<&str>) -> Self {
        let description = match detail {
            Some(detail) => format!("{}: {}", rule.description.trim_end_matches('.'), detail),
            None => rule.description.clone(),
        };

        Self {
            id: String::new(),
            rule_id: rule.id.clone(),
            vuln_type: rule.vuln_type.clone(),
            risk_level: rule.risk_level,
            description,
            location: None,
            line_numbers: None,
            fix: rule.fix.as_ref().map(|fix| fix.trim_end().to_string()),
            references: rule.references.clone(),
            cwe: rule.cwe.clone(),
        }
    }

    pub(crate) fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub(crate) fn with_lines(mut self, lines: Vec<usize>) -> Self {
        self.line_numbers = Some(lines);
        self
    }
}

/// Number findings sequentially in emission order.
pub(crate) fn assign_ids(prefix: &str, findings: &mut [Finding]) {
    for (i, finding) in findings.iter_mut().enumerate() {
        finding.id = format!("{}-{:03}", prefix, i + 1);
    }
}

/// `Line 3` / `Lines 3, 7, 9`
pub(crate) fn describe_lines(lines: &[usize]) -> String {
    let joined = lines
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    if lines.len() == 1 {
        format!("Line {}", joined)
    } else {
        format!("Lines {}", joined)
    }
}

/// 扫描类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Code,
    Url,
    Logs,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::Code => "code",
            ScanType::Url => "url",
            ScanType::Logs => "logs",
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scan request: a payload plus the options of the analyzer it targets.
/// Unknown option keys are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ScanRequest {
    Code {
        code: String,
        #[serde(default)]
        language: String,
        #[serde(default)]
        options: CodeScanOptions,
    },
    Url {
        url: String,
        #[serde(default)]
        options: UrlScanOptions,
    },
    Logs {
        logs: String,
        #[serde(default)]
        options: LogScanOptions,
    },
}

impl ScanRequest {
    pub fn scan_type(&self) -> ScanType {
        match self {
            ScanRequest::Code { .. } => ScanType::Code,
            ScanRequest::Url { .. } => ScanType::Url,
            ScanRequest::Logs { .. } => ScanType::Logs,
        }
    }

    pub fn payload_len(&self) -> usize {
        match self {
            ScanRequest::Code { code, .. } => code.len(),
            ScanRequest::Url { url, .. } => url.len(),
            ScanRequest::Logs { logs, .. } => logs.len(),
        }
    }

    /// What the scan was run against, for the report header.
    pub fn target(&self) -> Option<String> {
        match self {
            ScanRequest::Code { language, .. } if !language.trim().is_empty() => {
                Some(language.trim().to_string())
            }
            ScanRequest::Url { url, .. } => Some(url.trim().to_string()),
            _ => None,
        }
    }
}

/// 扫描器 trait - 所有分析器都需要实现此接口
#[async_trait]
pub trait Scanner: Send + Sync {
    /// 返回扫描器名称
    fn name(&self) -> String;

    /// The request kind this scanner accepts.
    fn scan_type(&self) -> ScanType;

    /// Run one scan. Requests of another kind are rejected with `InvalidInput`.
    async fn scan(&self, request: &ScanRequest) -> Result<Vec<Finding>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ignores_unknown_options() {
        let json = r#"{
            "kind": "code",
            "code": "eval(x)",
            "language": "javascript",
            "options": { "deepScan": true, "colourScheme": "dark" }
        }"#;
        let request: ScanRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.scan_type(), ScanType::Code);
        match request {
            ScanRequest::Code { options, .. } => {
                assert!(options.deep_scan);
                assert!(options.include_line_numbers);
            }
            _ => panic!("expected a code request"),
        }
    }

    #[test]
    fn test_describe_lines() {
        assert_eq!(describe_lines(&[4]), "Line 4");
        assert_eq!(describe_lines(&[1, 5, 9]), "Lines 1, 5, 9");
    }

    #[test]
    fn test_assign_ids() {
        let mut findings = vec![
            Finding {
                id: String::new(),
                rule_id: "a".into(),
                vuln_type: "A".into(),
                risk_level: RiskLevel::Low,
                description: "a".into(),
                location: None,
                line_numbers: None,
                fix: None,
                references: vec![],
                cwe: None,
            };
            2
        ];
        assign_ids("LOG", &mut findings);
        assert_eq!(findings[0].id, "LOG-001");
        assert_eq!(findings[1].id, "LOG-002");
    }
}
