use crate::error::{Result, ScanError};
use crate::rules::predicate::{CorrelationCheck, HeaderCheck, TextPattern};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 风险等级：Critical > High > Medium > Low
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(alias = "low")]
    Low,
    #[serde(alias = "medium")]
    Medium,
    #[serde(alias = "high")]
    High,
    #[serde(alias = "critical")]
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Critical => "Critical",
            RiskLevel::High => "High",
            RiskLevel::Medium => "Medium",
            RiskLevel::Low => "Low",
        }
    }

    /// Lower-cased name, used as the HTML styling class.
    pub fn css_class(&self) -> &'static str {
        match self {
            RiskLevel::Critical => "critical",
            RiskLevel::High => "high",
            RiskLevel::Medium => "medium",
            RiskLevel::Low => "low",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 规则所属的分析器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleDomain {
    Code,
    Url,
    #[serde(alias = "logs")]
    Log,
}

impl RuleDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleDomain::Code => "code",
            RuleDomain::Url => "url",
            RuleDomain::Log => "log",
        }
    }
}

impl FromStr for RuleDomain {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "code" => Ok(RuleDomain::Code),
            "url" => Ok(RuleDomain::Url),
            "log" | "logs" => Ok(RuleDomain::Log),
            other => Err(ScanError::UnknownDomain(other.to_string())),
        }
    }
}

impl fmt::Display for RuleDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 代码分析器支持的语言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Javascript,
    Typescript,
    Python,
    Java,
    Csharp,
    Php,
    Go,
    Ruby,
    /// Language-agnostic: only rules without a language scope apply.
    Generic,
}

impl Language {
    pub const ALL: [Language; 9] = [
        Language::Javascript,
        Language::Typescript,
        Language::Python,
        Language::Java,
        Language::Csharp,
        Language::Php,
        Language::Go,
        Language::Ruby,
        Language::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Javascript => "javascript",
            Language::Typescript => "typescript",
            Language::Python => "python",
            Language::Java => "java",
            Language::Csharp => "csharp",
            Language::Php => "php",
            Language::Go => "go",
            Language::Ruby => "ruby",
            Language::Generic => "generic",
        }
    }
}

impl FromStr for Language {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "javascript" | "js" | "jsx" | "node" => Ok(Language::Javascript),
            "typescript" | "ts" | "tsx" => Ok(Language::Typescript),
            "python" | "py" => Ok(Language::Python),
            "java" => Ok(Language::Java),
            "csharp" | "c#" | "cs" => Ok(Language::Csharp),
            "php" => Ok(Language::Php),
            "go" | "golang" => Ok(Language::Go),
            "ruby" | "rb" => Ok(Language::Ruby),
            "" | "generic" | "any" | "auto" | "text" => Ok(Language::Generic),
            other => Err(ScanError::UnsupportedLanguage(other.to_string())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Option gate a rule belongs to. Analyzers switch whole groups on or off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleGroup {
    #[default]
    General,
    Headers,
    Cookies,
    Csp,
    Protocol,
    Transport,
    Resources,
    Attacks,
    Credentials,
    Ips,
    Pii,
    Secrets,
    BruteForce,
    Enumeration,
}

/// URL 检查项（由响应元数据或请求失败触发）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeCheck {
    InsecureProtocol,
    CookieSecure,
    CookieHttpOnly,
    CookieSameSite,
    CspUnsafeInline,
    CspUnsafeEval,
    CspWildcard,
    RedirectLoop,
    MixedContent,
    MissingSri,
    Connectivity,
    TlsFailure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HeaderExpectation {
    /// Header must be present with any value.
    Present,
    /// Header must equal one of the values (case-insensitive).
    OneOf { values: Vec<String> },
    /// Header must contain the value (case-insensitive).
    Contains { value: String },
    /// `max-age` directive must be present and positive.
    MaxAge,
    /// Header should not be sent at all.
    Absent,
    /// Header may be sent but must not disclose a version number.
    NoVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validator {
    Luhn,
}

/// 规则谓词（YAML 中的声明形式）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredicateDef {
    Pattern {
        regex: String,
        #[serde(default)]
        exclude: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        validate: Option<Validator>,
    },
    Header {
        header: String,
        expect: HeaderExpectation,
    },
    Probe {
        check: ProbeCheck,
    },
    Correlation {
        event: String,
        keys: Vec<String>,
        threshold: usize,
    },
}

/// 规则定义（反序列化自规则表）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDef {
    pub id: String,
    pub domain: RuleDomain,
    #[serde(default)]
    pub languages: Vec<Language>,
    pub risk_level: RiskLevel,
    #[serde(rename = "type")]
    pub vuln_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwe: Option<String>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub deep: bool,
    #[serde(default)]
    pub group: RuleGroup,
    pub predicate: PredicateDef,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RuleSet {
    pub name: String,
    pub version: String,
    pub rules: Vec<RuleDef>,
}

/// Compiled predicate, one variant per predicate shape.
#[derive(Debug, Clone)]
pub enum Predicate {
    Pattern(TextPattern),
    Header(HeaderCheck),
    Probe(ProbeCheck),
    Correlation(CorrelationCheck),
}

/// 已编译的规则，注册后不可变
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub domain: RuleDomain,
    pub languages: Vec<Language>,
    pub risk_level: RiskLevel,
    pub vuln_type: String,
    pub cwe: Option<String>,
    pub description: String,
    pub fix: Option<String>,
    pub references: Vec<String>,
    pub deep: bool,
    pub group: RuleGroup,
    pub predicate: Predicate,
}

impl Rule {
    pub fn compile(def: RuleDef) -> Result<Self> {
        if def.id.trim().is_empty() {
            return Err(ScanError::RuleLoad("rule id must not be empty".to_string()));
        }

        let predicate = match def.predicate {
            PredicateDef::Pattern {
                regex,
                exclude,
                validate,
            } => Predicate::Pattern(TextPattern::new(&regex, exclude, validate).map_err(|e| {
                ScanError::RuleLoad(format!("rule {}: invalid pattern: {}", def.id, e))
            })?),
            PredicateDef::Header { header, expect } => {
                Predicate::Header(HeaderCheck::new(header, expect))
            }
            PredicateDef::Probe { check } => Predicate::Probe(check),
            PredicateDef::Correlation {
                event,
                keys,
                threshold,
            } => Predicate::Correlation(CorrelationCheck::new(&event, &keys, threshold).map_err(
                |e| ScanError::RuleLoad(format!("rule {}: invalid correlation: {}", def.id, e)),
            )?),
        };

        Ok(Self {
            id: def.id,
            domain: def.domain,
            languages: def.languages,
            risk_level: def.risk_level,
            vuln_type: def.vuln_type,
            cwe: def.cwe,
            description: def.description,
            fix: def.fix,
            references: def.references,
            deep: def.deep,
            group: def.group,
            predicate,
        })
    }

    pub fn is_language_agnostic(&self) -> bool {
        self.languages.is_empty()
    }

    /// Language-agnostic rules apply everywhere; scoped rules only to their languages.
    pub fn applies_to(&self, language: Option<Language>) -> bool {
        if self.languages.is_empty() {
            return true;
        }
        match language {
            Some(lang) => self.languages.contains(&lang),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert!(RiskLevel::High > RiskLevel::Medium);
        assert!(RiskLevel::Medium > RiskLevel::Low);
    }

    #[test]
    fn test_language_aliases() {
        assert_eq!("JS".parse::<Language>().unwrap(), Language::Javascript);
        assert_eq!("c#".parse::<Language>().unwrap(), Language::Csharp);
        assert_eq!("".parse::<Language>().unwrap(), Language::Generic);
        assert!(matches!(
            "cobol".parse::<Language>(),
            Err(ScanError::UnsupportedLanguage(_))
        ));
    }

    #[test]
    fn test_unknown_domain() {
        assert_eq!("logs".parse::<RuleDomain>().unwrap(), RuleDomain::Log);
        assert!(matches!(
            "binary".parse::<RuleDomain>(),
            Err(ScanError::UnknownDomain(_))
        ));
    }

    #[test]
    fn test_compile_rejects_bad_regex() {
        let def = RuleDef {
            id: "broken".into(),
            domain: RuleDomain::Code,
            languages: vec![],
            risk_level: RiskLevel::Low,
            vuln_type: "Broken".into(),
            cwe: None,
            description: "broken".into(),
            fix: None,
            references: vec![],
            deep: false,
            group: RuleGroup::General,
            predicate: PredicateDef::Pattern {
                regex: "(unclosed".into(),
                exclude: vec![],
                validate: None,
            },
        };
        assert!(matches!(Rule::compile(def), Err(ScanError::RuleLoad(_))));
    }
}
