use crate::error::{Result, ScanError};
use crate::rules::model::{HeaderExpectation, Predicate, ProbeCheck, Validator};
use crate::scanner::lines::LineIndex;
use crate::scanner::probe::{ProbeFailure, ProbeResponse};
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Input handed to a predicate. Each predicate shape accepts a subset of these.
pub enum RuleInput<'a> {
    /// Whole source text, with its line table.
    Text(&'a LineIndex<'a>),
    /// Log lines; `threshold` overrides a correlation rule's own threshold.
    Lines {
        lines: &'a [&'a str],
        threshold: Option<usize>,
    },
    Response(&'a ProbeResponse),
    Failure(&'a ProbeFailure),
}

impl RuleInput<'_> {
    fn kind(&self) -> &'static str {
        match self {
            RuleInput::Text(_) => "text",
            RuleInput::Lines { .. } => "lines",
            RuleInput::Response(_) => "response",
            RuleInput::Failure(_) => "failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationHit {
    pub key: String,
    pub lines: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleMatch {
    /// 1-based line numbers, ascending and deduplicated.
    Lines(Vec<usize>),
    /// A header or probe check failed; the string says how.
    Violation(String),
    Correlated(CorrelationHit),
}

impl Predicate {
    pub fn kind(&self) -> &'static str {
        match self {
            Predicate::Pattern(_) => "pattern",
            Predicate::Header(_) => "header",
            Predicate::Probe(_) => "probe",
            Predicate::Correlation(_) => "correlation",
        }
    }

    /// Evaluate the predicate. An input the predicate cannot handle is an error,
    /// which analyzers log and skip.
    pub fn evaluate(&self, input: &RuleInput<'_>) -> Result<Vec<RuleMatch>> {
        let matches = match (self, input) {
            (Predicate::Pattern(pattern), RuleInput::Text(index)) => {
                let lines = pattern.match_lines(index);
                if lines.is_empty() {
                    Vec::new()
                } else {
                    vec![RuleMatch::Lines(lines)]
                }
            }
            (Predicate::Pattern(pattern), RuleInput::Lines { lines, .. }) => {
                let hits: Vec<usize> = lines
                    .iter()
                    .enumerate()
                    .filter(|(_, line)| pattern.line_matches(line))
                    .map(|(i, _)| i + 1)
                    .collect();
                if hits.is_empty() {
                    Vec::new()
                } else {
                    vec![RuleMatch::Lines(hits)]
                }
            }
            (Predicate::Header(check), RuleInput::Response(response)) => check
                .evaluate(response.header(&check.header))
                .map(RuleMatch::Violation)
                .into_iter()
                .collect(),
            (Predicate::Probe(check), RuleInput::Response(response)) => check
                .evaluate_response(response)
                .map(RuleMatch::Violation)
                .into_iter()
                .collect(),
            (Predicate::Probe(check), RuleInput::Failure(failure)) => check
                .evaluate_failure(failure)
                .map(RuleMatch::Violation)
                .into_iter()
                .collect(),
            (Predicate::Correlation(check), RuleInput::Lines { lines, threshold }) => check
                .correlate(lines, threshold.unwrap_or(check.threshold))
                .into_iter()
                .map(RuleMatch::Correlated)
                .collect(),
            (predicate, input) => {
                return Err(ScanError::InvalidInput(format!(
                    "{} predicate cannot evaluate {} input",
                    predicate.kind(),
                    input.kind()
                )))
            }
        };
        Ok(matches)
    }
}

/// 文本正则谓词
#[derive(Debug, Clone)]
pub struct TextPattern {
    regex: Regex,
    exclude: Vec<String>,
    validate: Option<Validator>,
}

impl TextPattern {
    pub fn new(
        pattern: &str,
        exclude: Vec<String>,
        validate: Option<Validator>,
    ) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(pattern)?,
            exclude: exclude.into_iter().map(|t| t.to_lowercase()).collect(),
            validate,
        })
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    fn accepts(&self, matched: &str) -> bool {
        match self.validate {
            None => true,
            Some(Validator::Luhn) => luhn_valid(matched),
        }
    }

    fn excluded(&self, line: &str) -> bool {
        if self.exclude.is_empty() {
            return false;
        }
        let lower = line.to_lowercase();
        self.exclude.iter().any(|token| lower.contains(token.as_str()))
    }

    /// Lines of the indexed text the pattern fires on. Exclusion tokens are
    /// checked once per line so a long single line stays linear.
    pub fn match_lines(&self, index: &LineIndex<'_>) -> Vec<usize> {
        let mut lines = BTreeSet::new();
        let mut rejected = HashSet::new();

        for m in self.regex.find_iter(index.text()) {
            let line = index.line_of(m.start());
            if lines.contains(&line) || rejected.contains(&line) {
                continue;
            }
            if !self.accepts(m.as_str()) {
                continue;
            }
            if self.excluded(index.line_text(line)) {
                rejected.insert(line);
                continue;
            }
            lines.insert(line);
        }

        lines.into_iter().collect()
    }

    pub fn line_matches(&self, line: &str) -> bool {
        let hit = match self.validate {
            None => self.regex.is_match(line),
            Some(_) => self.regex.find_iter(line).any(|m| self.accepts(m.as_str())),
        };
        hit && !self.excluded(line)
    }
}

fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();

    sum % 10 == 0
}

/// 响应头检查
#[derive(Debug, Clone)]
pub struct HeaderCheck {
    pub header: String,
    pub expect: HeaderExpectation,
}

impl HeaderCheck {
    pub fn new(header: String, expect: HeaderExpectation) -> Self {
        Self { header, expect }
    }

    /// Returns a description of the violation, or `None` when the header is fine.
    pub fn evaluate(&self, value: Option<&str>) -> Option<String> {
        let value = value.map(str::trim);
        match (&self.expect, value) {
            (HeaderExpectation::Absent, None) | (HeaderExpectation::NoVersion, None) => None,
            (HeaderExpectation::Absent, Some(v)) => {
                Some(format!("{} header discloses '{}'", self.header, v))
            }
            (HeaderExpectation::NoVersion, Some(v)) => {
                if v.chars().any(|c| c.is_ascii_digit()) {
                    Some(format!("{} header discloses version '{}'", self.header, v))
                } else {
                    None
                }
            }
            (_, None) => Some(format!("{} header is not set", self.header)),
            (HeaderExpectation::Present, Some(_)) => None,
            (HeaderExpectation::OneOf { values }, Some(v)) => {
                if values.iter().any(|allowed| allowed.eq_ignore_ascii_case(v)) {
                    None
                } else {
                    Some(format!(
                        "{} has unexpected value '{}' (expected one of: {})",
                        self.header,
                        v,
                        values.join(", ")
                    ))
                }
            }
            (HeaderExpectation::Contains { value: needle }, Some(v)) => {
                if v.to_lowercase().contains(&needle.to_lowercase()) {
                    None
                } else {
                    Some(format!(
                        "{} value '{}' does not include '{}'",
                        self.header, v, needle
                    ))
                }
            }
            (HeaderExpectation::MaxAge, Some(v)) => match parse_max_age(v) {
                Some(age) if age > 0 => None,
                _ => Some(format!("{} max-age is missing or zero", self.header)),
            },
        }
    }
}

fn parse_max_age(value: &str) -> Option<u64> {
    value.split(';').find_map(|directive| {
        let (name, age) = directive.trim().split_once('=')?;
        if name.trim().eq_ignore_ascii_case("max-age") {
            age.trim().trim_matches('"').parse().ok()
        } else {
            None
        }
    })
}

impl ProbeCheck {
    pub fn evaluate_response(&self, response: &ProbeResponse) -> Option<String> {
        match self {
            ProbeCheck::InsecureProtocol => (response.final_url.scheme() == "http")
                .then(|| format!("{} is served over plain HTTP", response.final_url)),
            ProbeCheck::CookieSecure => list_cookies(response, "Secure", |c| !c.secure),
            ProbeCheck::CookieHttpOnly => list_cookies(response, "HttpOnly", |c| !c.http_only),
            ProbeCheck::CookieSameSite => {
                list_cookies(response, "SameSite", |c| c.same_site.is_none())
            }
            ProbeCheck::CspUnsafeInline => csp_directives_with(response, "'unsafe-inline'", |s| {
                s.eq_ignore_ascii_case("'unsafe-inline'")
            }),
            ProbeCheck::CspUnsafeEval => csp_directives_with(response, "'unsafe-eval'", |s| {
                s.eq_ignore_ascii_case("'unsafe-eval'")
            }),
            ProbeCheck::CspWildcard => csp_directives_with(response, "wildcard sources", |s| {
                s == "*" || matches!(s.to_ascii_lowercase().as_str(), "http:" | "https:" | "data:")
            }),
            ProbeCheck::RedirectLoop => {
                if response.is_redirect() {
                    let location = response.header("location").unwrap_or("<none>");
                    Some(format!(
                        "redirects did not settle; stopped at {} -> {}",
                        response.final_url, location
                    ))
                } else {
                    None
                }
            }
            ProbeCheck::MixedContent => {
                if response.final_url.scheme() != "https" {
                    return None;
                }
                let insecure: Vec<String> = response
                    .linked_scripts()
                    .into_iter()
                    .filter(|s| s.url.scheme() == "http")
                    .map(|s| s.url.to_string())
                    .collect();
                (!insecure.is_empty())
                    .then(|| format!("scripts loaded over HTTP: {}", insecure.join(", ")))
            }
            ProbeCheck::MissingSri => {
                let page_host = response.final_url.host_str();
                let unpinned: Vec<String> = response
                    .linked_scripts()
                    .into_iter()
                    .filter(|s| s.url.host_str() != page_host && !s.has_integrity)
                    .map(|s| s.url.to_string())
                    .collect();
                (!unpinned.is_empty()).then(|| {
                    format!(
                        "cross-origin scripts without integrity: {}",
                        unpinned.join(", ")
                    )
                })
            }
            ProbeCheck::Connectivity | ProbeCheck::TlsFailure => None,
        }
    }

    pub fn evaluate_failure(&self, failure: &ProbeFailure) -> Option<String> {
        let hit = matches!(
            (self, failure),
            (ProbeCheck::TlsFailure, ProbeFailure::Tls(_))
                | (
                    ProbeCheck::Connectivity,
                    ProbeFailure::Connectivity(_) | ProbeFailure::Timeout(_)
                )
                | (ProbeCheck::RedirectLoop, ProbeFailure::Redirects(_))
        );
        hit.then(|| failure.detail())
    }
}

fn list_cookies(
    response: &ProbeResponse,
    attribute: &str,
    offending: impl Fn(&crate::scanner::probe::CookieAttributes) -> bool,
) -> Option<String> {
    let names: Vec<String> = response
        .cookies()
        .into_iter()
        .filter(|c| offending(c))
        .map(|c| c.name)
        .collect();
    (!names.is_empty()).then(|| format!("cookies without {}: {}", attribute, names.join(", ")))
}

fn csp_directives_with(
    response: &ProbeResponse,
    what: &str,
    is_unsafe: impl Fn(&str) -> bool,
) -> Option<String> {
    let policy = response.header("content-security-policy")?;
    let directives: Vec<&str> = policy
        .split(';')
        .filter_map(|directive| {
            let mut parts = directive.split_whitespace();
            let name = parts.next()?;
            parts.any(|source| is_unsafe(source)).then_some(name)
        })
        .collect();
    (!directives.is_empty()).then(|| format!("{} allowed in {}", what, directives.join(", ")))
}

/// Per-scan accumulator: correlation key -> lines where the event occurred.
#[derive(Debug, Default)]
pub struct CorrelationState {
    order: Vec<String>,
    occurrences: HashMap<String, Vec<usize>>,
}

impl CorrelationState {
    pub fn observe(&mut self, key: &str, line: usize) {
        match self.occurrences.get_mut(key) {
            Some(lines) => lines.push(line),
            None => {
                self.order.push(key.to_string());
                self.occurrences.insert(key.to_string(), vec![line]);
            }
        }
    }

    /// Keys meeting the threshold (inclusive), in order of first occurrence.
    pub fn into_hits(mut self, threshold: usize) -> Vec<CorrelationHit> {
        let threshold = threshold.max(1);
        self.order
            .into_iter()
            .filter_map(|key| {
                let lines = self.occurrences.remove(&key)?;
                (lines.len() >= threshold).then_some(CorrelationHit { key, lines })
            })
            .collect()
    }
}

/// 跨行关联谓词（暴力破解/重复攻击检测）
#[derive(Debug, Clone)]
pub struct CorrelationCheck {
    event: Regex,
    keys: Vec<Regex>,
    pub threshold: usize,
}

impl CorrelationCheck {
    pub fn new(
        event: &str,
        keys: &[String],
        threshold: usize,
    ) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            event: Regex::new(event)?,
            keys: keys
                .iter()
                .map(|k| Regex::new(k))
                .collect::<std::result::Result<_, _>>()?,
            threshold,
        })
    }

    /// First key pattern that matches wins; capture group 1 if present, else the whole match.
    fn key_of<'l>(&self, line: &'l str) -> Option<&'l str> {
        self.keys.iter().find_map(|re| {
            let caps = re.captures(line)?;
            let m = caps.get(1).or_else(|| caps.get(0))?;
            (!m.as_str().is_empty()).then(|| m.as_str())
        })
    }

    pub fn correlate(&self, lines: &[&str], threshold: usize) -> Vec<CorrelationHit> {
        let mut state = CorrelationState::default();
        for (i, line) in lines.iter().enumerate() {
            if !self.event.is_match(line) {
                continue;
            }
            if let Some(key) = self.key_of(line) {
                state.observe(key, i + 1);
            }
        }
        state.into_hits(threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luhn() {
        assert!(luhn_valid("4111 1111 1111 1111"));
        assert!(luhn_valid("5500-0000-0000-0004"));
        assert!(!luhn_valid("4111 1111 1111 1112"));
        assert!(!luhn_valid("1234"));
    }

    #[test]
    fn test_pattern_exclusion_is_per_line() {
        let pattern = TextPattern::new(
            r"(?i)select .* from",
            vec!["Parameterized".into()],
            None,
        )
        .unwrap();
        let text = "select a from t\n// parameterized: select b from t\nselect c from t";
        let index = LineIndex::new(text);
        assert_eq!(pattern.match_lines(&index), vec![1, 3]);
    }

    #[test]
    fn test_header_expectations() {
        let hsts = HeaderCheck::new("Strict-Transport-Security".into(), HeaderExpectation::MaxAge);
        assert!(hsts.evaluate(Some("max-age=31536000; includeSubDomains")).is_none());
        assert!(hsts.evaluate(Some("max-age=0")).is_some());
        assert!(hsts.evaluate(None).is_some());

        let xfo = HeaderCheck::new(
            "X-Frame-Options".into(),
            HeaderExpectation::OneOf {
                values: vec!["DENY".into(), "SAMEORIGIN".into()],
            },
        );
        assert!(xfo.evaluate(Some("sameorigin")).is_none());
        assert!(xfo.evaluate(Some("ALLOW-FROM https://x")).is_some());

        let server = HeaderCheck::new("Server".into(), HeaderExpectation::NoVersion);
        assert!(server.evaluate(None).is_none());
        assert!(server.evaluate(Some("nginx")).is_none());
        assert!(server.evaluate(Some("nginx/1.18.0")).is_some());
    }

    #[test]
    fn test_correlation_threshold_is_inclusive() {
        let check = CorrelationCheck::new(
            r"(?i)failed login",
            &[r"\b((?:\d{1,3}\.){3}\d{1,3})\b".to_string()],
            3,
        )
        .unwrap();
        let lines = vec![
            "failed login from 10.0.0.1",
            "failed login from 10.0.0.2",
            "ok login from 10.0.0.1",
            "failed login from 10.0.0.1",
            "failed login from 10.0.0.1",
        ];
        let hits = check.correlate(&lines, 3);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "10.0.0.1");
        assert_eq!(hits[0].lines, vec![1, 4, 5]);
        assert!(check.correlate(&lines, 4).is_empty());
    }

    #[test]
    fn test_mismatched_input_is_an_error() {
        let predicate = Predicate::Pattern(TextPattern::new("x", vec![], None).unwrap());
        let failure = ProbeFailure::Timeout(5);
        assert!(predicate.evaluate(&RuleInput::Failure(&failure)).is_err());
    }
}
