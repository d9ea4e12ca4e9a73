use super::ScanResult;
use crate::error::{Result, ScanError};
use crate::rules::model::RiskLevel;
use crate::scanner::Finding;
use csv::{QuoteStyle, WriterBuilder};
use std::fmt::Write as _;
use std::str::FromStr;

const TITLE: &str = "SHASTRA - Security Vulnerability Report";
const SEPARATOR: &str =
    "--------------------------------------------------------------------------------";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReportFormat {
    Json,
    Html,
    Csv,
    Txt,
    /// Bug-report style export
    Markdown,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Html => "html",
            ReportFormat::Csv => "csv",
            ReportFormat::Txt => "txt",
            ReportFormat::Markdown => "md",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ReportFormat::Json => "application/json",
            ReportFormat::Html => "text/html; charset=utf-8",
            ReportFormat::Csv => "text/csv; charset=utf-8",
            ReportFormat::Txt => "text/plain; charset=utf-8",
            ReportFormat::Markdown => "text/markdown; charset=utf-8",
        }
    }

    fn file_stem(&self) -> &'static str {
        match self {
            ReportFormat::Markdown => "bug_report",
            _ => "vulnerability_report",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "html" | "htm" => Ok(ReportFormat::Html),
            "csv" => Ok(ReportFormat::Csv),
            "txt" | "text" => Ok(ReportFormat::Txt),
            "md" | "markdown" => Ok(ReportFormat::Markdown),
            other => Err(ScanError::InvalidInput(format!(
                "unsupported report format '{}'",
                other
            ))),
        }
    }
}

/// Rendered report plus a suggested download name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub filename: String,
    pub content_type: &'static str,
    pub content: Vec<u8>,
}

pub fn export(result: &ScanResult, format: ReportFormat) -> Result<Export> {
    let filename = format!(
        "{}_{}.{}",
        format.file_stem(),
        result.timestamp().format("%Y-%m-%d_%H%M%S"),
        format.extension()
    );
    Ok(Export {
        filename,
        content_type: format.content_type(),
        content: render(result, format)?,
    })
}

pub fn render(result: &ScanResult, format: ReportFormat) -> Result<Vec<u8>> {
    match format {
        ReportFormat::Json => serde_json::to_vec_pretty(result)
            .map_err(|e| ScanError::Render(format!("JSON encoding failed: {}", e))),
        ReportFormat::Csv => render_csv(result),
        ReportFormat::Html => Ok(render_html(result).into_bytes()),
        ReportFormat::Txt => Ok(render_txt(result).into_bytes()),
        ReportFormat::Markdown => Ok(render_markdown(result).into_bytes()),
    }
}

fn render_csv(result: &ScanResult) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(Vec::new());

    let csv_err = |e: csv::Error| ScanError::Render(format!("CSV encoding failed: {}", e));
    writer
        .write_record(["Type", "Risk Level", "Description", "Fix"])
        .map_err(csv_err)?;
    for finding in result.vulnerabilities() {
        writer
            .write_record([
                finding.vuln_type.as_str(),
                finding.risk_level.as_str(),
                finding.description.as_str(),
                finding.fix.as_deref().unwrap_or(""),
            ])
            .map_err(csv_err)?;
    }

    writer
        .into_inner()
        .map_err(|e| ScanError::Render(format!("CSV flush failed: {}", e)))
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn generated_on(result: &ScanResult) -> String {
    result.timestamp().format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

const LEVELS: [RiskLevel; 4] = [
    RiskLevel::Critical,
    RiskLevel::High,
    RiskLevel::Medium,
    RiskLevel::Low,
];

fn render_html(result: &ScanResult) -> String {
    let mut html = String::new();
    let _ = write!(
        html,
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
body {{ font-family: Arial, sans-serif; margin: 20px; }}
h1, h2 {{ color: #333; }}
.risk-scale {{ display: flex; margin: 20px 0; }}
.risk-item {{ padding: 10px; margin-right: 10px; border-radius: 5px; }}
.critical {{ background-color: #FF0000; color: white; }}
.high {{ background-color: #FF00FF; color: white; }}
.medium {{ background-color: #FFFF00; color: black; }}
.low {{ background-color: #00FF00; color: black; }}
.vulnerability {{ border: 1px solid #ddd; padding: 15px; margin-bottom: 15px; border-radius: 5px; }}
.risk-label {{ display: inline-block; padding: 5px; border-radius: 3px; margin-bottom: 10px; }}
pre {{ background-color: #f5f5f5; padding: 10px; border-radius: 5px; overflow-x: auto; }}
</style>
</head>
<body>
<h1>{title}</h1>
<p>Scan type: {scan_type}</p>
<p>Generated on: {generated}</p>
"#,
        title = TITLE,
        scan_type = result.scan_type(),
        generated = generated_on(result),
    );
    if let Some(target) = result.target() {
        let _ = writeln!(html, "<p>Target: {}</p>", escape_html(target));
    }

    html.push_str("<h2>Summary</h2>\n<div class=\"risk-scale\">\n");
    for level in LEVELS {
        let _ = writeln!(
            html,
            "<div class=\"risk-item {}\">{}: {}</div>",
            level.css_class(),
            level,
            result.summary().count(level)
        );
    }
    let _ = writeln!(html, "</div>\n<p>Total: {}</p>", result.summary().total);

    html.push_str("<h2>Detected Vulnerabilities</h2>\n");
    if result.is_empty() {
        html.push_str("<p>No vulnerabilities detected.</p>\n");
    }
    for finding in result.vulnerabilities() {
        write_html_finding(&mut html, finding);
    }

    html.push_str("</body>\n</html>\n");
    html
}

fn write_html_finding(html: &mut String, finding: &Finding) {
    let _ = write!(
        html,
        "<div class=\"vulnerability\">\n<div class=\"risk-label {class}\">{level}</div>\n<h3>{kind}</h3>\n<p><strong>Description:</strong> {description}</p>\n",
        class = finding.risk_level.css_class(),
        level = finding.risk_level,
        kind = escape_html(&finding.vuln_type),
        description = escape_html(&finding.description),
    );
    if let Some(cwe) = &finding.cwe {
        let _ = writeln!(html, "<p><strong>CWE:</strong> {}</p>", escape_html(cwe));
    }
    if let Some(location) = &finding.location {
        let _ = writeln!(
            html,
            "<p><strong>Location:</strong></p>\n<pre>{}</pre>",
            escape_html(location)
        );
    }
    if let Some(fix) = &finding.fix {
        let _ = writeln!(
            html,
            "<p><strong>Recommended Fix:</strong></p>\n<pre>{}</pre>",
            escape_html(fix)
        );
    }
    if !finding.references.is_empty() {
        html.push_str("<p><strong>References:</strong></p>\n<ul>\n");
        for reference in &finding.references {
            let reference = escape_html(reference);
            let _ = writeln!(html, "<li><a href=\"{0}\">{0}</a></li>", reference);
        }
        html.push_str("</ul>\n");
    }
    html.push_str("</div>\n");
}

fn render_txt(result: &ScanResult) -> String {
    let summary = result.summary();
    let mut txt = String::new();
    let _ = writeln!(txt, "{}", TITLE);
    let _ = writeln!(txt, "Scan type: {}", result.scan_type());
    let _ = writeln!(txt, "Generated on: {}", generated_on(result));
    if let Some(target) = result.target() {
        let _ = writeln!(txt, "Target: {}", target);
    }
    let _ = writeln!(
        txt,
        "Summary: {} total ({} critical, {} high, {} medium, {} low)",
        summary.total, summary.critical, summary.high, summary.medium, summary.low
    );
    let _ = writeln!(txt, "{}", SEPARATOR);

    for (i, finding) in result.vulnerabilities().iter().enumerate() {
        let _ = writeln!(txt, "{}. {}", i + 1, finding.vuln_type);
        let _ = writeln!(txt, "Risk Level: {}", finding.risk_level);
        let _ = writeln!(txt, "Description: {}", finding.description);
        if let Some(cwe) = &finding.cwe {
            let _ = writeln!(txt, "CWE: {}", cwe);
        }
        if let Some(location) = &finding.location {
            let _ = writeln!(txt, "Location: {}", location);
        }
        if let Some(fix) = &finding.fix {
            let _ = writeln!(txt, "Remediation:\n{}", fix);
        }
        if !finding.references.is_empty() {
            let _ = writeln!(txt, "References:");
            for reference in &finding.references {
                let _ = writeln!(txt, "  - {}", reference);
            }
        }
        let _ = writeln!(txt, "{}", SEPARATOR);
    }
    txt
}

fn render_markdown(result: &ScanResult) -> String {
    let summary = result.summary();
    let mut md = String::from("# Bug Report\n\n");
    let _ = writeln!(md, "**Scan type:** {}  ", result.scan_type());
    let _ = writeln!(md, "**Generated on:** {}  ", generated_on(result));
    if let Some(target) = result.target() {
        let _ = writeln!(md, "**Target:** {}  ", target);
    }
    let _ = writeln!(
        md,
        "**Summary:** {} total, {} critical, {} high, {} medium, {} low\n",
        summary.total, summary.critical, summary.high, summary.medium, summary.low
    );

    for finding in result.vulnerabilities() {
        let _ = writeln!(md, "## {}", finding.vuln_type);
        let _ = writeln!(md, "**Risk Level:** {}  ", finding.risk_level);
        let _ = writeln!(md, "**Description:** {}  ", finding.description);
        if let Some(cwe) = &finding.cwe {
            let _ = writeln!(md, "**CWE:** {}  ", cwe);
        }
        if let Some(location) = &finding.location {
            let _ = writeln!(md, "**Location:** {}  ", location.replace('\n', "; "));
        }
        if let Some(fix) = &finding.fix {
            let _ = writeln!(md, "**Recommended Fix:**\n\n```\n{}\n```", fix);
        }
        for reference in &finding.references {
            let _ = writeln!(md, "- <{}>", reference);
        }
        md.push('\n');
    }
    md
}
