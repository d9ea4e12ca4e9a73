use shastra_core::{
    aggregate, export, render, Finding, ReportFormat, RiskLevel, ScanRequest, ScanType,
    ScannerConfig, ScannerManager,
};

fn finding(id: &str, level: RiskLevel, description: &str) -> Finding {
    Finding {
        id: id.to_string(),
        rule_id: format!("test-{}", id),
        vuln_type: "SQL Injection".to_string(),
        risk_level: level,
        description: description.to_string(),
        location: Some("Line 3".to_string()),
        line_numbers: Some(vec![3]),
        fix: Some("Use bound parameters".to_string()),
        references: Vec::new(),
        cwe: Some("CWE-89".to_string()),
    }
}

#[test]
fn test_csv_round_trips_awkward_text() {
    let description = "query built with \"quotes\", commas\nand a newline";
    let result = aggregate(
        vec![
            finding("CODE-001", RiskLevel::Critical, description),
            finding("CODE-002", RiskLevel::Low, "plain"),
        ],
        ScanType::Code,
    );
    let bytes = render(&result, ReportFormat::Csv).unwrap();

    let mut reader = csv::Reader::from_reader(bytes.as_slice());
    let headers = reader.headers().unwrap().clone();
    assert_eq!(
        headers.iter().collect::<Vec<_>>(),
        vec!["Type", "Risk Level", "Description", "Fix"]
    );
    let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(records.len(), 2);
    assert_eq!(&records[0][1], "Critical");
    assert_eq!(&records[0][2], description);
    assert_eq!(&records[1][3], "Use bound parameters");
}

#[test]
fn test_export_names_and_content_types() {
    let result = aggregate(vec![finding("LOG-001", RiskLevel::High, "x")], ScanType::Logs);
    for (format, ext, mime) in [
        (ReportFormat::Json, ".json", "application/json"),
        (ReportFormat::Csv, ".csv", "text/csv"),
        (ReportFormat::Html, ".html", "text/html"),
    ] {
        let exported = export(&result, format).unwrap();
        assert!(exported.filename.ends_with(ext), "{}", exported.filename);
        assert!(exported.content_type.starts_with(mime), "{}", exported.content_type);
        assert!(!exported.content.is_empty());
    }
    let markdown = export(&result, ReportFormat::Markdown).unwrap();
    assert!(markdown.filename.starts_with("bug_report_"));
}

#[tokio::test]
async fn test_json_request_through_manager() {
    let manager = ScannerManager::with_config(&ScannerConfig::default()).unwrap();
    let request: ScanRequest = serde_json::from_str(
        r#"{
            "kind": "logs",
            "logs": "GET /?id=1%27%20UNION%20SELECT%20password%20FROM%20users-- 200\nuser=bob password=hunter2",
            "options": {"detectIps": false, "someFutureFlag": 1}
        }"#,
    )
    .unwrap();

    let result = manager.scan(&request).await.unwrap();
    assert_eq!(result.scan_type(), ScanType::Logs);
    let summary = result.summary();
    assert_eq!(summary.total, result.vulnerabilities().len());
    assert_eq!(
        summary.critical + summary.high + summary.medium + summary.low,
        summary.total
    );
    assert!(result
        .vulnerabilities()
        .iter()
        .any(|f| f.rule_id == "log-credential-leak"));
    assert!(result
        .vulnerabilities()
        .iter()
        .all(|f| f.rule_id != "log-ip-disclosure"));

    let json = render(&result, ReportFormat::Json).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
    assert_eq!(value["scan_type"], "logs");
    assert_eq!(value["summary"]["total"], summary.total);
}

#[test]
fn test_report_formats_parse_case_insensitively() {
    assert_eq!("CSV".parse::<ReportFormat>().unwrap(), ReportFormat::Csv);
    assert_eq!("md".parse::<ReportFormat>().unwrap(), ReportFormat::Markdown);
    assert!("docx".parse::<ReportFormat>().is_err());
}
