use super::code::CodeAnalyzer;
use super::logs::LogAnalyzer;
use super::url::UrlAnalyzer;
use super::{ScanRequest, ScanType, Scanner};
use crate::config::ScannerConfig;
use crate::error::{Result, ScanError};
use crate::report::{aggregate_with_target, ScanResult};
use crate::rules::registry::RuleRegistry;
use std::sync::Arc;

/// Routes each request to the one analyzer registered for its kind.
#[derive(Clone)]
pub struct ScannerManager {
    scanners: Vec<Arc<dyn Scanner>>,
    max_payload_bytes: usize,
}

impl Default for ScannerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ScannerManager {
    pub fn new() -> Self {
        Self {
            scanners: Vec::new(),
            max_payload_bytes: ScannerConfig::default().max_payload_bytes,
        }
    }

    /// Manager with the three built-in analyzers over the shared rule registry.
    pub fn with_config(config: &ScannerConfig) -> Result<Self> {
        Self::with_registry(RuleRegistry::global(), config)
    }

    pub fn with_registry(registry: Arc<RuleRegistry>, config: &ScannerConfig) -> Result<Self> {
        let mut manager = Self {
            scanners: Vec::new(),
            max_payload_bytes: config.max_payload_bytes,
        };
        manager.register_scanner(CodeAnalyzer::with_config(Arc::clone(&registry), &config.code));
        manager.register_scanner(UrlAnalyzer::new(
            Arc::clone(&registry),
            &config.http,
            config.max_payload_bytes,
        )?);
        manager.register_scanner(LogAnalyzer::with_config(registry, &config.logs));
        Ok(manager)
    }

    /// A later registration for the same scan type replaces the earlier one.
    pub fn register_scanner<S: Scanner + 'static>(&mut self, scanner: S) {
        let scan_type = scanner.scan_type();
        self.scanners.retain(|s| s.scan_type() != scan_type);
        tracing::debug!(scanner = %scanner.name(), scan_type = %scan_type, "registered scanner");
        self.scanners.push(Arc::new(scanner));
    }

    pub fn scanner_for(&self, scan_type: ScanType) -> Option<&Arc<dyn Scanner>> {
        self.scanners.iter().find(|s| s.scan_type() == scan_type)
    }

    /// Validate, dispatch to exactly one analyzer, aggregate.
    pub async fn scan(&self, request: &ScanRequest) -> Result<ScanResult> {
        let scan_type = request.scan_type();
        if request.payload_len() > self.max_payload_bytes {
            return Err(ScanError::InvalidInput(format!(
                "{} payload of {} bytes exceeds the {} byte limit",
                scan_type,
                request.payload_len(),
                self.max_payload_bytes
            )));
        }

        let scanner = self.scanner_for(scan_type).ok_or_else(|| {
            ScanError::InvalidInput(format!("no analyzer registered for {} scans", scan_type))
        })?;

        let findings = scanner.scan(request).await?;
        Ok(aggregate_with_target(findings, scan_type, request.target()))
    }

    /// Run independent requests concurrently; results keep the request order.
    pub async fn scan_many(&self, requests: Vec<ScanRequest>) -> Vec<Result<ScanResult>> {
        let mut set = tokio::task::JoinSet::new();
        let total = requests.len();

        for (index, request) in requests.into_iter().enumerate() {
            let manager = self.clone();
            set.spawn(async move { (index, manager.scan(&request).await) });
        }

        let mut results: Vec<Option<Result<ScanResult>>> = (0..total).map(|_| None).collect();
        while let Some(res) = set.join_next().await {
            match res {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => tracing::error!(error = %e, "scan task failed"),
            }
        }

        results
            .into_iter()
            .map(|result| {
                result.unwrap_or_else(|| {
                    Err(ScanError::InvalidInput("scan task did not complete".to_string()))
                })
            })
            .collect()
    }
}
