//! Scanner configuration

use crate::error::{Result, ScanError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// HTTP probing settings (URL analyzer)
    #[serde(default)]
    pub http: HttpConfig,

    /// Code analyzer settings
    #[serde(default)]
    pub code: CodeConfig,

    /// Log analyzer settings
    #[serde(default)]
    pub logs: LogsConfig,

    /// Largest accepted payload, in bytes
    #[serde(default = "default_max_payload")]
    pub max_payload_bytes: usize,
}

impl ScannerConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ScanError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| ScanError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Merge with environment variables (SHASTRA_ prefix). A `.env` file in
    /// the working directory is loaded first when present.
    pub fn merge_env(mut self) -> Self {
        dotenv::dotenv().ok();

        // HTTP settings
        if let Some(n) = env_parse("SHASTRA_HTTP_TIMEOUT_SECONDS") {
            self.http.timeout_seconds = n;
        }
        if let Some(n) = env_parse("SHASTRA_HTTP_CONNECT_TIMEOUT_SECONDS") {
            self.http.connect_timeout_seconds = n;
        }
        if let Some(n) = env_parse("SHASTRA_HTTP_MAX_REDIRECTS") {
            self.http.max_redirects = n;
        }
        if let Ok(val) = std::env::var("SHASTRA_HTTP_USER_AGENT") {
            self.http.user_agent = val;
        }
        if let Some(n) = env_parse("SHASTRA_HTTP_MAX_SECONDARY_PROBES") {
            self.http.max_secondary_probes = n;
        }
        if let Some(n) = env_parse("SHASTRA_HTTP_DEEP_BUDGET_SECONDS") {
            self.http.deep_budget_seconds = n;
        }

        // Code settings
        if let Some(flag) = env_parse("SHASTRA_CODE_UNKNOWN_LANGUAGE_FALLBACK") {
            self.code.unknown_language_fallback = flag;
        }

        // Log settings
        if let Some(n) = env_parse("SHASTRA_LOGS_BRUTE_FORCE_THRESHOLD") {
            self.logs.brute_force_threshold = Some(n);
        }
        if let Some(n) = env_parse("SHASTRA_LOGS_MAX_CONTEXT_LINES") {
            self.logs.max_context_lines = n;
        }

        if let Some(n) = env_parse("SHASTRA_MAX_PAYLOAD_BYTES") {
            self.max_payload_bytes = n;
        }

        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let val = std::env::var(key).ok()?;
    match val.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(key, value = %val, "ignoring unparsable environment override");
            None
        }
    }
}

fn default_max_payload() -> usize {
    5 * 1024 * 1024
}

/// HTTP probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Whole-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,

    /// Redirects followed before the chain is reported as a loop
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Linked scripts fetched in deep mode
    #[serde(default = "default_max_secondary_probes")]
    pub max_secondary_probes: usize,

    /// Overall time allowed for all deep-mode secondary probes, in seconds
    #[serde(default = "default_deep_budget")]
    pub deep_budget_seconds: u64,
}

fn default_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_max_redirects() -> usize {
    5
}

fn default_user_agent() -> String {
    format!("shastra-scanner/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_secondary_probes() -> usize {
    10
}

fn default_deep_budget() -> u64 {
    30
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn deep_budget(&self) -> Duration {
        Duration::from_secs(self.deep_budget_seconds)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            connect_timeout_seconds: default_connect_timeout(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
            max_secondary_probes: default_max_secondary_probes(),
            deep_budget_seconds: default_deep_budget(),
        }
    }
}

/// Code analyzer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeConfig {
    /// Scan unknown languages with language-agnostic rules instead of failing
    #[serde(default)]
    pub unknown_language_fallback: bool,
}

/// Log analyzer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    /// Overrides the brute-force rule's own threshold
    #[serde(default)]
    pub brute_force_threshold: Option<usize>,

    /// Lines quoted verbatim when a request asks for context
    #[serde(default = "default_max_context_lines")]
    pub max_context_lines: usize,
}

fn default_max_context_lines() -> usize {
    5
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            brute_force_threshold: None,
            max_context_lines: default_max_context_lines(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScannerConfig::default();
        assert_eq!(config.http.timeout(), Duration::from_secs(10));
        assert_eq!(config.http.max_redirects, 5);
        assert_eq!(config.http.max_secondary_probes, 10);
        assert_eq!(config.logs.brute_force_threshold, None);
        assert!(!config.code.unknown_language_fallback);
        assert_eq!(config.max_payload_bytes, 5 * 1024 * 1024);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = ScannerConfig::from_yaml_str(
            "http:\n  timeout_seconds: 3\nlogs:\n  brute_force_threshold: 8\n",
        )
        .unwrap();
        assert_eq!(config.http.timeout_seconds, 3);
        assert_eq!(config.http.connect_timeout_seconds, 5);
        assert_eq!(config.logs.brute_force_threshold, Some(8));
        assert_eq!(config.logs.max_context_lines, 5);
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        assert!(matches!(
            ScannerConfig::from_yaml_str("http: [1, 2"),
            Err(ScanError::Config(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shastra.yaml");
        std::fs::write(&path, "max_payload_bytes: 1024\n").unwrap();
        let config = ScannerConfig::from_file(&path).unwrap();
        assert_eq!(config.max_payload_bytes, 1024);
        assert!(ScannerConfig::from_file(dir.path().join("missing.yaml")).is_err());
    }
}
