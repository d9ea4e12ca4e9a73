// SHASTRA Core Library
// 核心功能库：规则注册表、代码/URL/日志分析器、结果聚合与报告导出

pub mod config;
pub mod logging;
mod report;
mod rules;
mod scanner;

// 重新导出常用类型
pub use config::ScannerConfig;
pub use error::{Result, ScanError};
pub use report::render::{export, render, Export, ReportFormat};
pub use report::{aggregate, aggregate_with_target, ScanResult, Summary};
pub use scanner::code::{CodeAnalyzer, CodeScanOptions};
pub use scanner::logs::{LogAnalyzer, LogScanOptions};
pub use scanner::manager::ScannerManager;
pub use scanner::probe::{HttpProbe, LinkedScript, ProbeFailure, ProbeResponse};
pub use scanner::url::{ScanDepth, UrlAnalyzer, UrlScanOptions};
pub use scanner::{Finding, ScanRequest, ScanType, Scanner};

// 规则系统
pub use rules::loader::{load_rules_from_dir, parse_rule_set};
pub use rules::model::{
    Language, Predicate, ProbeCheck, RiskLevel, Rule, RuleDef, RuleDomain, RuleGroup, RuleSet,
};
pub use rules::registry::RuleRegistry;

pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum ScanError {
        #[error("Invalid input: {0}")]
        InvalidInput(String),

        #[error("Unsupported language: {0}")]
        UnsupportedLanguage(String),

        #[error("Invalid URL: {0}")]
        InvalidUrl(String),

        #[error("Network failure: {0}")]
        NetworkFailure(String),

        #[error("TLS failure: {0}")]
        TlsFailure(String),

        #[error("Unknown rule domain: {0}")]
        UnknownDomain(String),

        #[error("Rule load error: {0}")]
        RuleLoad(String),

        #[error("Render error: {0}")]
        Render(String),

        #[error("Configuration error: {0}")]
        Config(String),

        #[error("IO error: {0}")]
        Io(#[from] std::io::Error),
    }

    pub type Result<T> = std::result::Result<T, ScanError>;
}
