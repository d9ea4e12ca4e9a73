//! Bounded HTTP probing for the URL analyzer

use crate::config::HttpConfig;
use crate::error::{Result, ScanError};
use reqwest::{redirect, Client, Url};
use scraper::{Html, Selector};
use std::error::Error as StdError;
use std::time::Duration;
use thiserror::Error;

/// Why a probe produced no response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    #[error("SSL/TLS error: {0}")]
    Tls(String),

    #[error("Error connecting to URL: {0}")]
    Connectivity(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Redirect limit of {0} exceeded")]
    Redirects(usize),
}

impl ProbeFailure {
    /// The failure without its category prefix, for appending to a rule description.
    pub fn detail(&self) -> String {
        match self {
            ProbeFailure::Tls(msg) | ProbeFailure::Connectivity(msg) => msg.clone(),
            ProbeFailure::Timeout(secs) => format!("request timed out after {}s", secs),
            ProbeFailure::Redirects(max) => format!("redirect limit of {} exceeded", max),
        }
    }
}

impl From<ProbeFailure> for ScanError {
    fn from(failure: ProbeFailure) -> Self {
        match failure {
            ProbeFailure::Tls(msg) => ScanError::TlsFailure(msg),
            other => ScanError::NetworkFailure(other.to_string()),
        }
    }
}

/// Attributes of one `Set-Cookie` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieAttributes {
    pub name: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<String>,
}

impl CookieAttributes {
    fn parse(header: &str) -> Option<Self> {
        let mut parts = header.split(';');
        let name = parts.next()?.split('=').next()?.trim();
        if name.is_empty() {
            return None;
        }

        let mut cookie = Self {
            name: name.to_string(),
            secure: false,
            http_only: false,
            same_site: None,
        };
        for attribute in parts {
            let (key, value) = match attribute.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (attribute.trim(), None),
            };
            match key.to_ascii_lowercase().as_str() {
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "samesite" => cookie.same_site = value.map(str::to_string),
                _ => {}
            }
        }
        Some(cookie)
    }
}

/// `<script src>` found in an HTML page, resolved against the page URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedScript {
    pub url: Url,
    pub has_integrity: bool,
}

/// HTTP response wrapper
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    pub requested_url: Url,
    /// Final URL (after redirects)
    pub final_url: Url,
    pub status: u16,
    /// Headers in received order; repeated headers keep every value
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl ProbeResponse {
    pub fn new(
        final_url: Url,
        status: u16,
        headers: Vec<(String, String)>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            requested_url: final_url.clone(),
            final_url,
            status,
            headers,
            body: body.into(),
        }
    }

    /// First value of a header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// A 3xx with a `Location` that was not followed: the redirect chain was cut off.
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status) && self.header("location").is_some()
    }

    pub fn is_html(&self) -> bool {
        self.header("content-type")
            .map(|ct| ct.to_ascii_lowercase().contains("text/html"))
            .unwrap_or(false)
    }

    pub fn cookies(&self) -> Vec<CookieAttributes> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("set-cookie"))
            .filter_map(|(_, v)| CookieAttributes::parse(v))
            .collect()
    }

    pub fn linked_scripts(&self) -> Vec<LinkedScript> {
        if !self.is_html() {
            return Vec::new();
        }
        let Ok(selector) = Selector::parse("script[src]") else {
            return Vec::new();
        };

        let document = Html::parse_document(&self.body);
        document
            .select(&selector)
            .filter_map(|element| {
                let src = element.value().attr("src")?.trim();
                let url = self.final_url.join(src).ok()?;
                let has_integrity = element
                    .value()
                    .attr("integrity")
                    .map(|v| !v.trim().is_empty())
                    .unwrap_or(false);
                Some(LinkedScript { url, has_integrity })
            })
            .collect()
    }
}

/// Single-attempt HTTP client with a bounded timeout and redirect chain.
#[derive(Clone)]
pub struct HttpProbe {
    client: Client,
    timeout: Duration,
    max_redirects: usize,
    max_body_bytes: usize,
}

impl HttpProbe {
    pub fn new(config: &HttpConfig, max_body_bytes: usize) -> Result<Self> {
        let max_redirects = config.max_redirects;
        // Stop instead of failing, so the last 3xx comes back as a response.
        let policy = redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() > max_redirects
                || attempt.previous().contains(attempt.url())
            {
                attempt.stop()
            } else {
                attempt.follow()
            }
        });

        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .redirect(policy)
            .build()
            .map_err(|e| ScanError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            timeout: config.timeout(),
            max_redirects,
            max_body_bytes,
        })
    }

    /// One GET request. Transport errors are classified, never retried.
    pub async fn fetch(&self, url: &Url) -> std::result::Result<ProbeResponse, ProbeFailure> {
        tracing::debug!(url = %url, "probing");
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.classify(&e))?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        // read at most max_body_bytes
        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.classify(&e))? {
            let room = self.max_body_bytes - bytes.len();
            if chunk.len() >= room {
                bytes.extend_from_slice(&chunk[..room]);
                break;
            }
            bytes.extend_from_slice(&chunk);
        }
        let body = String::from_utf8_lossy(&bytes).into_owned();

        tracing::debug!(url = %final_url, status, "probe completed");
        Ok(ProbeResponse {
            requested_url: url.clone(),
            final_url,
            status,
            headers,
            body,
        })
    }

    fn classify(&self, err: &reqwest::Error) -> ProbeFailure {
        if err.is_timeout() {
            ProbeFailure::Timeout(self.timeout.as_secs())
        } else if err.is_redirect() {
            ProbeFailure::Redirects(self.max_redirects)
        } else if is_tls_error(err) {
            ProbeFailure::Tls(error_chain(err))
        } else {
            ProbeFailure::Connectivity(error_chain(err))
        }
    }
}

fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut messages = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        let msg = cause.to_string();
        if !messages.contains(&msg) {
            messages.push(msg);
        }
        source = cause.source();
    }
    messages.join(": ")
}

/// The top-level message embeds the URL, so only the causes are inspected.
fn is_tls_error(err: &(dyn StdError + 'static)) -> bool {
    const MARKERS: [&str; 6] = ["certificate", "tls", "ssl", "handshake", "unknownissuer", "x509"];
    let mut source = err.source();
    while let Some(cause) = source {
        let msg = cause.to_string().to_ascii_lowercase();
        if MARKERS.iter().any(|marker| msg.contains(marker)) {
            return true;
        }
        source = cause.source();
    }
    false
}
