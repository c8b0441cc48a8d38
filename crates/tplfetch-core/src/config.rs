//! Configuration loaded from the process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Desktop Chrome user agent presented to the source site.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

/// Known page layouts of the source site, each with its own candidate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectorProfile {
    /// `editor_styles` preview pages rendering into `#fullpage.mg-content`.
    EditorStyles,
    /// Article-style previews (`#js_content` and generic preview shells).
    ArticlePreview,
}

impl SelectorProfile {
    /// Candidate selectors in priority order. First match wins.
    pub fn selectors(&self) -> &'static [&'static str] {
        match self {
            Self::EditorStyles => &[
                "#fullpage.mg-content",
                "#fullpage",
                ".mg-content",
            ],
            Self::ArticlePreview => &[
                "#js_content",
                "article",
                ".rich_media_content",
                ".preview",
                ".preview-container",
                ".preview-content",
                ".editor-preview",
                ".content",
                ".page",
                "#page",
            ],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::EditorStyles => "editor-styles",
            Self::ArticlePreview => "article-preview",
        }
    }
}

impl FromStr for SelectorProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "editor-styles" | "editor_styles" | "mg-content" => Ok(Self::EditorStyles),
            "article-preview" | "article_preview" | "js-content" => Ok(Self::ArticlePreview),
            other => Err(Error::Config(format!("unknown selector profile: {}", other))),
        }
    }
}

impl std::fmt::Display for SelectorProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Browser launch and page settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserSettings {
    /// Explicit Chromium executable; `None` lets the launcher resolve one.
    pub chrome_path: Option<PathBuf>,
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Bound on navigation and every individual CDP call.
    pub navigation_timeout: Duration,
    pub no_sandbox: bool,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            chrome_path: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            viewport_width: 1400,
            viewport_height: 900,
            navigation_timeout: Duration::from_secs(60),
            no_sandbox: true,
        }
    }
}

/// Extraction heuristic settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSettings {
    /// Host of the source site, used to build target URLs.
    pub source_host: String,
    pub selectors: Vec<String>,
    /// Content must be strictly longer than this to count.
    pub min_content_len: usize,
    /// Wait after DOMContentLoaded for client-side re-rendering.
    pub settle_delay: Duration,
    /// Wait inside each rendering context before probing it.
    pub context_settle_delay: Duration,
    /// Wall-clock budget for one whole request.
    pub request_timeout: Duration,
    /// Maximum number of live browser sessions.
    pub max_sessions: usize,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            source_host: "www.135editor.com".to_string(),
            selectors: SelectorProfile::EditorStyles
                .selectors()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_content_len: 300,
            settle_delay: Duration::from_millis(2500),
            context_settle_delay: Duration::from_millis(800),
            request_timeout: Duration::from_secs(90),
            max_sessions: 4,
        }
    }
}

/// Top-level fetcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// HTTP bind address.
    pub host: String,
    /// HTTP server port.
    pub port: u16,
    pub browser: BrowserSettings,
    pub extraction: ExtractionSettings,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 10000,
            browser: BrowserSettings::default(),
            extraction: ExtractionSettings::default(),
        }
    }
}

impl FetcherConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let mut applied: Vec<&'static str> = Vec::new();
        let mut get = |key: &'static str| {
            let value = lookup(key).filter(|v| !v.trim().is_empty());
            if value.is_some() {
                applied.push(key);
            }
            value
        };

        if let Some(host) = get("HOST") {
            config.host = host.trim().to_string();
        }
        if let Some(port) = get("PORT") {
            config.port = parse_value("PORT", &port)?;
        }

        if let Some(path) = get("CHROME_PATH") {
            config.browser.chrome_path = Some(PathBuf::from(path.trim()));
        }
        if let Some(secs) = get("TPLFETCH_NAV_TIMEOUT_SECS") {
            config.browser.navigation_timeout =
                Duration::from_secs(parse_value("TPLFETCH_NAV_TIMEOUT_SECS", &secs)?);
        }
        if let Some(flag) = get("TPLFETCH_NO_SANDBOX") {
            config.browser.no_sandbox = parse_bool("TPLFETCH_NO_SANDBOX", &flag)?;
        }

        let extraction = &mut config.extraction;
        if let Some(host) = get("TPLFETCH_SOURCE_HOST") {
            extraction.source_host = host.trim().trim_end_matches('/').to_string();
        }
        if let Some(profile) = get("TPLFETCH_SELECTOR_PROFILE") {
            let profile: SelectorProfile = profile.parse()?;
            extraction.selectors = profile.selectors().iter().map(|s| s.to_string()).collect();
        }
        if let Some(list) = get("TPLFETCH_SELECTORS") {
            let selectors: Vec<String> = list
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if selectors.is_empty() {
                return Err(Error::Config("TPLFETCH_SELECTORS is empty".into()));
            }
            if lookup("TPLFETCH_SELECTOR_PROFILE").is_some() {
                warn!("TPLFETCH_SELECTORS overrides TPLFETCH_SELECTOR_PROFILE");
            }
            extraction.selectors = selectors;
        }
        if let Some(len) = get("TPLFETCH_MIN_CONTENT_LEN") {
            extraction.min_content_len = parse_value("TPLFETCH_MIN_CONTENT_LEN", &len)?;
        }
        if let Some(ms) = get("TPLFETCH_SETTLE_MS") {
            extraction.settle_delay =
                Duration::from_millis(parse_value("TPLFETCH_SETTLE_MS", &ms)?);
        }
        if let Some(ms) = get("TPLFETCH_CONTEXT_SETTLE_MS") {
            extraction.context_settle_delay =
                Duration::from_millis(parse_value("TPLFETCH_CONTEXT_SETTLE_MS", &ms)?);
        }
        if let Some(secs) = get("TPLFETCH_REQUEST_TIMEOUT_SECS") {
            extraction.request_timeout =
                Duration::from_secs(parse_value("TPLFETCH_REQUEST_TIMEOUT_SECS", &secs)?);
        }
        if let Some(n) = get("TPLFETCH_MAX_SESSIONS") {
            let n: usize = parse_value("TPLFETCH_MAX_SESSIONS", &n)?;
            if n == 0 {
                return Err(Error::Config("TPLFETCH_MAX_SESSIONS must be at least 1".into()));
            }
            extraction.max_sessions = n;
        }

        debug!("Configuration overrides from environment: {:?}", applied);
        Ok(config)
    }

    /// Socket address string for the HTTP listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid value for {}: {:?}", key, raw)))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("invalid value for {}: {:?}", key, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<FetcherConfig> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        FetcherConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.port, 10000);
        assert_eq!(config.bind_addr(), "0.0.0.0:10000");
        assert!(config.browser.chrome_path.is_none());
        assert_eq!(config.extraction.min_content_len, 300);
        assert_eq!(config.extraction.selectors[0], "#fullpage.mg-content");
        assert_eq!(config.extraction.max_sessions, 4);
    }

    #[test]
    fn test_env_overrides() {
        let config = from_pairs(&[
            ("PORT", "8080"),
            ("CHROME_PATH", "/usr/bin/chromium"),
            ("TPLFETCH_SETTLE_MS", "500"),
            ("TPLFETCH_NO_SANDBOX", "false"),
            ("TPLFETCH_SELECTOR_PROFILE", "article-preview"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(
            config.browser.chrome_path,
            Some(PathBuf::from("/usr/bin/chromium"))
        );
        assert_eq!(config.extraction.settle_delay, Duration::from_millis(500));
        assert!(!config.browser.no_sandbox);
        assert_eq!(config.extraction.selectors[0], "#js_content");
    }

    #[test]
    fn test_custom_selectors_override_profile() {
        let config = from_pairs(&[
            ("TPLFETCH_SELECTOR_PROFILE", "article-preview"),
            ("TPLFETCH_SELECTORS", " #a , .b ,,"),
        ])
        .unwrap();
        assert_eq!(config.extraction.selectors, vec!["#a", ".b"]);
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let config = from_pairs(&[("PORT", "  "), ("CHROME_PATH", "")]).unwrap();
        assert_eq!(config.port, 10000);
        assert!(config.browser.chrome_path.is_none());
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(from_pairs(&[("PORT", "abc")]), Err(Error::Config(_))));
        assert!(matches!(
            from_pairs(&[("TPLFETCH_MAX_SESSIONS", "0")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            from_pairs(&[("TPLFETCH_SELECTOR_PROFILE", "nope")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            from_pairs(&[("TPLFETCH_NO_SANDBOX", "maybe")]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_profile_round_trip_names() {
        for profile in [SelectorProfile::EditorStyles, SelectorProfile::ArticlePreview] {
            assert_eq!(profile.name().parse::<SelectorProfile>().unwrap(), profile);
            assert!(!profile.selectors().is_empty());
        }
    }
}
