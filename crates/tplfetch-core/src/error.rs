//! Error types for the template fetcher.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The template id is not a run of decimal digits.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The target page could not be reached or rendered in time.
    #[error("Navigation error: {message}")]
    Navigation { message: String, target_url: String },

    /// The page rendered but no context produced enough content.
    #[error("Extraction failed: {reason}")]
    Extraction {
        reason: String,
        target_url: String,
        iframe_url_tried: Option<String>,
    },

    /// The browser failed to launch or died mid-session.
    #[error("Browser session error: {0}")]
    Session(String),

    /// An in-page script failed inside one rendering context.
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification used at the HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    Internal,
}

impl Error {
    pub fn navigation(message: impl Into<String>, target_url: impl Into<String>) -> Self {
        Self::Navigation {
            message: message.into(),
            target_url: target_url.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::BadRequest,
            Self::Extraction { .. } => ErrorKind::NotFound,
            _ => ErrorKind::Internal,
        }
    }

    /// Whether a caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Navigation { .. })
    }

    /// Fill in the target URL of a navigation error raised below the
    /// layer that knows it.
    pub fn with_target_url(self, url: &str) -> Self {
        match self {
            Self::Navigation {
                message,
                target_url,
            } if target_url.is_empty() => Self::Navigation {
                message,
                target_url: url.to_string(),
            },
            other => other,
        }
    }

    /// Target URL carried by the error, if the failure happened after it was built.
    pub fn target_url(&self) -> Option<&str> {
        match self {
            Self::Navigation { target_url, .. } | Self::Extraction { target_url, .. } => {
                Some(target_url)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::Validation("x".into()).kind(), ErrorKind::BadRequest);
        let extraction = Error::Extraction {
            reason: "nothing".into(),
            target_url: "https://example.com".into(),
            iframe_url_tried: None,
        };
        assert_eq!(extraction.kind(), ErrorKind::NotFound);
        assert_eq!(Error::Session("crash".into()).kind(), ErrorKind::Internal);
        assert_eq!(
            Error::navigation("timeout", "https://example.com").kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_only_navigation_is_retryable() {
        assert!(Error::navigation("dns", "https://example.com").is_retryable());
        assert!(!Error::Session("crash".into()).is_retryable());
        assert!(!Error::Validation("abc".into()).is_retryable());
    }

    #[test]
    fn test_target_url() {
        let err = Error::navigation("timeout", "https://example.com/a");
        assert_eq!(err.target_url(), Some("https://example.com/a"));
        assert_eq!(Error::Session("x".into()).target_url(), None);
    }

    #[test]
    fn test_with_target_url_only_fills_blank() {
        let filled = Error::navigation("timed out", "").with_target_url("https://a");
        assert_eq!(filled.target_url(), Some("https://a"));

        let kept = Error::navigation("timed out", "https://b").with_target_url("https://a");
        assert_eq!(kept.target_url(), Some("https://b"));

        let other = Error::Session("x".into()).with_target_url("https://a");
        assert!(matches!(other, Error::Session(_)));
    }
}
