//! Template extraction types.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tplfetch_core::{Error, Result};

static TEMPLATE_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").unwrap());

/// URL fragments that mark a frame as likely holding the preview.
pub const PREFERRED_FRAME_HINTS: &[&str] = &["preview", "editor_styles", "style", "render"];

/// Validated numeric template identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TemplateId(String);

impl TemplateId {
    /// Validate a raw id. Surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> Result<Self> {
        let id = raw.trim();
        if id.is_empty() {
            return Err(Error::Validation(
                "missing template id, e.g. /api/template?id=169311".into(),
            ));
        }
        if !TEMPLATE_ID_RE.is_match(id) {
            return Err(Error::Validation(format!(
                "template id must contain digits only, got {:?}",
                id
            )));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Preview page URL for this template on `source_host`.
    pub fn target_url(&self, source_host: &str) -> String {
        format!("https://{}/editor_styles/{}?preview=1", source_host, self.0)
    }
}

impl std::fmt::Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a probe runs: the top-level document or one embedded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderContext {
    MainDocument,
    Frame(FrameCandidate),
}

/// An embedded frame discovered on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCandidate {
    /// Backend-specific frame handle.
    pub handle: String,
    pub url: String,
}

impl FrameCandidate {
    pub fn new(handle: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            url: url.into(),
        }
    }

    pub fn is_preferred(&self) -> bool {
        PREFERRED_FRAME_HINTS.iter().any(|hint| self.url.contains(hint))
    }
}

/// Move preview-looking frames ahead of the rest, keeping relative order in both groups.
pub fn rank_frames(frames: Vec<FrameCandidate>) -> Vec<FrameCandidate> {
    let (mut preferred, rest): (Vec<_>, Vec<_>) =
        frames.into_iter().partition(FrameCandidate::is_preferred);
    preferred.extend(rest);
    preferred
}

/// Input to the in-page probe script.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeRequest {
    pub selectors: Vec<String>,
    #[serde(rename = "minLength")]
    pub min_length: usize,
}

/// Output of the in-page probe script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProbeOutcome {
    /// Matched outer HTML, or the body's when nothing matched.
    pub html: Option<String>,
    /// The selector that matched, or `"body"` for the fallback.
    pub matched: Option<String>,
}

impl ProbeOutcome {
    pub fn matched(selector: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            html: Some(html.into()),
            matched: Some(selector.into()),
        }
    }

    /// Trimmed html if it is strictly longer than `min_length` UTF-16 units.
    pub fn sufficient(&self, min_length: usize) -> Option<&str> {
        self.html
            .as_deref()
            .map(str::trim)
            .filter(|html| content_len(html) > min_length)
    }
}

/// Length as the page's own scripts see it (UTF-16 code units).
pub fn content_len(html: &str) -> usize {
    html.encode_utf16().count()
}

/// Which context produced the returned html.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSource {
    MainDocument { selector: String },
    Frame { url: String, selector: String },
}

/// A successful extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateHtml {
    pub html: String,
    pub source: ContentSource,
    pub target_url: String,
}

/// Per-request lifecycle stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStage {
    Validating,
    SessionAcquired,
    Navigating,
    Settling,
    ExtractingPrimary,
    ExtractingFallback,
    Succeeded,
    Failed,
    SessionReleased,
}
