//! In-page scripts. This is the only place page-side JavaScript is written;
//! inputs go in as JSON and results come back as JSON.

use tplfetch_core::Result;

use crate::types::ProbeRequest;

/// Walks the candidate selectors in order and returns the first outer HTML
/// longer than `minLength`, else the body's outer HTML.
const PROBE_FN: &str = r#"function (req) {
  for (const sel of req.selectors) {
    let el = null;
    try {
      el = document.querySelector(sel);
    } catch (e) {
      el = null;
    }
    if (el && el.outerHTML && el.outerHTML.trim().length > req.minLength) {
      return { html: el.outerHTML, matched: sel };
    }
  }
  if (document.body) {
    return { html: document.body.outerHTML, matched: "body" };
  }
  return { html: null, matched: null };
}"#;

pub const READY_STATE_EXPR: &str = "document.readyState";

pub const BODY_PRESENT_EXPR: &str = "!!document.body";

/// Build a self-invoking probe expression with `req` embedded as a JSON literal.
pub fn probe_expression(req: &ProbeRequest) -> Result<String> {
    let input = serde_json::to_string(req)?;
    Ok(format!("({})({})", PROBE_FN, input))
}

/// `readyState` values at or past DOMContentLoaded.
pub fn dom_ready(state: &str) -> bool {
    matches!(state, "interactive" | "complete")
}

/// How usable the page is once the readiness wait has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// DOMContentLoaded was reached.
    Ready,
    /// Still loading, but a body exists to extract from.
    Partial,
    NotReady,
}

/// Decide readiness from the last observed `readyState` and whether a body exists.
pub fn readiness(ready_state: Option<&str>, body_present: bool) -> Readiness {
    match ready_state {
        Some(state) if dom_ready(state) => Readiness::Ready,
        _ if body_present => Readiness::Partial,
        _ => Readiness::NotReady,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_expression_embeds_json_input() {
        let req = ProbeRequest {
            selectors: vec!["#fullpage.mg-content".into(), "a[title=\"x'y\"]".into()],
            min_length: 300,
        };
        let expr = probe_expression(&req).unwrap();
        assert!(expr.starts_with("(function (req)"));
        assert!(expr.ends_with(
            r##"({"selectors":["#fullpage.mg-content","a[title=\"x'y\"]"],"minLength":300})"##
        ));
    }

    #[test]
    fn test_dom_ready() {
        assert!(!dom_ready("loading"));
        assert!(dom_ready("interactive"));
        assert!(dom_ready("complete"));
    }

    #[test]
    fn test_stalled_load_with_body_is_usable() {
        assert_eq!(readiness(Some("complete"), false), Readiness::Ready);
        assert_eq!(readiness(Some("interactive"), true), Readiness::Ready);
        // A hanging subresource keeps the page loading; the body is still there.
        assert_eq!(readiness(Some("loading"), true), Readiness::Partial);
        assert_eq!(readiness(None, true), Readiness::Partial);
        assert_eq!(readiness(Some("loading"), false), Readiness::NotReady);
        assert_eq!(readiness(None, false), Readiness::NotReady);
    }
}
