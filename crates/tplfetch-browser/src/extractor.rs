//! Extractor — renders a template preview and pulls out its content fragment.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tplfetch_core::{BrowserSettings, Error, ExtractionSettings, FetcherConfig, Result};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::chrome::ChromeLauncher;
use crate::session::{BrowserLauncher, BrowserSession, SessionGuard};
use crate::types::*;

const NO_CONTENT_REASON: &str =
    "no candidate selector or frame produced enough HTML; the page structure may have changed or require login";

/// Fetches rendered template HTML, one browser session per request.
pub struct Extractor {
    launcher: Arc<dyn BrowserLauncher>,
    browser: BrowserSettings,
    settings: ExtractionSettings,
    sessions: Arc<Semaphore>,
}

impl Extractor {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        browser: BrowserSettings,
        settings: ExtractionSettings,
    ) -> Self {
        let sessions = Arc::new(Semaphore::new(settings.max_sessions.max(1)));
        Self {
            launcher,
            browser,
            settings,
            sessions,
        }
    }

    /// Extractor backed by headless Chromium.
    pub fn chrome(config: &FetcherConfig) -> Self {
        Self::new(
            Arc::new(ChromeLauncher),
            config.browser.clone(),
            config.extraction.clone(),
        )
    }

    /// Sessions that can start right now without waiting.
    pub fn available_sessions(&self) -> usize {
        self.sessions.available_permits()
    }

    pub fn target_url(&self, id: &TemplateId) -> String {
        id.target_url(&self.settings.source_host)
    }

    /// Render the preview page for `raw_id` and return its content fragment.
    ///
    /// The id is validated before any browser work. The browser session is
    /// closed on every path, including when the request budget runs out.
    pub async fn fetch_template_html(&self, raw_id: &str) -> Result<TemplateHtml> {
        let span = info_span!("fetch_template", request_id = %Uuid::new_v4(), template_id = raw_id);
        async move {
            stage(FetchStage::Validating);
            let id = TemplateId::parse(raw_id)?;
            let target_url = self.target_url(&id);

            let budget = self.settings.request_timeout;
            let result = match tokio::time::timeout(budget, self.run(&target_url)).await {
                Ok(result) => result,
                Err(_) => Err(Error::navigation(
                    format!("request exceeded its {:?} budget", budget),
                    target_url.as_str(),
                )),
            };

            match &result {
                Ok(found) => info!("Extracted {} bytes from {:?}", found.html.len(), found.source),
                Err(e) => warn!("Extraction of {} failed: {}", target_url, e),
            }
            result.map_err(|e| e.with_target_url(&target_url))
        }
        .instrument(span)
        .await
    }

    async fn run(&self, target_url: &str) -> Result<TemplateHtml> {
        let permit = self
            .sessions
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Session("session limiter closed".into()))?;

        let session = self.launcher.launch(&self.browser).await?;
        let guard = SessionGuard::new(session, Some(permit));
        stage(FetchStage::SessionAcquired);

        let result = self.extract(guard.session()?, target_url).await;
        stage(if result.is_ok() {
            FetchStage::Succeeded
        } else {
            FetchStage::Failed
        });

        guard.release().await;
        stage(FetchStage::SessionReleased);
        result
    }

    async fn extract(&self, session: &dyn BrowserSession, target_url: &str) -> Result<TemplateHtml> {
        stage(FetchStage::Navigating);
        session
            .navigate(target_url, self.browser.navigation_timeout)
            .await?;

        stage(FetchStage::Settling);
        tokio::time::sleep(self.settings.settle_delay).await;

        stage(FetchStage::ExtractingPrimary);
        if let Some((selector, html)) = self.probe(session, &RenderContext::MainDocument).await? {
            return Ok(TemplateHtml {
                html,
                source: ContentSource::MainDocument { selector },
                target_url: target_url.to_string(),
            });
        }

        stage(FetchStage::ExtractingFallback);
        let frames = match session.frames().await {
            Ok(frames) => rank_frames(frames),
            Err(Error::Evaluation(e)) => {
                warn!("Could not enumerate frames: {}", e);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        debug!("Trying {} frame(s)", frames.len());

        let mut last_tried = None;
        for frame in frames {
            let url = frame.url.clone();
            last_tried = Some(url.clone());
            let context = RenderContext::Frame(frame);
            if let Some((selector, html)) = self.probe(session, &context).await? {
                return Ok(TemplateHtml {
                    html,
                    source: ContentSource::Frame { url, selector },
                    target_url: target_url.to_string(),
                });
            }
        }

        Err(Error::Extraction {
            reason: NO_CONTENT_REASON.to_string(),
            target_url: target_url.to_string(),
            iframe_url_tried: last_tried,
        })
    }

    /// Probe one context. `Ok(None)` means it had nothing usable, including
    /// when its script failed.
    async fn probe(
        &self,
        session: &dyn BrowserSession,
        context: &RenderContext,
    ) -> Result<Option<(String, String)>> {
        if !self.settings.context_settle_delay.is_zero() {
            tokio::time::sleep(self.settings.context_settle_delay).await;
        }

        let request = ProbeRequest {
            selectors: self.settings.selectors.clone(),
            min_length: self.settings.min_content_len,
        };
        let outcome = match session.probe(context, &request).await {
            Ok(outcome) => outcome,
            Err(Error::Evaluation(e)) => {
                warn!("Probe failed in {:?}: {}", context, e);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let found = outcome.sufficient(self.settings.min_content_len).map(|html| {
            let selector = outcome.matched.clone().unwrap_or_else(|| "body".to_string());
            (selector, html.to_string())
        });
        if found.is_none() {
            debug!(
                "{:?} yielded {} UTF-16 units, below threshold {}",
                context,
                outcome.html.as_deref().map(content_len).unwrap_or(0),
                self.settings.min_content_len
            );
        }
        Ok(found)
    }
}

fn stage(stage: FetchStage) {
    debug!(?stage, "fetch stage");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDocument, MockFailure, MockLauncher, MockPage};
    use std::time::Duration;

    fn settings() -> ExtractionSettings {
        ExtractionSettings {
            min_content_len: 20,
            settle_delay: Duration::ZERO,
            context_settle_delay: Duration::ZERO,
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    fn extractor(launcher: &MockLauncher) -> Extractor {
        Extractor::new(
            Arc::new(launcher.clone()),
            BrowserSettings::default(),
            settings(),
        )
    }

    fn long(tag: &str) -> String {
        format!("<div class=\"{}\">{}</div>", tag, "content ".repeat(10))
    }

    #[tokio::test]
    async fn test_invalid_id_never_launches() {
        let launcher = MockLauncher::new(MockPage::default());
        let stats = launcher.stats();
        let extractor = extractor(&launcher);

        for bad in ["abc", "", "12x", "1 2"] {
            let err = extractor.fetch_template_html(bad).await.unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }
        assert_eq!(stats.launches(), 0);
        assert_eq!(stats.navigations(), 0);
    }

    #[tokio::test]
    async fn test_fullpage_div_end_to_end() {
        let div = format!(
            "<div id=\"fullpage\" class=\"mg-content\"><section>{}</section></div>",
            "样式内容 ".repeat(20)
        );
        let page = MockPage::new(
            MockDocument::new()
                .with_element("#fullpage.mg-content", format!("\n  {}  \n", div))
                .with_body(format!("<body>{}</body>", div)),
        );
        let launcher = MockLauncher::new(page);
        let stats = launcher.stats();

        let found = extractor(&launcher).fetch_template_html("169311").await.unwrap();
        assert_eq!(found.html, div);
        assert_eq!(
            found.target_url,
            "https://www.135editor.com/editor_styles/169311?preview=1"
        );
        assert_eq!(
            found.source,
            ContentSource::MainDocument {
                selector: "#fullpage.mg-content".into()
            }
        );
        assert_eq!(stats.navigations(), 1);
        assert_eq!(stats.closes(), 1);
    }

    #[tokio::test]
    async fn test_higher_priority_selector_wins() {
        let page = MockPage::new(
            MockDocument::new()
                .with_element(".mg-content", long("low"))
                .with_element("#fullpage.mg-content", long("high")),
        );
        let launcher = MockLauncher::new(page);
        let found = extractor(&launcher).fetch_template_html("1").await.unwrap();
        assert_eq!(found.html, long("high"));
    }

    #[tokio::test]
    async fn test_short_match_falls_through_to_next_selector() {
        let page = MockPage::new(
            MockDocument::new()
                .with_element("#fullpage.mg-content", "<div></div>")
                .with_element("#fullpage", long("second")),
        );
        let launcher = MockLauncher::new(page);
        let found = extractor(&launcher).fetch_template_html("1").await.unwrap();
        assert_eq!(found.html, long("second"));
    }

    #[tokio::test]
    async fn test_body_fallback_when_long_enough() {
        let body = format!("<body>{}</body>", "text ".repeat(20));
        let launcher = MockLauncher::new(MockPage::new(MockDocument::new().with_body(body.clone())));
        let found = extractor(&launcher).fetch_template_html("7").await.unwrap();
        assert_eq!(found.html, body);
        assert_eq!(
            found.source,
            ContentSource::MainDocument {
                selector: "body".into()
            }
        );
    }

    #[tokio::test]
    async fn test_preview_frame_used_when_main_is_a_shell() {
        let page = MockPage::new(MockDocument::new().with_body("<body></body>"))
            .with_frame(
                "https://ads.example.com/slot",
                MockDocument::new().with_body(long("ad")),
            )
            .with_frame(
                "https://www.135editor.com/preview/1",
                MockDocument::new().with_element("#fullpage", long("frame")),
            );
        let launcher = MockLauncher::new(page);
        let stats = launcher.stats();

        let found = extractor(&launcher).fetch_template_html("1").await.unwrap();
        assert_eq!(found.html, long("frame"));
        assert_eq!(
            found.source,
            ContentSource::Frame {
                url: "https://www.135editor.com/preview/1".into(),
                selector: "#fullpage".into()
            }
        );
        // The preferred frame is tried before the ad frame, which is never reached.
        assert_eq!(stats.probed(), vec!["main", "https://www.135editor.com/preview/1"]);
    }

    #[tokio::test]
    async fn test_extraction_failure_reports_last_frame() {
        let page = MockPage::new(MockDocument::new().with_body("   "))
            .with_frame("https://a.example.com/x", MockDocument::new())
            .with_frame("https://b.example.com/y", MockDocument::new().with_body("<body></body>"));
        let launcher = MockLauncher::new(page);
        let stats = launcher.stats();

        let err = extractor(&launcher).fetch_template_html("169311").await.unwrap_err();
        match err {
            Error::Extraction {
                target_url,
                iframe_url_tried,
                ..
            } => {
                assert_eq!(
                    target_url,
                    "https://www.135editor.com/editor_styles/169311?preview=1"
                );
                assert_eq!(iframe_url_tried.as_deref(), Some("https://b.example.com/y"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(stats.closes(), 1);
    }

    #[tokio::test]
    async fn test_extraction_failure_without_frames() {
        let launcher = MockLauncher::new(MockPage::new(MockDocument::new()));
        let err = extractor(&launcher).fetch_template_html("5").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Extraction {
                iframe_url_tried: None,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_evaluation_failure_still_closes_once() {
        let page = MockPage::new(MockDocument::new().failing(MockFailure::Evaluation))
            .with_frame("https://x/render", MockDocument::new().failing(MockFailure::Evaluation));
        let launcher = MockLauncher::new(page);
        let stats = launcher.stats();

        let err = extractor(&launcher).fetch_template_html("9").await.unwrap_err();
        match err {
            Error::Extraction {
                iframe_url_tried, ..
            } => assert_eq!(iframe_url_tried.as_deref(), Some("https://x/render")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(stats.closes(), 1);
    }

    #[tokio::test]
    async fn test_failing_frames_still_count_as_tried() {
        let page = MockPage::new(MockDocument::new())
            .with_frame("https://x/preview", MockDocument::new().failing(MockFailure::Evaluation))
            .with_frame(
                "https://ads.example.com/slot",
                MockDocument::new().failing(MockFailure::Evaluation),
            );
        let launcher = MockLauncher::new(page);
        let stats = launcher.stats();

        let err = extractor(&launcher).fetch_template_html("9").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Extraction {
                iframe_url_tried: Some(ref url),
                ..
            } if url == "https://ads.example.com/slot"
        ));
        assert_eq!(
            stats.probed(),
            vec!["main", "https://x/preview", "https://ads.example.com/slot"]
        );
    }

    #[tokio::test]
    async fn test_live_sessions_never_exceed_cap() {
        let page = MockPage::new(MockDocument::new().with_element("#fullpage", long("capped")))
            .with_navigation_delay(Duration::from_millis(300));
        let launcher = MockLauncher::new(page);
        let stats = launcher.stats();
        let extractor = Arc::new(Extractor::new(
            Arc::new(launcher.clone()),
            BrowserSettings::default(),
            ExtractionSettings {
                max_sessions: 2,
                ..settings()
            },
        ));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let extractor = extractor.clone();
                tokio::spawn(async move { extractor.fetch_template_html("11").await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(stats.launches(), 2);
        assert_eq!(extractor.available_sessions(), 0);

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().html, long("capped"));
        }
        assert_eq!(stats.launches(), 6);
        assert_eq!(stats.closes(), 6);
        assert_eq!(extractor.available_sessions(), 2);
    }

    #[tokio::test]
    async fn test_crash_surfaces_session_error_and_closes_once() {
        let page = MockPage::new(MockDocument::new().failing(MockFailure::Crash));
        let launcher = MockLauncher::new(page);
        let stats = launcher.stats();

        let err = extractor(&launcher).fetch_template_html("9").await.unwrap_err();
        assert!(matches!(err, Error::Session(_)));
        assert_eq!(stats.closes(), 1);
    }

    #[tokio::test]
    async fn test_navigation_error_carries_target_url() {
        let page = MockPage::default().failing_navigation("net::ERR_NAME_NOT_RESOLVED");
        let launcher = MockLauncher::new(page);
        let stats = launcher.stats();

        let err = extractor(&launcher).fetch_template_html("3").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(
            err.target_url(),
            Some("https://www.135editor.com/editor_styles/3?preview=1")
        );
        assert_eq!(stats.closes(), 1);
    }

    #[tokio::test]
    async fn test_launch_failure_is_session_error() {
        let launcher = MockLauncher::failing_launch("chrome not found");
        let err = extractor(&launcher).fetch_template_html("3").await.unwrap_err();
        assert!(matches!(err, Error::Session(_)));
    }

    #[tokio::test]
    async fn test_request_budget_cancels_and_still_closes() {
        let page = MockPage::default().with_navigation_delay(Duration::from_secs(30));
        let launcher = MockLauncher::new(page);
        let stats = launcher.stats();
        let extractor = Extractor::new(
            Arc::new(launcher.clone()),
            BrowserSettings::default(),
            ExtractionSettings {
                request_timeout: Duration::from_millis(50),
                ..settings()
            },
        );

        let err = extractor.fetch_template_html("3").await.unwrap_err();
        assert!(matches!(err, Error::Navigation { .. }));
        assert!(err.target_url().is_some());

        // The guard spawns the close when the cancelled future is dropped.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.closes(), 1);
        assert_eq!(extractor.available_sessions(), 4);
    }

    #[tokio::test]
    async fn test_repeated_calls_are_identical() {
        let page = MockPage::new(MockDocument::new().with_element("#fullpage", long("same")));
        let launcher = MockLauncher::new(page);
        let stats = launcher.stats();
        let extractor = extractor(&launcher);

        let first = extractor.fetch_template_html("42").await.unwrap();
        let second = extractor.fetch_template_html("42").await.unwrap();
        assert_eq!(first.html.as_bytes(), second.html.as_bytes());
        assert_eq!(stats.launches(), 2);
        assert_eq!(stats.closes(), 2);
    }
}
