//! In-memory browser backend for tests.
//!
//! A `MockPage` describes what each rendering context contains as a map of
//! selector to outer HTML. Probes walk the requested selectors the same way
//! the in-page script does, so selector priority and length thresholds can
//! be exercised without a real browser.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tplfetch_core::{BrowserSettings, Error, Result};

use crate::session::{BrowserLauncher, BrowserSession};
use crate::types::{FrameCandidate, ProbeOutcome, ProbeRequest, RenderContext};

/// Failure to inject into a rendering context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    /// The in-page script throws.
    Evaluation,
    /// The browser dies while probing.
    Crash,
}

/// Contents of one rendering context.
#[derive(Debug, Clone, Default)]
pub struct MockDocument {
    elements: HashMap<String, String>,
    body: Option<String>,
    failure: Option<MockFailure>,
}

impl MockDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Element matched by `selector`, with its outer HTML.
    pub fn with_element(mut self, selector: &str, outer_html: impl Into<String>) -> Self {
        self.elements.insert(selector.to_string(), outer_html.into());
        self
    }

    pub fn with_body(mut self, outer_html: impl Into<String>) -> Self {
        self.body = Some(outer_html.into());
        self
    }

    pub fn failing(mut self, failure: MockFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    fn probe(&self, request: &ProbeRequest) -> Result<ProbeOutcome> {
        match self.failure {
            Some(MockFailure::Evaluation) => {
                return Err(Error::Evaluation("ReferenceError: document is not defined".into()))
            }
            Some(MockFailure::Crash) => {
                return Err(Error::Session("browser process exited".into()))
            }
            None => {}
        }
        for selector in &request.selectors {
            if let Some(html) = self.elements.get(selector) {
                if html.trim().encode_utf16().count() > request.min_length {
                    return Ok(ProbeOutcome::matched(selector.clone(), html.clone()));
                }
            }
        }
        Ok(match &self.body {
            Some(body) => ProbeOutcome::matched("body", body.clone()),
            None => ProbeOutcome::default(),
        })
    }
}

/// A scripted page: main document plus embedded frames.
#[derive(Debug, Clone, Default)]
pub struct MockPage {
    main: MockDocument,
    frames: Vec<(String, MockDocument)>,
    navigation_error: Option<String>,
    navigation_delay: Duration,
}

impl MockPage {
    pub fn new(main: MockDocument) -> Self {
        Self {
            main,
            ..Default::default()
        }
    }

    pub fn with_frame(mut self, url: &str, document: MockDocument) -> Self {
        self.frames.push((url.to_string(), document));
        self
    }

    pub fn failing_navigation(mut self, message: &str) -> Self {
        self.navigation_error = Some(message.to_string());
        self
    }

    pub fn with_navigation_delay(mut self, delay: Duration) -> Self {
        self.navigation_delay = delay;
        self
    }
}

/// Counters shared by a launcher and every session it creates.
#[derive(Debug, Default)]
pub struct MockStats {
    launches: AtomicUsize,
    navigations: AtomicUsize,
    closes: AtomicUsize,
    probed: Mutex<Vec<String>>,
}

impl MockStats {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn navigations(&self) -> usize {
        self.navigations.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Contexts probed so far, `"main"` or the frame URL.
    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().clone()
    }
}

/// Launcher handing out sessions over a fixed `MockPage`.
#[derive(Debug, Clone)]
pub struct MockLauncher {
    page: MockPage,
    launch_error: Option<String>,
    stats: Arc<MockStats>,
}

impl MockLauncher {
    pub fn new(page: MockPage) -> Self {
        Self {
            page,
            launch_error: None,
            stats: Arc::new(MockStats::default()),
        }
    }

    pub fn failing_launch(message: &str) -> Self {
        Self {
            page: MockPage::default(),
            launch_error: Some(message.to_string()),
            stats: Arc::new(MockStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<MockStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl BrowserLauncher for MockLauncher {
    async fn launch(&self, _settings: &BrowserSettings) -> Result<Box<dyn BrowserSession>> {
        if let Some(message) = &self.launch_error {
            return Err(Error::Session(message.clone()));
        }
        self.stats.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            page: self.page.clone(),
            stats: self.stats.clone(),
        }))
    }
}

struct MockSession {
    page: MockPage,
    stats: Arc<MockStats>,
}

#[async_trait]
impl BrowserSession for MockSession {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<()> {
        self.stats.navigations.fetch_add(1, Ordering::SeqCst);
        if !self.page.navigation_delay.is_zero() {
            tokio::time::sleep(self.page.navigation_delay).await;
        }
        match &self.page.navigation_error {
            Some(message) => Err(Error::navigation(message.clone(), url)),
            None => Ok(()),
        }
    }

    async fn frames(&self) -> Result<Vec<FrameCandidate>> {
        Ok(self
            .page
            .frames
            .iter()
            .enumerate()
            .map(|(i, (url, _))| FrameCandidate::new(i.to_string(), url.clone()))
            .collect())
    }

    async fn probe(
        &self,
        context: &RenderContext,
        request: &ProbeRequest,
    ) -> Result<ProbeOutcome> {
        match context {
            RenderContext::MainDocument => {
                self.stats.probed.lock().push("main".to_string());
                self.page.main.probe(request)
            }
            RenderContext::Frame(frame) => {
                self.stats.probed.lock().push(frame.url.clone());
                let document = frame
                    .handle
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| self.page.frames.get(i))
                    .map(|(_, doc)| doc)
                    .ok_or_else(|| Error::Evaluation(format!("detached frame {}", frame.url)))?;
                document.probe(request)
            }
        }
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
